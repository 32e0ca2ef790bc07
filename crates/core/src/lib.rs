//! Draftline core library.
//!
//! This crate provides the building blocks for branching document history
//! with AI-assisted rewrites: the version graph, multi-granularity diffing,
//! per-paragraph lineage, change classification with rule-driven merge
//! review, configuration, and SQLite persistence.

pub mod config;
pub mod db;
pub mod diff;
pub mod errors;
pub mod lineage;
pub mod merge;
pub mod models;
pub mod session;
pub mod settings;
pub mod store;
pub mod text;
pub mod version_graph;

// Re-exports for convenience.
pub use config::EngineConfig;
pub use db::Database;
pub use diff::{Change, ChangeKind, DiffEngine, Granularity};
pub use errors::CoreError;
pub use lineage::LineageTracker;
pub use merge::{MergeEngine, MergeReview, Preset};
pub use models::{Document, ParagraphLineage, VersionNode};
pub use session::{AiEditor, DocumentSession};
pub use store::DocumentStore;
pub use version_graph::VersionGraph;
