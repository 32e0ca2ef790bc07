//! Error types for the Draftline core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Diffing and similarity scoring have no error type: malformed or empty
//! input degrades to empty unit lists instead of failing.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Lineage(#[from] LineageError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The external AI-edit collaborator failed. Its failure taxonomy is
    /// owned by the caller; the message is carried through verbatim.
    #[error("AI edit failed: {0}")]
    Editor(String),
}

// ---------------------------------------------------------------------------
// Version graph errors
// ---------------------------------------------------------------------------

/// Errors from the version graph.
#[derive(Debug, Error)]
pub enum VersionError {
    /// No version with this id exists in the graph.
    #[error("version not found: {0}")]
    NotFound(String),

    /// No version carries this number.
    #[error("no version numbered '{0}'")]
    NumberNotFound(String),

    /// The version has a newer sibling and is read-only.
    #[error("version {number} is locked; edits must create a new version")]
    Locked { number: String },

    /// A graph rebuilt from storage violates the tree invariants.
    #[error("corrupt version graph for document {document_id}: {detail}")]
    CorruptGraph { document_id: String, detail: String },
}

// ---------------------------------------------------------------------------
// Paragraph lineage errors
// ---------------------------------------------------------------------------

/// Errors from the paragraph lineage tracker.
#[derive(Debug, Error)]
pub enum LineageError {
    /// No lineage entry with this paragraph id.
    #[error("paragraph not found: {0}")]
    ParagraphNotFound(String),

    /// The paragraph index no longer exists in one of the documents; the
    /// revert was not applied.
    #[error(
        "paragraph {index} does not exist in version {version_id} ({available} paragraphs); nothing reverted"
    )]
    StaleParagraph {
        index: usize,
        version_id: String,
        available: usize,
    },

    /// Underlying version lookup failed.
    #[error("lineage version error: {0}")]
    Version(#[from] VersionError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the merge classification and rule engine.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The preset name is not built in and not configured.
    #[error("unknown merge preset: {0}")]
    UnknownPreset(String),

    /// No classified change with this id.
    #[error("change not found: {0}")]
    ChangeNotFound(String),

    /// No alternative with this id on the change.
    #[error("change {change_id} has no alternative '{alternative_id}'")]
    AlternativeNotFound {
        change_id: String,
        alternative_id: String,
    },

    /// A merge was requested without any compare versions.
    #[error("at least one compare version is required")]
    NoCompareVersions,

    /// Underlying version lookup failed.
    #[error("merge version error: {0}")]
    Version(#[from] VersionError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored JSON or timestamp column could not be decoded.
    #[error("failed to decode stored {column}: {detail}")]
    Decode { column: String, detail: String },

    /// The stored rows do not form a valid version graph.
    #[error("stored versions are invalid: {0}")]
    InvalidGraph(#[from] VersionError),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
