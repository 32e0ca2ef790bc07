//! Persistence surface used by the session layer.
//!
//! [`crate::db::Database`] is the SQLite implementation.

use crate::errors::DatabaseError;
use crate::models::{Document, ParagraphLineage};
use crate::version_graph::VersionGraph;

/// Storage for documents, their version graphs, paragraph lineage and
/// free-form settings.
pub trait DocumentStore: Send + Sync {
    fn create_document(&self, document: &Document) -> Result<(), DatabaseError>;

    fn get_document(&self, document_id: &str) -> Result<Option<Document>, DatabaseError>;

    fn list_documents(&self) -> Result<Vec<Document>, DatabaseError>;

    /// Persist every node of `graph`. Existing nodes are updated in place;
    /// nodes are never deleted.
    fn save_graph(&self, graph: &VersionGraph) -> Result<(), DatabaseError>;

    fn load_graph(&self, document_id: &str) -> Result<VersionGraph, DatabaseError>;

    /// Replace the stored lineage of a document.
    fn save_lineage(&self, document_id: &str, entries: &[ParagraphLineage]) -> Result<(), DatabaseError>;

    fn load_lineage(&self, document_id: &str) -> Result<Vec<ParagraphLineage>, DatabaseError>;

    fn save_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    fn load_setting(&self, key: &str) -> Result<Option<String>, DatabaseError>;
}
