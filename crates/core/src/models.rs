//! Domain model types shared by the version graph, lineage tracker, store and
//! session layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A document whose history is tracked by one version tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document record with a fresh UUID.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// An auto-saved snapshot attached to a version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    pub content: String,
    /// Hex SHA-256 of `content`, used to drop identical consecutive saves.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A content snapshot plus provenance metadata.
///
/// Nodes live in the [`VersionGraph`](crate::version_graph::VersionGraph)
/// arena and refer to their parent by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionNode {
    pub id: String,
    /// Hierarchical number: `"0"` for the original, `"3"` for root-level
    /// versions, `"3.2"` for branches.
    pub number: String,
    /// `None` only for the tree root.
    pub parent_id: Option<String>,
    pub content: String,
    /// The instruction that produced this version, if any.
    pub prompt: Option<String>,
    #[serde(default)]
    pub note: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_original: bool,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl VersionNode {
    /// Number segments, e.g. `"2.3"` -> `[2, 3]`. Malformed segments parse
    /// as 0 so ordering stays total.
    pub fn number_segments(&self) -> Vec<u32> {
        parse_number(&self.number)
    }

    /// Whether this node sits directly under the root (or is the root).
    pub fn is_root_level(&self) -> bool {
        !self.number.contains('.')
    }
}

/// Parse a hierarchical version number into its integer segments.
pub fn parse_number(number: &str) -> Vec<u32> {
    number
        .split('.')
        .map(|segment| segment.trim().parse().unwrap_or(0))
        .collect()
}

// ---------------------------------------------------------------------------
// Paragraph lineage
// ---------------------------------------------------------------------------

/// Links one paragraph of a version back to the version and prompt that
/// produced its text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParagraphLineage {
    pub paragraph_id: String,
    /// The version this entry describes.
    pub version_id: String,
    pub paragraph_index: usize,
    /// The version whose edit last changed this paragraph.
    pub origin_version_id: String,
    pub prompt: Option<String>,
    /// Paragraph text as produced by the origin version.
    pub original_content: String,
    /// Paragraph text as it stands in `version_id`.
    pub current_content: String,
    pub is_locked: bool,
}

impl ParagraphLineage {
    /// Create an unlocked lineage entry with a fresh paragraph id.
    pub fn new(
        version_id: impl Into<String>,
        paragraph_index: usize,
        origin_version_id: impl Into<String>,
        prompt: Option<String>,
        original_content: impl Into<String>,
        current_content: impl Into<String>,
    ) -> Self {
        Self {
            paragraph_id: Uuid::new_v4().to_string(),
            version_id: version_id.into(),
            paragraph_index,
            origin_version_id: origin_version_id.into(),
            prompt,
            original_content: original_content.into(),
            current_content: current_content.into(),
            is_locked: false,
        }
    }

    /// `true` when the paragraph was edited after its origin produced it.
    pub fn is_modified(&self) -> bool {
        self.original_content != self.current_content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0"), vec![0]);
        assert_eq!(parse_number("12"), vec![12]);
        assert_eq!(parse_number("2.10"), vec![2, 10]);
        assert_eq!(parse_number("x.3"), vec![0, 3]);
    }

    #[test]
    fn test_lineage_modified_flag() {
        let mut entry = ParagraphLineage::new("v2", 0, "v1", None, "Hello", "Hello");
        assert!(!entry.is_modified());
        entry.current_content = "Hello there".into();
        assert!(entry.is_modified());
        assert!(!entry.is_locked);
    }
}
