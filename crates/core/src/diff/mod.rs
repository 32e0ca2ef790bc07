//! Multi-granularity diffing between two content snapshots.
//!
//! The diff subsystem is responsible for:
//! 1. **Tokenising** content into words, sentences or paragraphs (via the
//!    injected [`TextExtractor`](crate::text::TextExtractor)).
//! 2. **Scoring** unit pairs with the Jaccard [`similarity`] matcher.
//! 3. **Aligning** units into a list of [`Change`]s, detecting moved and
//!    lightly modified units instead of reporting insert/delete pairs.

pub mod engine;
pub mod similarity;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use engine::DiffEngine;
pub use similarity::{similarity, similarity_matrix, similarity_with};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The unit size a diff operates at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Word,
    Sentence,
    Paragraph,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word => write!(f, "word"),
            Self::Sentence => write!(f, "sentence"),
            Self::Paragraph => write!(f, "paragraph"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "word" | "words" => Ok(Self::Word),
            "sentence" | "sentences" => Ok(Self::Sentence),
            "paragraph" | "paragraphs" => Ok(Self::Paragraph),
            other => Err(format!(
                "unknown granularity '{other}': use word, sentence or paragraph"
            )),
        }
    }
}

/// What happened to a unit between base and target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Unit only exists in the target.
    Insertion,
    /// Unit only exists in the base.
    Deletion,
    /// Same position, substantially rewritten text.
    Replacement,
    /// Unit found at a different position (possibly lightly edited).
    Moved,
    /// Same position, lightly edited text.
    Modification,
    /// Same position, identical text. Never reported by [`DiffEngine::diff`].
    Unchanged,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insertion => write!(f, "insertion"),
            Self::Deletion => write!(f, "deletion"),
            Self::Replacement => write!(f, "replacement"),
            Self::Moved => write!(f, "moved"),
            Self::Modification => write!(f, "modification"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A single difference between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub id: String,
    pub kind: ChangeKind,
    pub granularity: Granularity,
    pub left_unit: Option<String>,
    pub right_unit: Option<String>,
    /// Unit index in the base, serialised as `-1` when absent.
    #[serde(with = "signed_index")]
    pub left_index: Option<usize>,
    /// Unit index in the target, serialised as `-1` when absent.
    #[serde(with = "signed_index")]
    pub right_index: Option<usize>,
    /// Normalised 0-100 location, for minimap placement.
    pub position: f64,
    /// Present for moved, modification and replacement changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Count the changes of one kind.
pub fn count_kind(changes: &[Change], kind: ChangeKind) -> usize {
    changes.iter().filter(|c| c.kind == kind).count()
}

mod signed_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(index) => serializer.serialize_i64(*index as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(usize::try_from(raw).ok())
    }
}
