//! Merge classification, rule evaluation and application.
//!
//! The merge subsystem is responsible for:
//! 1. **Classification** -- turning raw [`Change`]s into typed, impact-rated
//!    [`ClassifiedChange`]s.
//! 2. **Rules** -- auto-accepting, flagging or rejecting changes through
//!    ordered rule lists grouped into [`Preset`]s.
//! 3. **Application** -- folding accepted alternatives back into the base
//!    content.

pub mod classifier;
pub mod engine;
pub mod presets;
pub mod rules;

use serde::{Deserialize, Serialize};

use crate::diff::{Change, ChangeKind};

pub use classifier::Classifier;
pub use engine::{MergeEngine, MergeOutcome, MergeReview};
pub use presets::Preset;
pub use rules::{apply_rules, MergeRule, RuleAction, RuleCondition};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Editorial category of a change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    Grammar,
    Punctuation,
    Spelling,
    WordChoice,
    Tone,
    Structure,
    Addition,
    Deletion,
    Modification,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grammar => write!(f, "grammar"),
            Self::Punctuation => write!(f, "punctuation"),
            Self::Spelling => write!(f, "spelling"),
            Self::WordChoice => write!(f, "word-choice"),
            Self::Tone => write!(f, "tone"),
            Self::Structure => write!(f, "structure"),
            Self::Addition => write!(f, "addition"),
            Self::Deletion => write!(f, "deletion"),
            Self::Modification => write!(f, "modification"),
        }
    }
}

/// How much attention a change deserves during review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Normal,
    Important,
    Critical,
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Important => write!(f, "important"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Review lifecycle of a classified change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    Pending,
    Accepted,
    AutoHandled,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::AutoHandled => write!(f, "auto-handled"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One candidate text for a change location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alternative {
    /// Version the text came from, or `manual-<n>` for reviewer input.
    pub version_id: String,
    /// Plain text, empty for a deletion.
    pub text: String,
    /// Raw content spliced into the document when selected.
    pub markup: String,
    pub is_manual: bool,
}

/// Where in the base document a change applies. Indices are base paragraph
/// indices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Location {
    /// Replace or delete the paragraph at `index`.
    Paragraph { index: usize },
    /// Insert before the paragraph at `index` (`index == len` appends).
    /// `ordinal` orders several insertions at the same anchor.
    Before { index: usize, ordinal: usize },
    /// Remove the paragraph at `from` and insert it before `to`. `ordinal`
    /// shares the sequence of insertions at the same anchor.
    Move { from: usize, to: usize, ordinal: usize },
}

impl Location {
    /// Best-effort location for a change that has not been anchored by the
    /// merge engine.
    pub fn from_change(change: &Change) -> Self {
        let left = change.left_index.unwrap_or(0);
        let right = change.right_index.unwrap_or(left);
        match change.kind {
            ChangeKind::Insertion => Self::Before { index: right, ordinal: 0 },
            ChangeKind::Moved => Self::Move {
                from: left,
                to: right,
                ordinal: 0,
            },
            _ => Self::Paragraph { index: left },
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paragraph { index } => write!(f, "¶{index}"),
            Self::Before { index, ordinal } => write!(f, "before ¶{index} (#{ordinal})"),
            Self::Move { from, to, .. } => write!(f, "¶{from} → before ¶{to}"),
        }
    }
}

/// A change with editorial type, impact, alternatives and review state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedChange {
    #[serde(flatten)]
    pub change: Change,
    pub change_type: ChangeType,
    pub impact: Impact,
    pub alternatives: Vec<Alternative>,
    pub status: ReviewStatus,
    pub rule_applied: Option<String>,
    pub selected_alternative_id: Option<String>,
    pub location: Location,
    #[serde(default)]
    pub flagged: bool,
}

impl ClassifiedChange {
    pub fn id(&self) -> &str {
        &self.change.id
    }

    /// The alternative chosen by a reviewer or rule, if any.
    pub fn selected_alternative(&self) -> Option<&Alternative> {
        let selected = self.selected_alternative_id.as_deref()?;
        self.alternatives.iter().find(|a| a.version_id == selected)
    }

    /// Largest word count on either side of the change.
    pub fn word_count(&self) -> usize {
        let count = |unit: &Option<String>| unit.as_deref().map_or(0, |u| u.split_whitespace().count());
        count(&self.change.left_unit).max(count(&self.change.right_unit))
    }

    /// Whether the change contributes to merged output.
    pub fn is_applied(&self) -> bool {
        matches!(self.status, ReviewStatus::Accepted | ReviewStatus::AutoHandled)
    }
}

/// Counters over a classified change set.
///
/// Impact buckets only count changes that were not auto-handled, so
/// `total == critical + important + normal + auto_handled`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeStats {
    pub total: usize,
    pub critical: usize,
    pub important: usize,
    pub normal: usize,
    pub auto_handled: usize,
    pub reviewed: usize,
}

impl MergeStats {
    pub fn from_changes(changes: &[ClassifiedChange]) -> Self {
        let mut stats = Self {
            total: changes.len(),
            ..Self::default()
        };
        for change in changes {
            match change.status {
                ReviewStatus::AutoHandled => stats.auto_handled += 1,
                _ => match change.impact {
                    Impact::Critical => stats.critical += 1,
                    Impact::Important => stats.important += 1,
                    Impact::Normal => stats.normal += 1,
                },
            }
            if change.status == ReviewStatus::Accepted {
                stats.reviewed += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Granularity;

    fn classified(status: ReviewStatus, impact: Impact) -> ClassifiedChange {
        ClassifiedChange {
            change: Change {
                id: "change-0".into(),
                kind: ChangeKind::Replacement,
                granularity: Granularity::Paragraph,
                left_unit: Some("old words here".into()),
                right_unit: Some("new".into()),
                left_index: Some(0),
                right_index: Some(0),
                position: 0.0,
                similarity: Some(0.1),
            },
            change_type: ChangeType::Modification,
            impact,
            alternatives: vec![],
            status,
            rule_applied: None,
            selected_alternative_id: None,
            location: Location::Paragraph { index: 0 },
            flagged: false,
        }
    }

    #[test]
    fn test_stats_conserve_total() {
        let changes = vec![
            classified(ReviewStatus::Pending, Impact::Critical),
            classified(ReviewStatus::AutoHandled, Impact::Normal),
            classified(ReviewStatus::Accepted, Impact::Important),
            classified(ReviewStatus::Rejected, Impact::Normal),
        ];
        let stats = MergeStats::from_changes(&changes);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.important, 1);
        assert_eq!(stats.normal, 1);
        assert_eq!(stats.auto_handled, 1);
        assert_eq!(stats.reviewed, 1);
        assert_eq!(
            stats.total,
            stats.critical + stats.important + stats.normal + stats.auto_handled
        );
    }

    #[test]
    fn test_change_type_serde_names() {
        assert_eq!(serde_json::to_value(ChangeType::WordChoice).unwrap(), "word-choice");
        assert_eq!(serde_json::to_value(ReviewStatus::AutoHandled).unwrap(), "auto-handled");
        let parsed: ChangeType = serde_json::from_str("\"punctuation\"").unwrap();
        assert_eq!(parsed, ChangeType::Punctuation);
    }

    #[test]
    fn test_word_count_uses_larger_side() {
        assert_eq!(classified(ReviewStatus::Pending, Impact::Normal).word_count(), 3);
    }

    #[test]
    fn test_location_from_change() {
        let mut change = classified(ReviewStatus::Pending, Impact::Normal).change;
        assert_eq!(Location::from_change(&change), Location::Paragraph { index: 0 });
        change.kind = ChangeKind::Insertion;
        change.left_index = None;
        change.right_index = Some(3);
        assert_eq!(Location::from_change(&change), Location::Before { index: 3, ordinal: 0 });
    }
}
