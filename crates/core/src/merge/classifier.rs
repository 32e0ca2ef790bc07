//! Change classification.
//!
//! Assigns an editorial [`ChangeType`] and an [`Impact`] to each raw change
//! from lexical signals only: punctuation and case differences, edit
//! distance, function words, tone markers and length.

use std::collections::HashSet;

use tracing::debug;

use crate::config::MergeConfig;
use crate::diff::similarity::{normalize_word, word_set};
use crate::diff::{Change, ChangeKind};
use crate::merge::{Alternative, ChangeType, ClassifiedChange, Impact, Location, ReviewStatus};
use crate::text::split_sentences;

/// Words whose substitution is treated as a grammar fix.
const FUNCTION_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "am", "has", "have",
    "had", "do", "does", "did", "of", "to", "in", "on", "at", "for", "with", "by", "from", "and",
    "or", "but", "that", "which", "who", "whom", "this", "these", "those", "it", "its", "their",
    "there", "they", "them", "he", "she", "his", "her", "we", "our", "us", "i", "me", "my",
    "you", "your", "will", "would", "shall", "should", "can", "could", "may", "might", "must",
    "not", "no", "as", "than", "then", "if", "so",
];

/// Intensifiers, hedges and politeness markers.
const TONE_MARKERS: &[&str] = &[
    "very", "really", "extremely", "absolutely", "definitely", "certainly", "incredibly",
    "totally", "quite", "rather", "somewhat", "perhaps", "maybe", "possibly", "probably",
    "please", "kindly", "unfortunately", "fortunately", "honestly", "frankly", "simply", "just",
    "truly", "highly", "super", "amazing", "awesome", "terrible",
];

/// Assigns [`ChangeType`] and [`Impact`] to changes.
#[derive(Debug, Clone)]
pub struct Classifier {
    early_section_percent: f64,
    critical_word_count: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&MergeConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            early_section_percent: config.early_section_percent,
            critical_word_count: config.critical_word_count,
        }
    }

    /// Classify `change` as proposed by `source_version_id`. The result is
    /// pending with a single alternative holding the change's target text.
    pub fn classify(&self, change: &Change, source_version_id: &str) -> ClassifiedChange {
        let change_type = self.change_type(change);
        let impact = self.impact(change, change_type);
        let text = change.right_unit.clone().unwrap_or_default();
        debug!(
            change_id = %change.id,
            kind = %change.kind,
            %change_type,
            %impact,
            "classified change"
        );
        ClassifiedChange {
            change: change.clone(),
            change_type,
            impact,
            alternatives: vec![Alternative {
                version_id: source_version_id.to_string(),
                markup: text.clone(),
                text,
                is_manual: false,
            }],
            status: ReviewStatus::Pending,
            rule_applied: None,
            selected_alternative_id: None,
            location: Location::from_change(change),
            flagged: false,
        }
    }

    pub fn change_type(&self, change: &Change) -> ChangeType {
        match change.kind {
            ChangeKind::Insertion => ChangeType::Addition,
            ChangeKind::Deletion => ChangeType::Deletion,
            ChangeKind::Moved => ChangeType::Structure,
            ChangeKind::Replacement | ChangeKind::Modification | ChangeKind::Unchanged => {
                edit_type(
                    change.left_unit.as_deref().unwrap_or(""),
                    change.right_unit.as_deref().unwrap_or(""),
                )
            }
        }
    }

    pub fn impact(&self, change: &Change, change_type: ChangeType) -> Impact {
        let early = change.position < self.early_section_percent;
        let similarity = change.similarity.unwrap_or(0.0);
        match change_type {
            ChangeType::Punctuation | ChangeType::Spelling | ChangeType::Grammar => Impact::Normal,
            ChangeType::WordChoice | ChangeType::Modification => {
                if similarity < 0.5 {
                    Impact::Important
                } else {
                    Impact::Normal
                }
            }
            ChangeType::Tone => Impact::Important,
            ChangeType::Structure => {
                if early {
                    Impact::Critical
                } else {
                    Impact::Important
                }
            }
            ChangeType::Addition | ChangeType::Deletion => {
                let unit = change
                    .right_unit
                    .as_deref()
                    .or(change.left_unit.as_deref())
                    .unwrap_or("");
                if early || unit.split_whitespace().count() >= self.critical_word_count {
                    Impact::Critical
                } else {
                    Impact::Important
                }
            }
        }
    }
}

/// Type of an in-place edit from `left` to `right`.
fn edit_type(left: &str, right: &str) -> ChangeType {
    let left_words: Vec<String> = words(left);
    let right_words: Vec<String> = words(right);

    if left_words == right_words {
        let case_only = left != right && left.to_lowercase() == right.to_lowercase();
        return if case_only {
            ChangeType::Grammar
        } else {
            ChangeType::Punctuation
        };
    }

    if split_sentences(left).len() != split_sentences(right).len() {
        return ChangeType::Structure;
    }
    let (shorter, longer) = {
        let (a, b) = (left_words.len(), right_words.len());
        (a.min(b), a.max(b))
    };
    if longer >= 8 && (shorter == 0 || longer >= shorter * 2) {
        return ChangeType::Structure;
    }

    let same_length = left_words.len() == right_words.len();
    let substitutions: Vec<(&String, &String)> = left_words
        .iter()
        .zip(right_words.iter())
        .filter(|(l, r)| l != r)
        .collect();
    if same_length && substitutions.len() == 1 {
        let (l, r) = substitutions[0];
        if levenshtein(l, r) <= 2 && !is_function_word(l) && !is_function_word(r) {
            return ChangeType::Spelling;
        }
    }

    let left_set = word_set(left, true);
    let right_set = word_set(right, true);
    let changed: HashSet<&String> = left_set.symmetric_difference(&right_set).collect();
    if !changed.is_empty() && changed.iter().all(|w| is_function_word(w)) {
        return ChangeType::Grammar;
    }

    let exclamations = |s: &str| s.matches('!').count();
    if changed.iter().any(|w| TONE_MARKERS.contains(&w.as_str()))
        || exclamations(left) != exclamations(right)
    {
        return ChangeType::Tone;
    }

    if same_length && substitutions.len() <= 2 {
        return ChangeType::WordChoice;
    }

    ChangeType::Modification
}

fn words(unit: &str) -> Vec<String> {
    unit.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

fn is_function_word(word: &str) -> bool {
    FUNCTION_WORDS.contains(&word)
}

/// Character-level edit distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
