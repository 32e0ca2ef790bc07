//! Declarative merge rules.
//!
//! A [`MergeRule`] pairs a [`RuleCondition`] with a [`RuleAction`]. Rules are
//! evaluated in order against each pending change and the first match fires.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diff::ChangeKind;
use crate::merge::{ChangeType, ClassifiedChange, Impact, ReviewStatus};

/// Predicate over a classified change. Every field that is set must hold;
/// an empty condition matches every change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleCondition {
    pub types: Vec<ChangeType>,
    pub impacts: Vec<Impact>,
    pub kinds: Vec<ChangeKind>,
    /// Changes without a similarity score never match a similarity bound.
    pub min_similarity: Option<f64>,
    pub max_similarity: Option<f64>,
    pub max_words: Option<usize>,
    pub min_alternatives: Option<usize>,
    pub max_alternatives: Option<usize>,
}

impl RuleCondition {
    pub fn matches(&self, change: &ClassifiedChange) -> bool {
        if !self.types.is_empty() && !self.types.contains(&change.change_type) {
            return false;
        }
        if !self.impacts.is_empty() && !self.impacts.contains(&change.impact) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&change.change.kind) {
            return false;
        }
        if let Some(min) = self.min_similarity {
            if !change.change.similarity.is_some_and(|s| s >= min) {
                return false;
            }
        }
        if let Some(max) = self.max_similarity {
            if !change.change.similarity.is_some_and(|s| s <= max) {
                return false;
            }
        }
        if self.max_words.is_some_and(|max| change.word_count() > max) {
            return false;
        }
        let alternatives = change.alternatives.len();
        if self.min_alternatives.is_some_and(|min| alternatives < min) {
            return false;
        }
        if self.max_alternatives.is_some_and(|max| alternatives > max) {
            return false;
        }
        true
    }
}

/// What a matching rule does.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Select the alternative at this index and mark the change auto-handled.
    AutoAccept(usize),
    /// Keep the change pending and highlight it for review.
    Flag,
    Reject,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoAccept(k) => write!(f, "auto_accept({k})"),
            Self::Flag => write!(f, "flag"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeRule {
    pub name: String,
    #[serde(default)]
    pub condition: RuleCondition,
    pub action: RuleAction,
}

impl MergeRule {
    pub fn new(name: impl Into<String>, condition: RuleCondition, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            condition,
            action,
        }
    }
}

/// Evaluate `rules` against every pending change. Returns the number of
/// rules that fired.
///
/// An `AutoAccept` pointing past the last alternative is logged and leaves
/// the change pending.
pub fn apply_rules(changes: &mut [ClassifiedChange], rules: &[MergeRule]) -> usize {
    let mut fired = 0;
    for change in changes.iter_mut() {
        if change.status != ReviewStatus::Pending {
            continue;
        }
        let Some(rule) = rules.iter().find(|r| r.condition.matches(change)) else {
            continue;
        };

        match rule.action {
            RuleAction::AutoAccept(k) => {
                let Some(alternative) = change.alternatives.get(k) else {
                    warn!(
                        change_id = %change.change.id,
                        rule = %rule.name,
                        index = k,
                        available = change.alternatives.len(),
                        "auto-accept index out of range, leaving change pending"
                    );
                    continue;
                };
                change.selected_alternative_id = Some(alternative.version_id.clone());
                change.status = ReviewStatus::AutoHandled;
            }
            RuleAction::Flag => change.flagged = true,
            RuleAction::Reject => {
                change.status = ReviewStatus::Rejected;
                change.selected_alternative_id = None;
            }
        }
        change.rule_applied = Some(rule.name.clone());
        fired += 1;
        debug!(change_id = %change.change.id, rule = %rule.name, action = %rule.action, "rule fired");
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Change, Granularity};
    use crate::merge::{Alternative, Location};

    fn change(change_type: ChangeType, impact: Impact, similarity: Option<f64>) -> ClassifiedChange {
        ClassifiedChange {
            change: Change {
                id: "change-0".into(),
                kind: ChangeKind::Modification,
                granularity: Granularity::Paragraph,
                left_unit: Some("Hello world".into()),
                right_unit: Some("Hello, world".into()),
                left_index: Some(0),
                right_index: Some(0),
                position: 50.0,
                similarity,
            },
            change_type,
            impact,
            alternatives: vec![Alternative {
                version_id: "v-2".into(),
                text: "Hello, world".into(),
                markup: "Hello, world".into(),
                is_manual: false,
            }],
            status: ReviewStatus::Pending,
            rule_applied: None,
            selected_alternative_id: None,
            location: Location::Paragraph { index: 0 },
            flagged: false,
        }
    }

    fn by_type(name: &str, types: Vec<ChangeType>, action: RuleAction) -> MergeRule {
        MergeRule::new(
            name,
            RuleCondition {
                types,
                ..RuleCondition::default()
            },
            action,
        )
    }

    #[test]
    fn test_empty_condition_matches_all() {
        let c = change(ChangeType::Tone, Impact::Important, None);
        assert!(RuleCondition::default().matches(&c));
    }

    #[test]
    fn test_similarity_bounds_need_a_score() {
        let condition = RuleCondition {
            min_similarity: Some(0.5),
            ..RuleCondition::default()
        };
        assert!(!condition.matches(&change(ChangeType::Addition, Impact::Normal, None)));
        assert!(condition.matches(&change(ChangeType::Punctuation, Impact::Normal, Some(0.9))));
        assert!(!condition.matches(&change(ChangeType::Punctuation, Impact::Normal, Some(0.2))));
    }

    #[test]
    fn test_alternative_and_word_bounds() {
        let c = change(ChangeType::Punctuation, Impact::Normal, Some(1.0));
        let too_many = RuleCondition {
            min_alternatives: Some(2),
            ..RuleCondition::default()
        };
        assert!(!too_many.matches(&c));
        let short = RuleCondition {
            max_words: Some(1),
            ..RuleCondition::default()
        };
        assert!(!short.matches(&c));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mut changes = vec![change(ChangeType::Punctuation, Impact::Normal, Some(1.0))];
        let rules = vec![
            by_type("punctuation", vec![ChangeType::Punctuation], RuleAction::AutoAccept(0)),
            by_type("catch-all", vec![], RuleAction::Reject),
        ];
        assert_eq!(apply_rules(&mut changes, &rules), 1);
        assert_eq!(changes[0].status, ReviewStatus::AutoHandled);
        assert_eq!(changes[0].selected_alternative_id.as_deref(), Some("v-2"));
        assert_eq!(changes[0].rule_applied.as_deref(), Some("punctuation"));
    }

    #[test]
    fn test_only_pending_changes_are_evaluated() {
        let mut changes = vec![change(ChangeType::Punctuation, Impact::Normal, Some(1.0))];
        changes[0].status = ReviewStatus::Accepted;
        let rules = vec![by_type("reject", vec![], RuleAction::Reject)];
        assert_eq!(apply_rules(&mut changes, &rules), 0);
        assert_eq!(changes[0].status, ReviewStatus::Accepted);
        assert!(changes[0].rule_applied.is_none());
    }

    #[test]
    fn test_flag_keeps_pending() {
        let mut changes = vec![change(ChangeType::Tone, Impact::Important, Some(0.8))];
        apply_rules(&mut changes, &[by_type("tone", vec![ChangeType::Tone], RuleAction::Flag)]);
        assert_eq!(changes[0].status, ReviewStatus::Pending);
        assert!(changes[0].flagged);
        assert_eq!(changes[0].rule_applied.as_deref(), Some("tone"));
    }

    #[test]
    fn test_out_of_range_auto_accept_leaves_pending() {
        let mut changes = vec![change(ChangeType::Punctuation, Impact::Normal, Some(1.0))];
        let fired = apply_rules(&mut changes, &[by_type("second", vec![], RuleAction::AutoAccept(1))]);
        assert_eq!(fired, 0);
        assert_eq!(changes[0].status, ReviewStatus::Pending);
        assert!(changes[0].selected_alternative_id.is_none());
        assert!(changes[0].rule_applied.is_none());
    }

    #[test]
    fn test_rule_action_toml_shape() {
        #[derive(Deserialize)]
        struct Wrapper {
            rule: Vec<MergeRule>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
[[rule]]
name = "reject tiny"
action = "reject"
[rule.condition]
max_words = 2
kinds = ["deletion"]

[[rule]]
name = "take second"
action = { auto_accept = 1 }
"#,
        )
        .unwrap();
        assert_eq!(parsed.rule[0].action, RuleAction::Reject);
        assert_eq!(parsed.rule[0].condition.max_words, Some(2));
        assert_eq!(parsed.rule[0].condition.kinds, vec![ChangeKind::Deletion]);
        assert_eq!(parsed.rule[1].action, RuleAction::AutoAccept(1));
        assert_eq!(parsed.rule[1].condition, RuleCondition::default());
    }
}
