//! Named rule lists.

use serde::{Deserialize, Serialize};

use crate::merge::rules::{MergeRule, RuleAction, RuleCondition};
use crate::merge::{ChangeType, Impact};

pub const MANUAL: &str = "manual";
pub const CONSERVATIVE: &str = "conservative";
pub const BALANCED: &str = "balanced";
pub const AGGRESSIVE: &str = "aggressive";

/// An ordered list of merge rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<MergeRule>,
}

/// The four built-in presets, least to most permissive.
pub fn builtin() -> Vec<Preset> {
    vec![manual(), conservative(), balanced(), aggressive()]
}

/// Find a preset by name. `custom` presets shadow built-ins of the same name.
pub fn resolve(name: &str, custom: &[Preset]) -> Option<Preset> {
    custom
        .iter()
        .find(|p| p.name == name)
        .cloned()
        .or_else(|| builtin().into_iter().find(|p| p.name == name))
}

fn types(types: &[ChangeType]) -> RuleCondition {
    RuleCondition {
        types: types.to_vec(),
        ..RuleCondition::default()
    }
}

fn flag_critical() -> MergeRule {
    MergeRule::new(
        "flag critical changes",
        RuleCondition {
            impacts: vec![Impact::Critical],
            ..RuleCondition::default()
        },
        RuleAction::Flag,
    )
}

fn manual() -> Preset {
    Preset {
        name: MANUAL.into(),
        description: "Every change waits for review".into(),
        rules: Vec::new(),
    }
}

fn conservative() -> Preset {
    Preset {
        name: CONSERVATIVE.into(),
        description: "Accept uncontested punctuation and spelling fixes only".into(),
        rules: vec![
            flag_critical(),
            MergeRule::new(
                "uncontested mechanical fixes",
                RuleCondition {
                    max_alternatives: Some(1),
                    ..types(&[ChangeType::Punctuation, ChangeType::Spelling])
                },
                RuleAction::AutoAccept(0),
            ),
        ],
    }
}

fn balanced() -> Preset {
    Preset {
        name: BALANCED.into(),
        description: "Accept mechanical fixes and light rewording, flag critical changes".into(),
        rules: vec![
            flag_critical(),
            MergeRule::new(
                "mechanical fixes",
                types(&[ChangeType::Punctuation, ChangeType::Spelling, ChangeType::Grammar]),
                RuleAction::AutoAccept(0),
            ),
            MergeRule::new(
                "light rewording",
                RuleCondition {
                    impacts: vec![Impact::Normal],
                    ..types(&[ChangeType::WordChoice, ChangeType::Modification])
                },
                RuleAction::AutoAccept(0),
            ),
        ],
    }
}

fn aggressive() -> Preset {
    Preset {
        name: AGGRESSIVE.into(),
        description: "Accept the first alternative of everything except critical changes".into(),
        rules: vec![
            flag_critical(),
            MergeRule::new("accept the rest", RuleCondition::default(), RuleAction::AutoAccept(0)),
        ],
    }
}
