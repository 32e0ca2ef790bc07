//! Multi-version merge: grouping, rule evaluation, review and application.
//!
//! Each compare version is aligned against the base at paragraph
//! granularity. Changes that touch the same base location are folded into a
//! single [`ClassifiedChange`] carrying one [`Alternative`] per version, so
//! a reviewer (or a rule) picks between competing rewrites of the same
//! paragraph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::diff::{ChangeKind, DiffEngine, Granularity};
use crate::errors::MergeError;
use crate::merge::classifier::Classifier;
use crate::merge::presets::Preset;
use crate::merge::rules::{apply_rules, MergeRule};
use crate::merge::{Alternative, ClassifiedChange, Location, MergeStats, ReviewStatus};
use crate::models::VersionNode;
use crate::text::{self, Paragraph};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of [`MergeEngine::classify_and_merge`], mutated during review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeReview {
    pub base_version_id: String,
    pub preset: String,
    pub classified_changes: Vec<ClassifiedChange>,
    pub stats: MergeStats,
}

/// A change that could not be applied to the base content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedChange {
    pub change_id: String,
    pub reason: String,
}

/// Result of folding changes into base content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeOutcome {
    pub content: String,
    /// Ids of the changes that were applied.
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Keep,
    Replace(String),
    Remove,
}

#[derive(Debug)]
struct Insert {
    before: usize,
    ordinal: usize,
    markup: String,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Classifies, groups and applies changes across versions.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    diff: DiffEngine,
    classifier: Classifier,
}

impl MergeEngine {
    pub fn new(diff: DiffEngine, config: &MergeConfig) -> Self {
        Self {
            diff,
            classifier: Classifier::new(config),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Align every compare version against `base`, group the changes by base
    /// location and evaluate `custom_rules` followed by the preset's rules.
    pub fn classify_and_merge(
        &self,
        base: &VersionNode,
        compare: &[&VersionNode],
        preset: &Preset,
        custom_rules: &[MergeRule],
    ) -> Result<MergeReview, MergeError> {
        if compare.is_empty() {
            return Err(MergeError::NoCompareVersions);
        }

        let extractor = self.diff.extractor();
        let base_units: Vec<String> = extractor
            .paragraphs(&base.content)
            .into_iter()
            .map(|p| p.text)
            .collect();

        let mut changes: Vec<ClassifiedChange> = Vec::new();
        let mut by_location: HashMap<Location, usize> = HashMap::new();

        for version in compare {
            let paragraphs = extractor.paragraphs(&version.content);
            let units: Vec<String> = paragraphs.iter().map(|p| p.text.clone()).collect();
            let alignment = self
                .diff
                .align_units(&base_units, &units, Granularity::Paragraph);

            // Moved units are excluded: their base index says where they
            // came from, not where their neighbours end up.
            let mut target_to_base: Vec<Option<usize>> = vec![None; units.len()];
            for change in alignment.iter().filter(|c| c.kind != ChangeKind::Moved) {
                if let (Some(i), Some(j)) = (change.left_index, change.right_index) {
                    target_to_base[j] = Some(i);
                }
            }
            // Base index of the first in-place unit after target index `j`.
            let anchor = |j: usize| {
                target_to_base
                    .iter()
                    .skip(j + 1)
                    .flatten()
                    .next()
                    .copied()
                    .unwrap_or(base_units.len())
            };

            // Insertions and moves landing at the same anchor share one
            // ordinal sequence, in target order.
            let mut ordinals: HashMap<usize, usize> = HashMap::new();
            let mut next_ordinal = |index: usize| {
                let ordinal = ordinals.entry(index).or_insert(0);
                *ordinal += 1;
                *ordinal - 1
            };
            for change in alignment.iter().filter(|c| c.kind != ChangeKind::Unchanged) {
                let location = match (change.kind, change.left_index, change.right_index) {
                    (ChangeKind::Insertion, _, Some(j)) => {
                        let index = anchor(j);
                        Location::Before {
                            index,
                            ordinal: next_ordinal(index),
                        }
                    }
                    (ChangeKind::Moved, Some(from), Some(j)) => {
                        let to = anchor(j);
                        Location::Move {
                            from,
                            to,
                            ordinal: next_ordinal(to),
                        }
                    }
                    (_, Some(index), _) => Location::Paragraph { index },
                    _ => continue,
                };

                let alternative = alternative_for(version, &paragraphs, change.kind, change.right_index);
                match by_location.get(&location) {
                    Some(&idx) => {
                        let existing = &mut changes[idx].alternatives;
                        if !existing.iter().any(|a| a.version_id == version.id) {
                            existing.push(alternative);
                        }
                    }
                    None => {
                        let mut classified = self.classifier.classify(change, &version.id);
                        classified.location = location;
                        classified.alternatives = vec![alternative];
                        by_location.insert(location, changes.len());
                        changes.push(classified);
                    }
                }
            }
        }

        changes.sort_by(|a, b| a.change.position.total_cmp(&b.change.position));
        for (n, change) in changes.iter_mut().enumerate() {
            change.change.id = format!("change-{n}");
        }

        let rules: Vec<MergeRule> = custom_rules.iter().chain(preset.rules.iter()).cloned().collect();
        let fired = apply_rules(&mut changes, &rules);
        let stats = MergeStats::from_changes(&changes);

        info!(
            base_version_id = %base.id,
            compare_versions = compare.len(),
            preset = %preset.name,
            total = stats.total,
            auto_handled = stats.auto_handled,
            rules_fired = fired,
            "classified merge"
        );

        Ok(MergeReview {
            base_version_id: base.id.clone(),
            preset: preset.name.clone(),
            classified_changes: changes,
            stats,
        })
    }

    /// Apply every accepted or auto-handled change to `base_content`.
    ///
    /// Locations refer to the paragraphs of `base_content` as they were when
    /// the changes were classified; a location that no longer exists, or
    /// that an earlier change already consumed, is skipped. Pending and
    /// rejected changes are ignored.
    pub fn merge_into(&self, base_content: &str, changes: &[ClassifiedChange]) -> MergeOutcome {
        let paragraphs = self.diff.extractor().paragraphs(base_content);
        let count = paragraphs.len();
        let separator = text::paragraph_separator(base_content, &paragraphs);

        let mut slots = vec![Slot::Keep; count];
        let mut inserts: Vec<Insert> = Vec::new();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for change in changes.iter().filter(|c| c.is_applied()) {
            let id = change.id().to_string();
            let Some(alternative) = change.selected_alternative() else {
                skipped.push(skip(&id, "no alternative selected".into()));
                continue;
            };

            let result = match change.location {
                Location::Paragraph { index } if index >= count => {
                    Err(format!("paragraph {index} no longer exists ({count} paragraphs)"))
                }
                Location::Paragraph { index } if slots[index] != Slot::Keep => {
                    Err(format!("paragraph {index} already edited by another change"))
                }
                Location::Paragraph { index } => {
                    slots[index] = if alternative.markup.is_empty() {
                        Slot::Remove
                    } else {
                        Slot::Replace(alternative.markup.clone())
                    };
                    Ok(())
                }
                Location::Before { index, .. } if index > count => {
                    Err(format!("insertion point {index} no longer exists ({count} paragraphs)"))
                }
                Location::Before { index, ordinal } => {
                    if !alternative.markup.is_empty() {
                        inserts.push(Insert {
                            before: index,
                            ordinal,
                            markup: alternative.markup.clone(),
                        });
                    }
                    Ok(())
                }
                Location::Move { from, to, .. } if from >= count || to > count => {
                    Err(format!("move {from} -> {to} out of range ({count} paragraphs)"))
                }
                Location::Move { from, .. } if slots[from] != Slot::Keep => {
                    Err(format!("paragraph {from} already edited by another change"))
                }
                Location::Move { from, to, ordinal } => {
                    slots[from] = Slot::Remove;
                    inserts.push(Insert {
                        before: to,
                        ordinal,
                        markup: alternative.markup.clone(),
                    });
                    Ok(())
                }
            };

            match result {
                Ok(()) => applied.push(id),
                Err(reason) => skipped.push(skip(&id, reason)),
            }
        }

        inserts.sort_by_key(|i| (i.before, i.ordinal));
        let content = splice(base_content, &paragraphs, &slots, inserts, separator);
        debug!(applied = applied.len(), skipped = skipped.len(), "merged changes into content");

        MergeOutcome {
            content,
            applied,
            skipped,
        }
    }
}

fn alternative_for(
    version: &VersionNode,
    paragraphs: &[Paragraph],
    kind: ChangeKind,
    right_index: Option<usize>,
) -> Alternative {
    let paragraph = match kind {
        ChangeKind::Deletion => None,
        _ => right_index.and_then(|j| paragraphs.get(j)),
    };
    Alternative {
        version_id: version.id.clone(),
        text: paragraph.map(|p| p.text.clone()).unwrap_or_default(),
        markup: paragraph
            .map(|p| p.raw(&version.content).to_string())
            .unwrap_or_default(),
        is_manual: false,
    }
}

fn skip(change_id: &str, reason: String) -> SkippedChange {
    warn!(change_id, %reason, "skipping merge change");
    SkippedChange {
        change_id: change_id.to_string(),
        reason,
    }
}

/// Rebuild `content` from its paragraph spans, leaving the bytes between
/// untouched paragraphs as they were.
fn splice(
    content: &str,
    paragraphs: &[Paragraph],
    slots: &[Slot],
    inserts: Vec<Insert>,
    separator: &str,
) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    let mut inserts = inserts.into_iter().peekable();

    for (k, (paragraph, slot)) in paragraphs.iter().zip(slots).enumerate() {
        out.push_str(content.get(cursor..paragraph.span.start).unwrap_or(""));
        while let Some(insert) = inserts.next_if(|i| i.before == k) {
            out.push_str(&insert.markup);
            out.push_str(separator);
        }
        cursor = paragraph.span.end;
        match slot {
            Slot::Keep => out.push_str(paragraph.raw(content)),
            Slot::Replace(markup) => out.push_str(markup),
            Slot::Remove => {
                let rest = content.get(cursor..).unwrap_or("");
                if rest.starts_with("\r\n") {
                    cursor += 2;
                } else if rest.starts_with('\n') {
                    cursor += 1;
                } else if out.ends_with('\n') {
                    out.pop();
                }
            }
        }
    }

    out.push_str(content.get(cursor..).unwrap_or(""));
    for insert in inserts {
        if !separator.is_empty() && !out.is_empty() && !out.ends_with(separator) {
            out.push_str(separator);
        }
        out.push_str(&insert.markup);
    }
    out
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

impl MergeReview {
    pub fn get(&self, change_id: &str) -> Option<&ClassifiedChange> {
        self.classified_changes.iter().find(|c| c.id() == change_id)
    }

    fn change_mut(&mut self, change_id: &str) -> Result<&mut ClassifiedChange, MergeError> {
        self.classified_changes
            .iter_mut()
            .find(|c| c.id() == change_id)
            .ok_or_else(|| MergeError::ChangeNotFound(change_id.to_string()))
    }

    /// Accept `alternative_id` for a change.
    pub fn accept(&mut self, change_id: &str, alternative_id: &str) -> Result<(), MergeError> {
        let change = self.change_mut(change_id)?;
        if !change.alternatives.iter().any(|a| a.version_id == alternative_id) {
            return Err(MergeError::AlternativeNotFound {
                change_id: change_id.to_string(),
                alternative_id: alternative_id.to_string(),
            });
        }
        change.status = ReviewStatus::Accepted;
        change.selected_alternative_id = Some(alternative_id.to_string());
        change.flagged = false;
        info!(change_id, alternative_id, "change accepted");
        self.refresh_stats();
        Ok(())
    }

    pub fn reject(&mut self, change_id: &str) -> Result<(), MergeError> {
        let change = self.change_mut(change_id)?;
        change.status = ReviewStatus::Rejected;
        change.selected_alternative_id = None;
        info!(change_id, "change rejected");
        self.refresh_stats();
        Ok(())
    }

    /// Return a change to pending, clearing any rule or reviewer decision.
    pub fn reset(&mut self, change_id: &str) -> Result<(), MergeError> {
        let change = self.change_mut(change_id)?;
        change.status = ReviewStatus::Pending;
        change.selected_alternative_id = None;
        change.rule_applied = None;
        change.flagged = false;
        debug!(change_id, "change reset");
        self.refresh_stats();
        Ok(())
    }

    /// Add reviewer-written text as a new alternative. Returns its id.
    pub fn add_manual_alternative(&mut self, change_id: &str, text: &str) -> Result<String, MergeError> {
        let change = self.change_mut(change_id)?;
        let n = change.alternatives.iter().filter(|a| a.is_manual).count() + 1;
        let id = format!("manual-{n}");
        change.alternatives.push(Alternative {
            version_id: id.clone(),
            text: text.to_string(),
            markup: text.to_string(),
            is_manual: true,
        });
        debug!(change_id, alternative_id = %id, "manual alternative added");
        Ok(id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &ClassifiedChange> {
        self.classified_changes
            .iter()
            .filter(|c| c.status == ReviewStatus::Pending)
    }

    fn refresh_stats(&mut self) {
        self.stats = MergeStats::from_changes(&self.classified_changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::presets::{self, AGGRESSIVE, BALANCED, MANUAL};
    use crate::merge::rules::{RuleAction, RuleCondition};
    use crate::merge::{ChangeType, Impact};
    use chrono::Utc;

    fn node(id: &str, content: &str) -> VersionNode {
        VersionNode {
            id: id.into(),
            number: "1".into(),
            parent_id: None,
            content: content.into(),
            prompt: None,
            note: String::new(),
            timestamp: Utc::now(),
            is_original: false,
            is_starred: false,
            is_archived: false,
            checkpoints: Vec::new(),
        }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(DiffEngine::default(), &MergeConfig::default())
    }

    fn preset(name: &str) -> Preset {
        presets::resolve(name, &[]).unwrap()
    }

    #[test]
    fn test_balanced_auto_handles_light_edit() {
        let base = node("base", "<p>Intro</p><p>Body text.</p>");
        let edit = node("v-1", "<p>Intro changed</p><p>Body text.</p><p>Conclusion.</p>");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(BALANCED), &[])
            .unwrap();

        assert_eq!(review.classified_changes.len(), 2);
        let intro = &review.classified_changes[0];
        assert_eq!(intro.change.kind, ChangeKind::Replacement);
        assert_eq!(intro.change.similarity, Some(0.5));
        assert_eq!(intro.status, ReviewStatus::AutoHandled);
        assert_eq!(intro.rule_applied.as_deref(), Some("light rewording"));
        assert_eq!(intro.location, Location::Paragraph { index: 0 });

        let conclusion = &review.classified_changes[1];
        assert_eq!(conclusion.change_type, ChangeType::Addition);
        assert_eq!(conclusion.status, ReviewStatus::Pending);
        assert_eq!(conclusion.location, Location::Before { index: 2, ordinal: 0 });

        assert_eq!(review.stats.total, 2);
        assert_eq!(review.stats.auto_handled, 1);
        assert_eq!(review.stats.important, 1);

        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, "<p>Intro changed</p><p>Body text.</p>");
        assert!(merged.skipped.is_empty());

        let conclusion_id = review.classified_changes[1].id().to_string();
        review.accept(&conclusion_id, "v-1").unwrap();
        assert_eq!(review.stats.reviewed, 1);
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(
            merged.content,
            "<p>Intro changed</p><p>Body text.</p><p>Conclusion.</p>"
        );
        assert_eq!(merged.applied.len(), 2);
    }

    #[test]
    fn test_competing_versions_group_into_alternatives() {
        let base = node("base", "The opening paragraph stays put.\nSecond paragraph text here.");
        let a = node("v-a", "The opening paragraph stays put.\nSecond paragraph text over here.");
        let b = node("v-b", "The opening paragraph stays put.\nSecond paragraph prose here.");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&a, &b], &preset(MANUAL), &[])
            .unwrap();

        assert_eq!(review.classified_changes.len(), 1);
        let change = &review.classified_changes[0];
        let ids: Vec<_> = change.alternatives.iter().map(|a| a.version_id.as_str()).collect();
        assert_eq!(ids, vec!["v-a", "v-b"]);

        review.accept("change-0", "v-b").unwrap();
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(
            merged.content,
            "The opening paragraph stays put.\nSecond paragraph prose here."
        );
    }

    #[test]
    fn test_accepted_deletion_removes_line() {
        let base = node("base", "Alpha line.\nBravo line.\nCharlie line.");
        let edit = node("v-1", "Alpha line.\nCharlie line.");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(MANUAL), &[])
            .unwrap();
        assert_eq!(review.classified_changes.len(), 1);
        assert_eq!(review.classified_changes[0].change_type, ChangeType::Deletion);

        review.accept("change-0", "v-1").unwrap();
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, "Alpha line.\nCharlie line.");
    }

    #[test]
    fn test_moves_applied_against_base_indices() {
        let base = node("base", "Xray one.\nYankee two.\nZulu three.");
        let edit = node("v-1", "Yankee two.\nXray one.\nZulu three.");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(AGGRESSIVE), &[])
            .unwrap();

        assert_eq!(review.classified_changes.len(), 2);
        assert!(review
            .classified_changes
            .iter()
            .all(|c| c.change_type == ChangeType::Structure));

        // Yankee lands at the top of the document: critical, flagged.
        let yankee = &review.classified_changes[0];
        assert_eq!(
            yankee.location,
            Location::Move {
                from: 1,
                to: 2,
                ordinal: 0
            }
        );
        assert_eq!(yankee.impact, Impact::Critical);
        assert!(yankee.flagged);
        assert_eq!(yankee.status, ReviewStatus::Pending);

        let xray = &review.classified_changes[1];
        assert_eq!(
            xray.location,
            Location::Move {
                from: 0,
                to: 2,
                ordinal: 1
            }
        );
        assert_eq!(xray.impact, Impact::Important);
        assert_eq!(xray.status, ReviewStatus::AutoHandled);

        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, "Yankee two.\nXray one.\nZulu three.");

        review.accept("change-0", "v-1").unwrap();
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, "Yankee two.\nXray one.\nZulu three.");
        assert!(merged.skipped.is_empty());
    }

    #[test]
    fn test_accept_all_reproduces_moves_and_insertions() {
        let base = node("base", "Alpha one here.\nBravo two here.\nCharlie three here.");
        let edit = node(
            "v-1",
            "Brand new opening line.\nBravo two here.\nAlpha one here.\nCharlie three here.",
        );
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(MANUAL), &[])
            .unwrap();

        let locations: Vec<Location> = review.classified_changes.iter().map(|c| c.location).collect();
        assert_eq!(
            locations,
            vec![
                Location::Before { index: 2, ordinal: 0 },
                Location::Move {
                    from: 1,
                    to: 2,
                    ordinal: 1
                },
                Location::Move {
                    from: 0,
                    to: 2,
                    ordinal: 2
                },
            ]
        );

        let ids: Vec<String> = review.classified_changes.iter().map(|c| c.id().to_string()).collect();
        for id in &ids {
            review.accept(id, "v-1").unwrap();
        }
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, edit.content);
        assert_eq!(merged.applied.len(), 3);
        assert!(merged.skipped.is_empty());
    }

    #[test]
    fn test_drifted_location_is_skipped() {
        let base = node("base", "Alpha line.\nBravo line.\nCharlie line.");
        let edit = node("v-1", "Alpha line.\nBravo line.\nCharlie line. Rewritten entirely today.");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(MANUAL), &[])
            .unwrap();
        review.accept("change-0", "v-1").unwrap();

        let merged = engine.merge_into("Alpha line.", &review.classified_changes);
        assert_eq!(merged.content, "Alpha line.");
        assert!(merged.applied.is_empty());
        assert_eq!(merged.skipped.len(), 1);
        assert_eq!(merged.skipped[0].change_id, "change-0");
    }

    #[test]
    fn test_manual_alternative() {
        let base = node("base", "Alpha line.\nBravo line.");
        let edit = node("v-1", "Alpha line.\nBravo line. It was changed.");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(MANUAL), &[])
            .unwrap();

        let id = review.add_manual_alternative("change-0", "Bravo line, by hand.").unwrap();
        assert_eq!(id, "manual-1");
        review.accept("change-0", &id).unwrap();
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, "Alpha line.\nBravo line, by hand.");

        review.reset("change-0").unwrap();
        assert_eq!(review.pending().count(), 1);
        let merged = engine.merge_into(&base.content, &review.classified_changes);
        assert_eq!(merged.content, base.content);
    }

    #[test]
    fn test_review_errors() {
        let base = node("base", "Alpha line.");
        let edit = node("v-1", "Alpha line.\nBravo line.");
        let engine = engine();
        let mut review = engine
            .classify_and_merge(&base, &[&edit], &preset(MANUAL), &[])
            .unwrap();
        assert!(matches!(
            review.accept("change-9", "v-1"),
            Err(MergeError::ChangeNotFound(_))
        ));
        assert!(matches!(
            review.accept("change-0", "v-9"),
            Err(MergeError::AlternativeNotFound { .. })
        ));
        review.reject("change-0").unwrap();
        assert_eq!(review.classified_changes[0].status, ReviewStatus::Rejected);
    }

    #[test]
    fn test_custom_rules_run_before_preset() {
        let base = node("base", "<p>Intro</p><p>Body text.</p>");
        let edit = node("v-1", "<p>Intro changed</p><p>Body text.</p>");
        let custom = vec![MergeRule::new(
            "hold modifications",
            RuleCondition {
                types: vec![ChangeType::Modification],
                ..RuleCondition::default()
            },
            RuleAction::Reject,
        )];
        let review = engine()
            .classify_and_merge(&base, &[&edit], &preset(BALANCED), &custom)
            .unwrap();
        assert_eq!(review.classified_changes[0].status, ReviewStatus::Rejected);
        assert_eq!(
            review.classified_changes[0].rule_applied.as_deref(),
            Some("hold modifications")
        );
    }

    #[test]
    fn test_requires_compare_versions() {
        let base = node("base", "Alpha.");
        let result = engine().classify_and_merge(&base, &[], &preset(MANUAL), &[]);
        assert!(matches!(result, Err(MergeError::NoCompareVersions)));
    }
}
