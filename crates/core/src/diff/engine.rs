//! Unit alignment and change classification.
//!
//! Alignment runs in two passes over the similarity matrix:
//!
//! 1. **Best match.** Every pair at or above the move threshold is a
//!    candidate; candidates are taken greedily, highest similarity first.
//!    A matched pair is *in place* when it has the same rank among matched
//!    units on both sides, so pure insertions and deletions never displace
//!    the units around them. Pairs that are not in place are `moved`.
//! 2. **Gap pairing.** In-place pairs act as anchors. Between two anchors,
//!    the still-unmatched base and target units are paired by offset and
//!    kept as a replacement when their similarity reaches the replacement
//!    threshold.
//!
//! Everything left over is a deletion (base side) or an insertion (target
//! side).

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::config::DiffConfig;
use crate::diff::similarity::similarity_matrix;
use crate::diff::{Change, ChangeKind, Granularity};
use crate::text::{self, MarkupExtractor, TextExtractor};

/// Computes structured diffs between content snapshots.
#[derive(Clone)]
pub struct DiffEngine {
    config: DiffConfig,
    extractor: Arc<dyn TextExtractor>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DiffConfig::default())
    }
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DiffEngine {
    /// Engine using the default [`MarkupExtractor`].
    pub fn new(config: DiffConfig) -> Self {
        Self::with_extractor(config, Arc::new(MarkupExtractor))
    }

    /// Engine with an injected plain-text extractor.
    pub fn with_extractor(config: DiffConfig, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { config, extractor }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    pub fn extractor(&self) -> &dyn TextExtractor {
        self.extractor.as_ref()
    }

    /// Changes between `base` and `target`, sorted by position. Unchanged
    /// units are omitted, so identical contents yield an empty list.
    pub fn diff(&self, base: &str, target: &str, granularity: Granularity) -> Vec<Change> {
        let changes: Vec<Change> = self
            .align(base, target, granularity)
            .into_iter()
            .filter(|c| c.kind != ChangeKind::Unchanged)
            .collect();
        debug!(%granularity, count = changes.len(), "diff computed");
        changes
    }

    /// Full alignment of `base` against `target`, including unchanged pairs.
    pub fn align(&self, base: &str, target: &str, granularity: Granularity) -> Vec<Change> {
        let base_units = text::units(self.extractor.as_ref(), base, granularity);
        let target_units = text::units(self.extractor.as_ref(), target, granularity);
        self.align_units(&base_units, &target_units, granularity)
    }

    /// Align pre-tokenised units.
    pub fn align_units(
        &self,
        base: &[String],
        target: &[String],
        granularity: Granularity,
    ) -> Vec<Change> {
        let move_threshold = self.config.move_threshold_for(granularity);
        let modification_threshold = self.config.modification_threshold_for(granularity);
        let matrix = similarity_matrix(base, target, self.config.ignore_punctuation);

        let mut base_match: Vec<Option<usize>> = vec![None; base.len()];
        let mut target_match: Vec<Option<usize>> = vec![None; target.len()];

        // Pass 1: greedy best match above the move threshold.
        let mut candidates: Vec<(usize, usize)> = Vec::new();
        for (i, row) in matrix.iter().enumerate() {
            for (j, &score) in row.iter().enumerate() {
                if score >= move_threshold {
                    candidates.push((i, j));
                }
            }
        }
        candidates.sort_by(|&(ai, aj), &(bi, bj)| {
            matrix[bi][bj]
                .total_cmp(&matrix[ai][aj])
                .then_with(|| (base[bi] == target[bj]).cmp(&(base[ai] == target[aj])))
                .then_with(|| ai.abs_diff(aj).cmp(&bi.abs_diff(bj)))
                .then_with(|| (ai + aj).cmp(&(bi + bj)))
                .then_with(|| ai.cmp(&bi))
        });
        for (i, j) in candidates {
            if base_match[i].is_none() && target_match[j].is_none() {
                base_match[i] = Some(j);
                target_match[j] = Some(i);
            }
        }

        let base_rank = match_ranks(&base_match);
        let target_rank = match_ranks(&target_match);
        let mut in_place = vec![false; base.len()];
        for (i, matched) in base_match.iter().enumerate() {
            if let Some(j) = *matched {
                in_place[i] = base_rank[i] == target_rank[j];
            }
        }

        // Pass 2: pair leftovers between in-place anchors.
        let mut anchors: Vec<(usize, usize)> = base_match
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.filter(|_| in_place[i]).map(|j| (i, j)))
            .collect();
        anchors.push((base.len(), target.len()));

        let (mut gap_base, mut gap_target) = (0, 0);
        for (anchor_base, anchor_target) in anchors {
            let free_base: Vec<usize> = (gap_base..anchor_base)
                .filter(|&i| base_match[i].is_none())
                .collect();
            let free_target: Vec<usize> = (gap_target..anchor_target)
                .filter(|&j| target_match[j].is_none())
                .collect();
            for (&i, &j) in free_base.iter().zip(free_target.iter()) {
                if matrix[i][j] >= self.config.replacement_threshold {
                    base_match[i] = Some(j);
                    target_match[j] = Some(i);
                    in_place[i] = true;
                }
            }
            gap_base = anchor_base + 1;
            gap_target = anchor_target + 1;
        }

        // Emit.
        let mut changes = Vec::with_capacity(base.len().max(target.len()));
        for (i, matched) in base_match.iter().enumerate() {
            match *matched {
                Some(j) => {
                    let score = matrix[i][j];
                    let kind = if !in_place[i] {
                        ChangeKind::Moved
                    } else if base[i] == target[j] || score >= 1.0 {
                        ChangeKind::Unchanged
                    } else if score >= modification_threshold {
                        ChangeKind::Modification
                    } else {
                        ChangeKind::Replacement
                    };
                    let similarity = (kind != ChangeKind::Unchanged).then_some(score);
                    changes.push(Change {
                        id: String::new(),
                        kind,
                        granularity,
                        left_unit: Some(base[i].clone()),
                        right_unit: Some(target[j].clone()),
                        left_index: Some(i),
                        right_index: Some(j),
                        position: position(j, target.len()),
                        similarity,
                    });
                }
                None => changes.push(Change {
                    id: String::new(),
                    kind: ChangeKind::Deletion,
                    granularity,
                    left_unit: Some(base[i].clone()),
                    right_unit: None,
                    left_index: Some(i),
                    right_index: None,
                    position: position(i, base.len()),
                    similarity: None,
                }),
            }
        }
        for (j, matched) in target_match.iter().enumerate() {
            if matched.is_none() {
                changes.push(Change {
                    id: String::new(),
                    kind: ChangeKind::Insertion,
                    granularity,
                    left_unit: None,
                    right_unit: Some(target[j].clone()),
                    left_index: None,
                    right_index: Some(j),
                    position: position(j, target.len()),
                    similarity: None,
                });
            }
        }

        changes.sort_by(|a, b| {
            a.position
                .total_cmp(&b.position)
                .then_with(|| cmp_index(a.left_index, b.left_index))
                .then_with(|| cmp_index(a.right_index, b.right_index))
        });
        for (n, change) in changes.iter_mut().enumerate() {
            change.id = format!("{granularity}-{n}");
        }
        changes
    }
}

/// Rank of each matched slot among the matched slots on the same side.
fn match_ranks(matches: &[Option<usize>]) -> Vec<usize> {
    let mut ranks = vec![0; matches.len()];
    let mut next = 0;
    for (idx, m) in matches.iter().enumerate() {
        if m.is_some() {
            ranks[idx] = next;
            next += 1;
        }
    }
    ranks
}

fn position(index: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        index as f64 / total as f64 * 100.0
    }
}

/// Absent indices sort after present ones.
fn cmp_index(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::count_kind;

    fn units(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_content_is_empty() {
        let engine = DiffEngine::default();
        let content = "<p>Alpha beta.</p><p>Gamma delta. Epsilon!</p>";
        for g in [Granularity::Word, Granularity::Sentence, Granularity::Paragraph] {
            assert!(engine.diff(content, content, g).is_empty(), "granularity {g}");
        }
        assert!(engine.diff("", "", Granularity::Paragraph).is_empty());
    }

    #[test]
    fn test_empty_base_all_insertions() {
        let engine = DiffEngine::default();
        let changes = engine.diff("", "One.\nTwo.", Granularity::Paragraph);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Insertion));
        assert_eq!(changes[0].position, 0.0);
        assert_eq!(changes[1].position, 50.0);
    }

    #[test]
    fn test_empty_target_all_deletions() {
        let engine = DiffEngine::default();
        let changes = engine.diff("One two three", "", Granularity::Word);
        assert_eq!(count_kind(&changes, ChangeKind::Deletion), 3);
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_swapped_paragraphs_are_moves() {
        let engine = DiffEngine::default();
        let changes = engine.align_units(
            &units(&["X", "Y", "Z"]),
            &units(&["Y", "X", "Z"]),
            Granularity::Paragraph,
        );
        let reported: Vec<_> = changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Unchanged)
            .collect();
        assert_eq!(reported.len(), 2);
        assert!(reported.iter().all(|c| c.kind == ChangeKind::Moved));
        assert_eq!(count_kind(&changes, ChangeKind::Insertion), 0);
        assert_eq!(count_kind(&changes, ChangeKind::Deletion), 0);
        let x = reported
            .iter()
            .find(|c| c.left_unit.as_deref() == Some("X"))
            .unwrap();
        assert_eq!((x.left_index, x.right_index), (Some(0), Some(1)));
        assert_eq!(x.similarity, Some(1.0));
    }

    #[test]
    fn test_insertion_does_not_displace_following_units() {
        let engine = DiffEngine::default();
        let changes = engine.diff(
            "Alpha paragraph here.\nBeta paragraph here.",
            "Brand new opening.\nAlpha paragraph here.\nBeta paragraph here.",
            Granularity::Paragraph,
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Insertion);
        assert_eq!(changes[0].right_index, Some(0));
    }

    #[test]
    fn test_modification_above_threshold() {
        let engine = DiffEngine::default();
        let changes = engine.diff(
            "The intro paragraph is short and clear.",
            "The intro paragraph is short and very clear.",
            Granularity::Paragraph,
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modification);
        assert!(changes[0].similarity.unwrap() > 0.85);
    }

    #[test]
    fn test_punctuation_counts_against_similarity() {
        let engine = DiffEngine::default();
        let changes = engine.diff("Hello world again.", "Hello, world again.", Granularity::Sentence);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Replacement);
        assert_eq!(changes[0].similarity, Some(0.5));

        let changes = engine.diff("Hello world", "Hello, world!", Granularity::Word);
        assert_eq!(count_kind(&changes, ChangeKind::Deletion), 2);
        assert_eq!(count_kind(&changes, ChangeKind::Insertion), 2);
        assert_eq!(count_kind(&changes, ChangeKind::Modification), 0);
    }

    #[test]
    fn test_full_score_in_place_is_unchanged() {
        let engine = DiffEngine::default();
        assert!(engine.diff("Hello world.", "hello WORLD.", Granularity::Sentence).is_empty());

        let engine = DiffEngine::new(DiffConfig {
            ignore_punctuation: true,
            ..DiffConfig::default()
        });
        assert!(engine.diff("Hello world", "Hello, world!", Granularity::Word).is_empty());
        let changes = engine.diff("Hello world again.", "Hello, world again, friend.", Granularity::Sentence);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Replacement);
        assert_eq!(changes[0].similarity, Some(0.75));
    }

    #[test]
    fn test_modifications_score_below_one() {
        let engine = DiffEngine::new(DiffConfig {
            ignore_punctuation: true,
            ..DiffConfig::default()
        });
        let a = "<p>The intro paragraph is short and clear.</p><p>Hello world.</p>";
        let b = "<p>The intro paragraph is short and very clear.</p><p>Hello, world!</p>";
        for g in [Granularity::Word, Granularity::Sentence, Granularity::Paragraph] {
            for change in engine.diff(a, b, g) {
                if change.kind == ChangeKind::Modification {
                    assert!(change.similarity.unwrap() < 1.0, "granularity {g}");
                }
            }
        }
    }

    #[test]
    fn test_low_similarity_in_place_is_replacement() {
        let engine = DiffEngine::default();
        let changes = engine.diff(
            "Intro here. Body text.",
            "Intro changed here. Body text. Conclusion.",
            Granularity::Sentence,
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Replacement);
        assert_eq!(changes[0].left_unit.as_deref(), Some("Intro here."));
        assert_eq!(changes[0].right_unit.as_deref(), Some("Intro changed here."));
        assert!((changes[0].similarity.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(changes[1].kind, ChangeKind::Insertion);
        assert_eq!(changes[1].right_unit.as_deref(), Some("Conclusion."));
    }

    #[test]
    fn test_trailing_period_splits_short_sentences() {
        let base = "Intro. Body text.";
        let target = "Intro changed. Body text. Conclusion.";

        let changes = DiffEngine::default().diff(base, target, Granularity::Sentence);
        assert_eq!(count_kind(&changes, ChangeKind::Deletion), 1);
        assert_eq!(count_kind(&changes, ChangeKind::Insertion), 2);

        let engine = DiffEngine::new(DiffConfig {
            ignore_punctuation: true,
            ..DiffConfig::default()
        });
        let changes = engine.diff(base, target, Granularity::Sentence);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Replacement);
        assert_eq!(changes[0].similarity, Some(0.5));
        assert_eq!(changes[1].right_unit.as_deref(), Some("Conclusion."));
    }

    #[test]
    fn test_unrelated_units_are_delete_and_insert() {
        let engine = DiffEngine::default();
        let changes = engine.diff("Completely different.", "Nothing shared here.", Granularity::Paragraph);
        assert_eq!(count_kind(&changes, ChangeKind::Deletion), 1);
        assert_eq!(count_kind(&changes, ChangeKind::Insertion), 1);
    }

    #[test]
    fn test_insertions_mirror_deletions() {
        let engine = DiffEngine::default();
        let a = "<p>Shared opening words here.</p><p>Only in a.</p><p>Common tail text.</p>";
        let b = "<p>Common tail text.</p><p>Shared opening words here, slightly.</p><p>Fresh b paragraph one.</p><p>Fresh b two.</p>";
        for g in [Granularity::Word, Granularity::Sentence, Granularity::Paragraph] {
            let forward = engine.diff(a, b, g);
            let backward = engine.diff(b, a, g);
            assert_eq!(
                count_kind(&forward, ChangeKind::Insertion),
                count_kind(&backward, ChangeKind::Deletion),
                "granularity {g}"
            );
            assert_eq!(
                count_kind(&forward, ChangeKind::Deletion),
                count_kind(&backward, ChangeKind::Insertion),
                "granularity {g}"
            );
        }
    }

    #[test]
    fn test_changes_sorted_with_stable_ids() {
        let engine = DiffEngine::default();
        let changes = engine.diff("a b c", "c x b", Granularity::Word);
        assert!(changes.windows(2).all(|w| w[0].position <= w[1].position));
        assert!(changes.iter().all(|c| c.id.starts_with("word-")));
    }
}
