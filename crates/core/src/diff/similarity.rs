//! Jaccard word-overlap similarity between text units.
//!
//! Called `O(n·m)` times per diff. Paragraph-level diffs are cheap for any
//! realistic document; word-level diffs of very large documents should be
//! chunked by the caller.

use std::collections::HashSet;

/// Jaccard index `|A∩B| / |A∪B|` over the lower-cased, whitespace-separated
/// word sets of `a` and `b`. Punctuation stays part of the word, so `"end."`
/// and `"end"` differ.
///
/// Returns 1.0 when both units have no words and 0.0 when exactly one does.
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_with(a, b, false)
}

/// [`similarity`], optionally trimming punctuation from both ends of every
/// word first.
pub fn similarity_with(a: &str, b: &str, ignore_punctuation: bool) -> f64 {
    jaccard(&word_set(a, ignore_punctuation), &word_set(b, ignore_punctuation))
}

/// Full `base.len() × target.len()` similarity matrix. Word sets are built
/// once per unit.
pub fn similarity_matrix(base: &[String], target: &[String], ignore_punctuation: bool) -> Vec<Vec<f64>> {
    let target_sets: Vec<HashSet<String>> = target
        .iter()
        .map(|t| word_set(t, ignore_punctuation))
        .collect();
    base.iter()
        .map(|unit| {
            let set = word_set(unit, ignore_punctuation);
            target_sets.iter().map(|other| jaccard(&set, other)).collect()
        })
        .collect()
}

/// Lower-cased words of `unit`.
pub(crate) fn word_set(unit: &str, ignore_punctuation: bool) -> HashSet<String> {
    unit.split_whitespace()
        .map(|token| {
            if ignore_punctuation {
                normalize_word(token)
            } else {
                token.to_lowercase()
            }
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Lower-case a token and trim non-alphanumeric characters from both ends.
pub(crate) fn normalize_word(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let intersection = a.intersection(b).count();
            let union = a.len() + b.len() - intersection;
            intersection as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_units() {
        assert_eq!(similarity("The quick fox", "the QUICK fox"), 1.0);
    }

    #[test]
    fn test_empty_units() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("   ", "\n"), 1.0);
        assert_eq!(similarity("", "word"), 0.0);
        assert_eq!(similarity("word", ""), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        // {intro} vs {intro, changed}
        assert_eq!(similarity("Intro", "Intro changed"), 0.5);
        // 7 shared words out of 8 distinct
        let s = similarity(
            "The intro paragraph is short and clear.",
            "The intro paragraph is short and very clear.",
        );
        assert!((s - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_punctuation_is_part_of_the_word() {
        assert_eq!(similarity("Hello world", "Hello, world!"), 0.0);
        assert_eq!(similarity("Intro.", "Intro changed."), 0.0);
        assert!((similarity("Hello world again", "Hello, world again") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ignore_punctuation() {
        assert_eq!(similarity_with("Hello world", "Hello, world!", true), 1.0);
        assert_eq!(similarity_with("Intro.", "Intro changed.", true), 0.5);
        assert_eq!(similarity_with("--", "word", true), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = "alpha beta gamma";
        let b = "beta gamma delta epsilon";
        assert_eq!(similarity(a, b), similarity(b, a));
        assert!((similarity(a, b) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_matrix_shape() {
        let base = vec!["a b".to_string(), "c".to_string()];
        let target = vec!["a".to_string(), "c".to_string(), "d".to_string()];
        let matrix = similarity_matrix(&base, &target, false);
        assert_eq!(matrix.len(), 2);
        assert!(matrix.iter().all(|row| row.len() == 3));
        assert_eq!(matrix[0][0], 0.5);
        assert_eq!(matrix[1][1], 1.0);
        assert_eq!(matrix[1][2], 0.0);
    }
}
