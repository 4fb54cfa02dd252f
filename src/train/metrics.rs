//! Corpus-level translation scores.
//!
//! [`corpus_bleu`] is BLEU-4 with uniform weights, the closest-reference
//! brevity penalty and "method 1" smoothing (an epsilon of 0.1 replaces zero
//! n-gram match counts). [`word_overlap`] is the lexical fallback: the mean
//! fraction of reference word types found in the prediction.
//!
//! All scorers share one signature, take whitespace-tokenized lowercase words
//! and return a value in `[0, 1]`; degenerate input scores `0.0`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::data::vocab::words;

const MAX_ORDER: usize = 4;
const SMOOTHING_EPSILON: f64 = 0.1;

/// Which corpus score evaluation reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMetric {
    #[default]
    Bleu,
    Overlap,
}

impl ScoreMetric {
    pub fn score(self, predictions: &[String], references: &[String]) -> f64 {
        let raw = match self {
            ScoreMetric::Bleu => corpus_bleu(predictions, references),
            ScoreMetric::Overlap => word_overlap(predictions, references),
        };
        sanitize(raw)
    }
}

/// Scores with the default metric (BLEU-4).
pub fn corpus_score(predictions: &[String], references: &[String]) -> f64 {
    ScoreMetric::default().score(predictions, references)
}

/// Clamp a score from any scorer into `[0, 1]`; non-finite becomes `0.0`.
pub fn sanitize(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

pub fn corpus_bleu(predictions: &[String], references: &[String]) -> f64 {
    if predictions.is_empty() || predictions.len() != references.len() {
        return 0.0;
    }

    let mut matches = [0usize; MAX_ORDER];
    let mut totals = [0usize; MAX_ORDER];
    let mut hyp_len = 0usize;
    let mut ref_len = 0usize;

    for (pred, reference) in predictions.iter().zip(references) {
        let hyp: Vec<String> = words(pred).collect();
        let refs: Vec<String> = words(reference).collect();
        hyp_len += hyp.len();
        ref_len += refs.len();

        for n in 1..=MAX_ORDER {
            let hyp_counts = ngram_counts(&hyp, n);
            let ref_counts = ngram_counts(&refs, n);
            matches[n - 1] += hyp_counts
                .iter()
                .map(|(gram, &count)| count.min(ref_counts.get(gram).copied().unwrap_or(0)))
                .sum::<usize>();
            totals[n - 1] += hyp_counts.values().sum::<usize>().max(1);
        }
    }

    // No unigram matches at all scores zero regardless of smoothing.
    if matches[0] == 0 {
        return 0.0;
    }

    let log_precision: f64 = matches
        .iter()
        .zip(&totals)
        .map(|(&m, &t)| {
            let numerator = if m == 0 { SMOOTHING_EPSILON } else { m as f64 };
            (numerator / t as f64).ln()
        })
        .sum::<f64>()
        / MAX_ORDER as f64;

    brevity_penalty(ref_len, hyp_len) * log_precision.exp()
}

fn brevity_penalty(ref_len: usize, hyp_len: usize) -> f64 {
    if hyp_len > ref_len {
        1.0
    } else if hyp_len == 0 {
        0.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    }
}

pub fn word_overlap(predictions: &[String], references: &[String]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let total: f64 = predictions
        .iter()
        .zip(references)
        .filter_map(|(pred, reference)| {
            let pred: HashSet<String> = words(pred).collect();
            let refs: HashSet<String> = words(reference).collect();
            (!refs.is_empty()).then(|| pred.intersection(&refs).count() as f64 / refs.len() as f64)
        })
        .sum();
    total / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bleu_identical() {
        let refs = strings(&["the cat sat on the mat", "hello there my good friend"]);
        let score = corpus_bleu(&refs, &refs);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bleu_no_overlap_and_degenerate() {
        assert_eq!(corpus_bleu(&strings(&["a b c"]), &strings(&["x y z"])), 0.0);
        assert_eq!(corpus_bleu(&[], &[]), 0.0);
        assert_eq!(corpus_bleu(&strings(&["a"]), &strings(&["a", "b"])), 0.0);
        assert_eq!(corpus_bleu(&strings(&[""]), &strings(&["a b"])), 0.0);
    }

    #[test]
    fn test_bleu_smoothed_partial() {
        // Unigram matches only: higher orders fall back to the epsilon.
        let score = corpus_bleu(&strings(&["cat the"]), &strings(&["the cat"]));
        assert!(score > 0.0 && score < 0.5, "score {score}");
        // Case is ignored.
        let upper = corpus_bleu(&strings(&["CAT The"]), &strings(&["the cat"]));
        assert!((score - upper).abs() < 1e-12);
    }

    #[test]
    fn test_bleu_brevity_penalty() {
        let long = corpus_bleu(&strings(&["a b c d e"]), &strings(&["a b c d e"]));
        let short = corpus_bleu(&strings(&["a b c d"]), &strings(&["a b c d e"]));
        assert!(short < long);
        assert!((short - (1.0f64 - 5.0 / 4.0).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_word_overlap() {
        let preds = strings(&["hello world", "nothing"]);
        let refs = strings(&["hello there world", "here"]);
        let score = word_overlap(&preds, &refs);
        assert!((score - (2.0 / 3.0) / 2.0).abs() < 1e-9);
        assert_eq!(word_overlap(&[], &[]), 0.0);
    }

    #[test]
    fn test_metric_dispatch() {
        let refs = strings(&["one two three four"]);
        assert!((ScoreMetric::Bleu.score(&refs, &refs) - 1.0).abs() < 1e-9);
        assert!((ScoreMetric::Overlap.score(&refs, &refs) - 1.0).abs() < 1e-9);
        assert!((corpus_score(&refs, &refs) - 1.0).abs() < 1e-9);
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(1.5), 1.0);

        let parsed: ScoreMetric = serde_json::from_str("\"overlap\"").unwrap();
        assert_eq!(parsed, ScoreMetric::Overlap);
    }
}
