//! Optimization and evaluation.
//!
//! - [`loss`] — padded cross-entropy and the combined objective
//! - [`metrics`] — BLEU-4 and word-overlap corpus scores
//! - [`trainer`] — AdamW loop with gradient clipping and per-epoch scoring

pub mod loss;
pub mod metrics;
pub mod trainer;

pub use metrics::{ScoreMetric, corpus_score};
pub use trainer::{Evaluation, Trainer, TrainingHistory};
