//! Configuration for the TCR sign-language translation model.
//!
//! Defaults match the reference training setup: 256-frame videos, 50-token
//! sentences, hidden width 256, 8 attention heads, 3 convolution layers per
//! stream and 4 decoder layers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::train::metrics::ScoreMetric;
use crate::{Error, Result};

/// Number of body joints in an OpenPose `pose_keypoints_2d` array.
pub const BODY_JOINTS: usize = 25;
/// Number of joints per hand.
pub const HAND_JOINTS: usize = 21;
/// Number of face landmarks.
pub const FACE_JOINTS: usize = 70;

/// Per-frame body feature width (x, y per joint).
pub const BODY_DIM: usize = BODY_JOINTS * 2;
/// Per-frame hands feature width (left then right, x, y per joint).
pub const HANDS_DIM: usize = HAND_JOINTS * 2 * 2;
/// Per-frame face feature width.
pub const FACE_DIM: usize = FACE_JOINTS * 2;

/// Reserved vocabulary indices.
///
/// Passed explicitly to the vocabulary builder, tokenizer and decoder instead of
/// living in global constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub pad: u32,
    pub sos: u32,
    pub eos: u32,
    pub unk: u32,
}

impl SpecialTokens {
    pub const PAD: &'static str = "<pad>";
    pub const SOS: &'static str = "<sos>";
    pub const EOS: &'static str = "<eos>";
    pub const UNK: &'static str = "<unk>";

    /// Reserved token strings ordered by index.
    pub fn ordered(&self) -> [(u32, &'static str); 4] {
        let mut tokens = [
            (self.pad, Self::PAD),
            (self.sos, Self::SOS),
            (self.eos, Self::EOS),
            (self.unk, Self::UNK),
        ];
        tokens.sort_by_key(|(idx, _)| *idx);
        tokens
    }

    /// Reserved tokens must occupy exactly the indices `0..4`.
    pub fn validate(&self) -> Result<()> {
        let mut seen = [false; 4];
        for (idx, name) in self.ordered() {
            let slot = seen
                .get_mut(idx as usize)
                .ok_or_else(|| Error::Config(format!("{name} index {idx} must be below 4")))?;
            if *slot {
                return Err(Error::Config(format!("duplicate reserved index {idx}")));
            }
            *slot = true;
        }
        Ok(())
    }
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            pad: 0,
            sos: 1,
            eos: 2,
            unk: 3,
        }
    }
}

/// Data pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Fixed video length in frames.
    pub max_video_len: usize,
    /// Fixed text length in tokens (including `<sos>`/`<eos>`).
    pub max_text_len: usize,
    /// Modality suffixes stripped from identifiers, checked in order.
    pub id_suffixes: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_video_len: 256,
            max_text_len: 50,
            id_suffixes: crate::data::canonical::DEFAULT_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// TCR model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcrConfig {
    // --- Vocabulary ---
    pub vocab_size: usize,

    // --- Input streams ---
    pub body_dim: usize,
    pub hands_dim: usize,
    pub face_dim: usize,

    // --- Shared width ---
    pub hidden_dim: usize,
    pub dropout: f32,

    // --- Dual-stream encoder ---
    pub encoder_layers: usize,
    pub encoder_kernel_size: usize,
    pub batch_norm_eps: f64,

    // --- Fusion ---
    pub fusion_heads: usize,

    // --- Decoder ---
    pub decoder_layers: usize,
    pub decoder_heads: usize,
    pub feedforward_dim: usize,
    pub max_text_len: usize,

    pub layer_norm_eps: f64,
}

impl Default for TcrConfig {
    fn default() -> Self {
        Self {
            vocab_size: 0,
            body_dim: BODY_DIM,
            hands_dim: HANDS_DIM,
            face_dim: FACE_DIM,
            hidden_dim: 256,
            dropout: 0.1,
            encoder_layers: 3,
            encoder_kernel_size: 3,
            batch_norm_eps: 1e-5,
            fusion_heads: 8,
            decoder_layers: 4,
            decoder_heads: 8,
            feedforward_dim: 2048,
            max_text_len: 50,
            layer_norm_eps: 1e-5,
        }
    }
}

impl TcrConfig {
    /// Default configuration for a vocabulary of `vocab_size` tokens.
    pub fn with_vocab_size(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            ..Self::default()
        }
    }

    /// Load overrides from a JSON file; absent keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Channel count of the body+hands stream.
    pub fn body_hands_dim(&self) -> usize {
        self.body_dim + self.hands_dim
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size < 4 {
            return Err(Error::Config(format!(
                "vocab_size must cover the 4 reserved tokens, got {}",
                self.vocab_size
            )));
        }
        if self.fusion_heads == 0 || self.decoder_heads == 0 {
            return Err(Error::Config(format!(
                "attention heads must be positive, got fusion_heads {} decoder_heads {}",
                self.fusion_heads, self.decoder_heads
            )));
        }
        if self.hidden_dim == 0 || self.hidden_dim % self.fusion_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_dim {} not divisible by fusion_heads {}",
                self.hidden_dim, self.fusion_heads
            )));
        }
        if self.hidden_dim % self.decoder_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_dim {} not divisible by decoder_heads {}",
                self.hidden_dim, self.decoder_heads
            )));
        }
        if self.encoder_kernel_size % 2 == 0 {
            return Err(Error::Config(format!(
                "encoder_kernel_size must be odd to preserve length, got {}",
                self.encoder_kernel_size
            )));
        }
        if self.max_text_len < 2 {
            return Err(Error::Config("max_text_len must be at least 2".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!("dropout out of range: {}", self.dropout)));
        }
        Ok(())
    }
}

/// Optimization and evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Weight of the temporal-consistency term added to cross-entropy.
    pub tcr_weight: f64,
    /// Global gradient L2-norm bound.
    pub max_grad_norm: f64,
    /// Fraction of samples used for training; the rest is validation.
    pub train_fraction: f64,
    /// Seed for the train/val split and batch shuffling.
    pub seed: u64,
    /// Validation score reported per epoch.
    pub metric: ScoreMetric,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 4,
            learning_rate: 1e-4,
            weight_decay: 0.01,
            tcr_weight: 0.1,
            max_grad_norm: 1.0,
            train_fraction: 0.8,
            seed: 42,
            metric: ScoreMetric::Bleu,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.train_fraction) {
            return Err(Error::Config(format!(
                "train_fraction out of range: {}",
                self.train_fraction
            )));
        }
        if self.max_grad_norm <= 0.0 {
            return Err(Error::Config(format!(
                "max_grad_norm must be positive, got {}",
                self.max_grad_norm
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tcr_config() {
        let cfg = TcrConfig::with_vocab_size(40);
        assert_eq!(cfg.hidden_dim, 256);
        assert_eq!(cfg.body_hands_dim(), 134);
        assert_eq!(cfg.face_dim, 140);
        assert_eq!(cfg.encoder_layers, 3);
        assert_eq!(cfg.decoder_layers, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_heads_rejected() {
        let cfg = TcrConfig {
            hidden_dim: 30,
            ..TcrConfig::with_vocab_size(10)
        };
        assert!(cfg.validate().is_err());
        assert!(TcrConfig::default().validate().is_err()); // vocab_size 0
    }

    #[test]
    fn test_zero_heads_rejected() {
        let fusion = TcrConfig {
            fusion_heads: 0,
            ..TcrConfig::with_vocab_size(10)
        };
        assert!(matches!(fusion.validate(), Err(Error::Config(_))));
        let decoder = TcrConfig {
            decoder_heads: 0,
            ..TcrConfig::with_vocab_size(10)
        };
        assert!(matches!(decoder.validate(), Err(Error::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"vocab_size": 10, "fusion_heads": 0}"#).unwrap();
        assert!(matches!(TcrConfig::from_json_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"vocab_size": 20, "hidden_dim": 64, "decoder_layers": 2}"#).unwrap();
        let cfg = TcrConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.vocab_size, 20);
        assert_eq!(cfg.hidden_dim, 64);
        assert_eq!(cfg.decoder_layers, 2);
        assert_eq!(cfg.fusion_heads, 8);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(TcrConfig::from_json_file(&path), Err(Error::Json(_))));
        assert!(matches!(
            TcrConfig::from_json_file(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_special_tokens() {
        let tokens = SpecialTokens::default();
        assert!(tokens.validate().is_ok());
        assert_eq!(tokens.ordered()[0], (0, "<pad>"));
        assert_eq!(tokens.ordered()[3], (3, "<unk>"));

        let clash = SpecialTokens { eos: 1, ..tokens };
        assert!(clash.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: TcrConfig = serde_json::from_str(r#"{"vocab_size": 12, "hidden_dim": 64}"#).unwrap();
        assert_eq!(cfg.vocab_size, 12);
        assert_eq!(cfg.hidden_dim, 64);
        assert_eq!(cfg.fusion_heads, 8);
        assert_eq!(cfg.max_text_len, 50);
    }

    #[test]
    fn test_data_and_train_defaults() {
        let data = DataConfig::default();
        assert_eq!(data.max_video_len, 256);
        assert_eq!(data.max_text_len, 50);
        assert_eq!(data.id_suffixes[0], "_openpose");

        let train = TrainConfig::default();
        assert_eq!(train.tcr_weight, 0.1);
        assert_eq!(train.max_grad_norm, 1.0);
        assert_eq!(train.metric, ScoreMetric::Bleu);
        assert!(train.validate().is_ok());

        let overlap: TrainConfig = serde_json::from_str(r#"{"metric": "overlap", "num_epochs": 1}"#).unwrap();
        assert_eq!(overlap.metric, ScoreMetric::Overlap);
        assert_eq!(overlap.batch_size, 4);
    }
}
