//! Cross-modal temporal fusion.
//!
//! Body/hands encodings attend to face encodings; the attended signal is added
//! back residually and normalized. The fused sequence also yields a temporal
//! smoothness penalty: the mean squared difference between adjacent frames.

use candle_core::{DType, Module, ModuleT, Tensor};
use candle_nn::{Dropout, VarBuilder};

use super::attention::MultiHeadAttention;
use super::mask::key_padding_bias;
use super::norm::LayerNorm;
use crate::Result;
use crate::config::TcrConfig;

/// Fused memory and its temporal-consistency loss.
#[derive(Debug, Clone)]
pub struct FusionOutput {
    /// `[B, L, H]`
    pub fused: Tensor,
    /// Scalar, `>= 0`.
    pub temporal_loss: Tensor,
}

#[derive(Debug, Clone)]
pub struct TemporalFusion {
    cross_attn: MultiHeadAttention,
    norm: LayerNorm,
    dropout: Dropout,
}

impl TemporalFusion {
    pub fn new(cfg: &TcrConfig, vb: VarBuilder) -> Result<Self> {
        // Attention weights are not dropped here; only the attended output is.
        let cross_attn = MultiHeadAttention::new(cfg.hidden_dim, cfg.fusion_heads, 0.0, vb.pp("cross_attn"))?;
        let norm = LayerNorm::new(cfg.hidden_dim, cfg.layer_norm_eps, vb.pp("norm"))?;
        Ok(Self {
            cross_attn,
            norm,
            dropout: Dropout::new(cfg.dropout),
        })
    }

    /// - `body_hands`: `[B, L, H]` (query)
    /// - `face`: `[B, L, H]` (key/value)
    /// - `mask`: `[B, L]` u8, nonzero for real frames; padded face frames are
    ///   excluded from attention
    pub fn forward(
        &self,
        body_hands: &Tensor,
        face: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<FusionOutput> {
        let bias = mask
            .map(|m| key_padding_bias(m, body_hands.dtype()))
            .transpose()?;
        let attended = self.cross_attn.forward(body_hands, face, bias.as_ref(), train)?;
        let attended = self.dropout.forward_t(&attended, train)?;
        let fused = self.norm.forward(&(body_hands + attended)?)?;
        let temporal_loss = temporal_consistency_loss(&fused)?;
        Ok(FusionOutput {
            fused,
            temporal_loss,
        })
    }
}

/// `mean((x[:, 1:] - x[:, :-1])²)` over every element; zero when `L < 2`.
pub fn temporal_consistency_loss(x: &Tensor) -> Result<Tensor> {
    let (_, seq_len, _) = x.dims3()?;
    if seq_len < 2 {
        return Ok(Tensor::zeros((), DType::F32, x.device())?);
    }
    let next = x.narrow(1, 1, seq_len - 1)?;
    let prev = x.narrow(1, 0, seq_len - 1)?;
    Ok((next - prev)?.sqr()?.mean_all()?.to_dtype(DType::F32)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn small_config() -> TcrConfig {
        TcrConfig {
            hidden_dim: 16,
            fusion_heads: 4,
            ..TcrConfig::with_vocab_size(10)
        }
    }

    #[test]
    fn test_fusion_shapes_and_nonnegative_loss() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let fusion = TemporalFusion::new(&small_config(), vb).unwrap();

        let bh = Tensor::randn(0f32, 1.0, (2, 7, 16), &device).unwrap();
        let face = Tensor::randn(0f32, 1.0, (2, 7, 16), &device).unwrap();
        let mask = Tensor::new(&[[1u8, 1, 1, 1, 0, 0, 0], [1, 1, 1, 1, 1, 1, 1]], &device).unwrap();
        let out = fusion.forward(&bh, &face, Some(&mask), true).unwrap();
        assert_eq!(out.fused.dims(), &[2, 7, 16]);
        let loss: f32 = out.temporal_loss.to_scalar().unwrap();
        assert!(loss >= 0.0);
    }

    #[test]
    fn test_constant_sequence_has_zero_loss() {
        let device = Device::Cpu;
        let frame = Tensor::randn(0f32, 1.0, (1, 1, 8), &device).unwrap();
        let x = frame.broadcast_as((3, 10, 8)).unwrap().contiguous().unwrap();
        let loss: f32 = temporal_consistency_loss(&x).unwrap().to_scalar().unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_known_loss_value() {
        let device = Device::Cpu;
        // Steps of 1, 1, 2 on a single channel: mean(1, 1, 4) = 2.
        let x = Tensor::new(&[[[0f32], [1.0], [2.0], [4.0]]], &device).unwrap();
        let loss: f32 = temporal_consistency_loss(&x).unwrap().to_scalar().unwrap();
        assert!((loss - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_frame_loss_is_zero() {
        let device = Device::Cpu;
        let x = Tensor::ones((2, 1, 4), DType::F32, &device).unwrap();
        let loss: f32 = temporal_consistency_loss(&x).unwrap().to_scalar().unwrap();
        assert_eq!(loss, 0.0);
    }
}
