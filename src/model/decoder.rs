//! Autoregressive text decoder.
//!
//! ```text
//! tokens [B, T] ─ embed + pos_embed ─┬─ DecoderLayer × N ─ output_proj ─ logits [B, T, V]
//!                                    │        ▲
//! memory [B, L, H] ──────────────────┴────────┘ (cross-attention, padded frames masked)
//! ```
//!
//! Layers are post-norm: each sub-block's output is added to its input and
//! then layer-normalized.

use candle_core::{D, IndexOp, Module, ModuleT, Tensor};
use candle_nn::{Dropout, Embedding, Linear, VarBuilder};

use super::attention::MultiHeadAttention;
use super::mask::{causal_mask, key_padding_bias};
use super::norm::LayerNorm;
use crate::config::{SpecialTokens, TcrConfig};
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Decoder layer
// ---------------------------------------------------------------------------

/// Causal self-attention → cross-attention → ReLU feed-forward, each with
/// residual + LayerNorm.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    cross_attn: MultiHeadAttention,
    linear1: Linear,
    linear2: Linear,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    dropout: Dropout,
}

impl DecoderLayer {
    pub fn new(cfg: &TcrConfig, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.hidden_dim;
        Ok(Self {
            self_attn: MultiHeadAttention::new(dim, cfg.decoder_heads, cfg.dropout, vb.pp("self_attn"))?,
            cross_attn: MultiHeadAttention::new(dim, cfg.decoder_heads, cfg.dropout, vb.pp("cross_attn"))?,
            linear1: candle_nn::linear(dim, cfg.feedforward_dim, vb.pp("linear1"))?,
            linear2: candle_nn::linear(cfg.feedforward_dim, dim, vb.pp("linear2"))?,
            norm1: LayerNorm::new(dim, cfg.layer_norm_eps, vb.pp("norm1"))?,
            norm2: LayerNorm::new(dim, cfg.layer_norm_eps, vb.pp("norm2"))?,
            norm3: LayerNorm::new(dim, cfg.layer_norm_eps, vb.pp("norm3"))?,
            dropout: Dropout::new(cfg.dropout),
        })
    }

    /// - `x`: `[B, T, H]`
    /// - `memory`: `[B, L, H]`
    /// - `self_bias`: `[1, 1, T, T]` causal bias
    /// - `memory_bias`: `[B, 1, 1, L]` padding bias
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        self_bias: Option<&Tensor>,
        memory_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let h = self.self_attn.forward(x, x, self_bias, train)?;
        let x = self.norm1.forward(&(x + self.dropout.forward_t(&h, train)?)?)?;

        let h = self.cross_attn.forward(&x, memory, memory_bias, train)?;
        let x = self.norm2.forward(&(&x + self.dropout.forward_t(&h, train)?)?)?;

        let h = self.linear1.forward(&x)?.relu()?;
        let h = self.dropout.forward_t(&h, train)?;
        let h = self.linear2.forward(&h)?;
        let x = self.norm3.forward(&(&x + self.dropout.forward_t(&h, train)?)?)?;
        Ok(x)
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TextDecoder {
    embedding: Embedding,
    pos_embedding: Embedding,
    layers: Vec<DecoderLayer>,
    output_proj: Linear,
    max_len: usize,
}

impl TextDecoder {
    pub fn new(cfg: &TcrConfig, vb: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(cfg.vocab_size, cfg.hidden_dim, vb.pp("embedding"))?;
        let pos_embedding = candle_nn::embedding(cfg.max_text_len, cfg.hidden_dim, vb.pp("pos_embedding"))?;
        let layers = (0..cfg.decoder_layers)
            .map(|i| DecoderLayer::new(cfg, vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let output_proj = candle_nn::linear(cfg.hidden_dim, cfg.vocab_size, vb.pp("output_proj"))?;
        Ok(Self {
            embedding,
            pos_embedding,
            layers,
            output_proj,
            max_len: cfg.max_text_len,
        })
    }

    /// Number of learned positions; the longest sequence the decoder accepts.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Teacher-forced logits.
    ///
    /// - `tgt`: `[B, T]` u32 token ids, `T <= max_len`
    /// - `memory`: `[B, L, H]`
    /// - `memory_mask`: `[B, L]` u8, nonzero for real frames
    ///
    /// Returns `[B, T, V]`.
    pub fn forward(
        &self,
        tgt: &Tensor,
        memory: &Tensor,
        memory_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let memory_bias = memory_mask
            .map(|m| key_padding_bias(m, memory.dtype()))
            .transpose()?;
        self.forward_with_bias(tgt, memory, memory_bias.as_ref(), train)
    }

    fn forward_with_bias(
        &self,
        tgt: &Tensor,
        memory: &Tensor,
        memory_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (_, seq_len) = tgt.dims2()?;
        if seq_len > self.max_len {
            return Err(Error::Config(format!(
                "target length {seq_len} exceeds {} learned positions",
                self.max_len
            )));
        }
        let positions = Tensor::arange(0u32, seq_len as u32, tgt.device())?;
        let x = self
            .embedding
            .forward(tgt)?
            .broadcast_add(&self.pos_embedding.forward(&positions)?)?;

        let causal = causal_mask(seq_len, x.dtype(), x.device())?;
        let mut x = x;
        for layer in &self.layers {
            x = layer.forward(&x, memory, Some(&causal), memory_bias, train)?;
        }
        Ok(self.output_proj.forward(&x)?)
    }

    /// Greedy decoding in eval mode.
    ///
    /// Starts every sequence with `<sos>` and appends the argmax token for at
    /// most `max_len - 1` steps, stopping early once every sequence has
    /// produced `<eos>` at some step. Sequences keep growing after their own
    /// `<eos>`; decoding to text stops at the first one. `max_len` is capped at
    /// the number of learned positions.
    ///
    /// Returns `[B, n]` u32 with `1 <= n <= max_len`.
    pub fn generate(
        &self,
        memory: &Tensor,
        memory_mask: Option<&Tensor>,
        special: &SpecialTokens,
        max_len: usize,
    ) -> Result<Tensor> {
        let (batch, _, _) = memory.dims3()?;
        let max_len = max_len.min(self.max_len).max(1);
        let memory_bias = memory_mask
            .map(|m| key_padding_bias(m, memory.dtype()))
            .transpose()?;

        let mut generated = Tensor::full(special.sos, (batch, 1), memory.device())?;
        let mut finished = vec![false; batch];
        for step in 1..max_len {
            let logits = self.forward_with_bias(&generated, memory, memory_bias.as_ref(), false)?;
            let next = logits.i((.., step - 1, ..))?.argmax_keepdim(D::Minus1)?; // [B, 1]
            generated = Tensor::cat(&[&generated, &next], 1)?;

            let next: Vec<u32> = next.flatten_all()?.to_vec1()?;
            for (done, token) in finished.iter_mut().zip(next) {
                *done |= token == special.eos;
            }
            if finished.iter().all(|&done| done) {
                tracing::debug!(steps = step, "all sequences reached <eos>");
                break;
            }
        }
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config() -> TcrConfig {
        TcrConfig {
            hidden_dim: 16,
            decoder_heads: 4,
            decoder_layers: 2,
            feedforward_dim: 32,
            max_text_len: 8,
            ..TcrConfig::with_vocab_size(12)
        }
    }

    fn make_decoder(device: &Device) -> (VarMap, TextDecoder) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let decoder = TextDecoder::new(&small_config(), vb).unwrap();
        (varmap, decoder)
    }

    #[test]
    fn test_forward_shape() {
        let device = Device::Cpu;
        let (_varmap, decoder) = make_decoder(&device);
        let tgt = Tensor::new(&[[1u32, 4, 5, 2], [1, 6, 2, 0]], &device).unwrap();
        let memory = Tensor::randn(0f32, 1.0, (2, 10, 16), &device).unwrap();
        let mask = Tensor::ones((2, 10), DType::U8, &device).unwrap();
        let logits = decoder.forward(&tgt, &memory, Some(&mask), true).unwrap();
        assert_eq!(logits.dims(), &[2, 4, 12]);
    }

    #[test]
    fn test_causality() {
        let device = Device::Cpu;
        let (_varmap, decoder) = make_decoder(&device);
        let memory = Tensor::randn(0f32, 1.0, (1, 6, 16), &device).unwrap();

        let a = Tensor::new(&[[1u32, 4, 5]], &device).unwrap();
        let b = Tensor::new(&[[1u32, 4, 9]], &device).unwrap();
        let la = decoder.forward(&a, &memory, None, false).unwrap();
        let lb = decoder.forward(&b, &memory, None, false).unwrap();

        // Positions before the changed token are unaffected.
        let diff: f32 = (la.i((.., 0..2, ..)).unwrap() - lb.i((.., 0..2, ..)).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5, "diff {diff}");
    }

    #[test]
    fn test_too_long_target_rejected() {
        let device = Device::Cpu;
        let (_varmap, decoder) = make_decoder(&device);
        let tgt = Tensor::zeros((1, 9), DType::U32, &device).unwrap();
        let memory = Tensor::randn(0f32, 1.0, (1, 4, 16), &device).unwrap();
        assert!(decoder.forward(&tgt, &memory, None, false).is_err());
    }

    #[test]
    fn test_generate_bounded() {
        let device = Device::Cpu;
        let (_varmap, decoder) = make_decoder(&device);
        let memory = Tensor::randn(0f32, 1.0, (3, 5, 16), &device).unwrap();
        let mask = Tensor::new(&[[1u8, 1, 1, 0, 0], [1, 1, 1, 1, 1], [1, 0, 0, 0, 0]], &device).unwrap();
        let special = SpecialTokens::default();

        let out = decoder.generate(&memory, Some(&mask), &special, 8).unwrap();
        let (batch, len) = out.dims2().unwrap();
        assert_eq!(batch, 3);
        assert!((1..=8).contains(&len));
        let first: Vec<u32> = out.i((.., 0)).unwrap().to_vec1().unwrap();
        assert_eq!(first, vec![special.sos; 3]);

        // Requests beyond the learned positions are capped.
        let out = decoder.generate(&memory, Some(&mask), &special, 100).unwrap();
        assert!(out.dims2().unwrap().1 <= 8);

        // A single step budget returns only <sos>.
        let out = decoder.generate(&memory, Some(&mask), &special, 1).unwrap();
        assert_eq!(out.dims(), &[3, 1]);
    }

    #[test]
    fn test_generate_stops_when_all_emit_eos() {
        let device = Device::Cpu;
        let cfg = small_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let decoder = TextDecoder::new(&cfg, vb).unwrap();

        // Force every logit towards <eos> via the output bias.
        let special = SpecialTokens::default();
        for (name, var) in varmap.data().lock().unwrap().iter() {
            if name == "output_proj.bias" {
                let mut bias = vec![0f32; cfg.vocab_size];
                bias[special.eos as usize] = 1e4;
                var.set(&Tensor::new(bias.as_slice(), &device).unwrap()).unwrap();
            }
        }

        let memory = Tensor::randn(0f32, 1.0, (2, 4, 16), &device).unwrap();
        let out = decoder.generate(&memory, None, &special, 8).unwrap();
        assert_eq!(out.dims(), &[2, 2]);
        let last: Vec<u32> = out.i((.., 1)).unwrap().to_vec1().unwrap();
        assert_eq!(last, vec![special.eos; 2]);
    }

    #[test]
    fn test_generate_runs_to_max_len_without_eos() {
        let device = Device::Cpu;
        let cfg = small_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let decoder = TextDecoder::new(&cfg, vb).unwrap();

        // Push <eos> far below every other logit so no row ever finishes.
        let special = SpecialTokens::default();
        for (name, var) in varmap.data().lock().unwrap().iter() {
            if name == "output_proj.bias" {
                let mut bias = vec![0f32; cfg.vocab_size];
                bias[special.eos as usize] = -1e4;
                var.set(&Tensor::new(bias.as_slice(), &device).unwrap()).unwrap();
            }
        }

        let memory = Tensor::randn(0f32, 1.0, (2, 4, 16), &device).unwrap();
        let out = decoder.generate(&memory, None, &special, 8).unwrap();
        assert_eq!(out.dims(), &[2, 8]);
        let rows: Vec<Vec<u32>> = out.to_vec2().unwrap();
        for row in rows {
            assert_eq!(row[0], special.sos);
            assert!(row[1..].iter().all(|&t| t != special.eos));
        }
    }
}
