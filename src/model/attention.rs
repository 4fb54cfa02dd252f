//! Scaled dot-product multi-head attention.
//!
//! Used for the encoder's cross-modal fusion (body/hands attend to face) and
//! for both attention blocks of each decoder layer.
//!
//! ```text
//! query [B, Tq, dim] ─ to_q ─┐
//! kv    [B, Tk, dim] ─ to_k ─┼─ softmax(Q·Kᵀ/√d + bias) · V ─ to_out ─ [B, Tq, dim]
//!                    ─ to_v ─┘
//! ```

use candle_core::{D, Module, ModuleT, Tensor};
use candle_nn::{Dropout, VarBuilder};

use crate::Result;

/// Multi-head attention with separate query/key/value projections.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    to_q: candle_nn::Linear,
    to_k: candle_nn::Linear,
    to_v: candle_nn::Linear,
    to_out: candle_nn::Linear,
    /// Applied to the attention weights in training mode.
    attn_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(dim: usize, num_heads: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || dim % num_heads != 0 {
            return Err(crate::Error::Config(format!(
                "attention width {dim} not divisible by {num_heads} heads"
            )));
        }
        let to_q = candle_nn::linear(dim, dim, vb.pp("to_q"))?;
        let to_k = candle_nn::linear(dim, dim, vb.pp("to_k"))?;
        let to_v = candle_nn::linear(dim, dim, vb.pp("to_v"))?;
        let to_out = candle_nn::linear(dim, dim, vb.pp("to_out"))?;
        Ok(Self {
            to_q,
            to_k,
            to_v,
            to_out,
            attn_dropout: Dropout::new(dropout),
            num_heads,
            head_dim: dim / num_heads,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Forward pass.
    ///
    /// - `query`: `[B, Tq, dim]`
    /// - `key_value`: `[B, Tk, dim]`
    /// - `bias`: additive scores bias broadcastable to `[B, H, Tq, Tk]`, see
    ///   [`super::mask`]
    ///
    /// Returns `[B, Tq, dim]`.
    pub fn forward(
        &self,
        query: &Tensor,
        key_value: &Tensor,
        bias: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (batch, seq_q, _) = query.dims3()?;
        let (_, seq_k, _) = key_value.dims3()?;

        let q = self.to_q.forward(query)?;
        let k = self.to_k.forward(key_value)?;
        let v = self.to_v.forward(key_value)?;

        // Reshape to [B, H, S, D]
        let q = q
            .reshape((batch, seq_q, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((batch, seq_k, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((batch, seq_k, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? / scale)?;
        let scores = match bias {
            Some(bias) => scores.broadcast_add(&bias.to_dtype(scores.dtype())?)?,
            None => scores,
        };

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let weights = self.attn_dropout.forward_t(&weights, train)?;
        let out = weights.matmul(&v)?; // [B, H, Tq, D]

        let out = out
            .transpose(1, 2)?
            .reshape((batch, seq_q, self.num_heads * self.head_dim))?;
        Ok(self.to_out.forward(&out)?)
    }
}
