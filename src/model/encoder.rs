//! Dual-stream temporal convolution encoder.
//!
//! ```text
//! body ‖ hands [B, L, 134] ─ TemporalConvEncoder ─ [B, L, H]
//! face         [B, L, 140] ─ TemporalConvEncoder ─ [B, L, H]
//! ```
//!
//! Each stack is `num_layers` × (Conv1d(k, same padding) → BatchNorm → ReLU →
//! Dropout), run channels-first over time.

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, Conv1d, Conv1dConfig, Dropout, VarBuilder, batch_norm, conv1d};

use crate::Result;
use crate::config::TcrConfig;

/// One conv → batch norm → ReLU → dropout block.
#[derive(Debug, Clone)]
struct ConvBlock {
    conv: Conv1d,
    bn: BatchNorm,
    dropout: Dropout,
}

impl ConvBlock {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        bn_eps: f64,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv_config = Conv1dConfig {
            padding: kernel_size / 2,
            ..Default::default()
        };
        let conv = conv1d(in_channels, out_channels, kernel_size, conv_config, vb.pp("conv"))?;
        let bn = batch_norm(out_channels, bn_eps, vb.pp("bn"))?;
        Ok(Self {
            conv,
            bn,
            dropout: Dropout::new(dropout),
        })
    }

    /// `x`: `[B, C_in, L]` → `[B, C_out, L]`
    fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        // Batch statistics (and running-stat updates) in training, running stats otherwise.
        let x = self.bn.forward_t(&x, train)?;
        let x = x.relu()?;
        Ok(self.dropout.forward_t(&x, train)?)
    }
}

/// Stack of temporal convolution blocks mapping `[B, L, D]` to `[B, L, H]`.
#[derive(Debug, Clone)]
pub struct TemporalConvEncoder {
    blocks: Vec<ConvBlock>,
    output_dim: usize,
}

impl TemporalConvEncoder {
    pub fn new(input_dim: usize, cfg: &TcrConfig, vb: VarBuilder) -> Result<Self> {
        let mut blocks = Vec::with_capacity(cfg.encoder_layers);
        let mut in_channels = input_dim;
        for i in 0..cfg.encoder_layers {
            blocks.push(ConvBlock::new(
                in_channels,
                cfg.hidden_dim,
                cfg.encoder_kernel_size,
                cfg.batch_norm_eps,
                cfg.dropout,
                vb.pp(format!("blocks.{i}")),
            )?);
            in_channels = cfg.hidden_dim;
        }
        Ok(Self {
            blocks,
            output_dim: in_channels,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// `x`: `[B, L, D]` → `[B, L, H]`
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = x.transpose(1, 2)?.contiguous()?; // [B, D, L]
        for block in &self.blocks {
            h = block.forward(&h, train)?;
        }
        Ok(h.transpose(1, 2)?.contiguous()?)
    }
}

/// Encodings of both streams, time-aligned with the input.
#[derive(Debug, Clone)]
pub struct StreamEncodings {
    /// `[B, L, H]`
    pub body_hands: Tensor,
    /// `[B, L, H]`
    pub face: Tensor,
}

/// Independent encoders for the body+hands stream and the face stream.
#[derive(Debug, Clone)]
pub struct DualStreamEncoder {
    body_hands: TemporalConvEncoder,
    face: TemporalConvEncoder,
}

impl DualStreamEncoder {
    pub fn new(cfg: &TcrConfig, vb: VarBuilder) -> Result<Self> {
        let body_hands = TemporalConvEncoder::new(cfg.body_hands_dim(), cfg, vb.pp("body_hands"))?;
        let face = TemporalConvEncoder::new(cfg.face_dim, cfg, vb.pp("face"))?;
        Ok(Self { body_hands, face })
    }

    /// - `body`: `[B, L, 50]`
    /// - `hands`: `[B, L, 84]`
    /// - `face`: `[B, L, 140]`
    pub fn forward(
        &self,
        body: &Tensor,
        hands: &Tensor,
        face: &Tensor,
        train: bool,
    ) -> Result<StreamEncodings> {
        let body_hands = Tensor::cat(&[body, hands], 2)?;
        Ok(StreamEncodings {
            body_hands: self.body_hands.forward(&body_hands, train)?,
            face: self.face.forward(face, train)?,
        })
    }
}
