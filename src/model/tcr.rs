//! Full keypoint-to-text model.
//!
//! ```text
//! body, hands, face ─ DualStreamEncoder ─ TemporalFusion ─ memory ─ TextDecoder ─ logits
//!                                               └─ temporal_loss
//! ```

use candle_core::{IndexOp, Tensor};
use candle_nn::{VarBuilder, VarMap};

use super::decoder::TextDecoder;
use super::encoder::DualStreamEncoder;
use super::fusion::{FusionOutput, TemporalFusion};
use crate::Result;
use crate::config::{SpecialTokens, TcrConfig};
use crate::data::Batch;

/// Teacher-forced model output.
#[derive(Debug, Clone)]
pub struct TcrOutput {
    /// `[B, T-1, V]`, predicting `text[:, 1:]` from `text[:, :-1]`.
    pub logits: Tensor,
    /// Scalar temporal-consistency loss of the fused memory.
    pub temporal_loss: Tensor,
}

#[derive(Debug, Clone)]
pub struct TcrModel {
    encoder: DualStreamEncoder,
    fusion: TemporalFusion,
    decoder: TextDecoder,
    config: TcrConfig,
}

impl TcrModel {
    pub fn new(cfg: &TcrConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let encoder = DualStreamEncoder::new(cfg, vb.pp("encoder"))?;
        let fusion = TemporalFusion::new(cfg, vb.pp("fusion"))?;
        let decoder = TextDecoder::new(cfg, vb.pp("decoder"))?;
        Ok(Self {
            encoder,
            fusion,
            decoder,
            config: cfg.clone(),
        })
    }

    pub fn config(&self) -> &TcrConfig {
        &self.config
    }

    /// Encode both streams and fuse them into decoder memory `[B, L, H]`.
    pub fn encode(
        &self,
        body: &Tensor,
        hands: &Tensor,
        face: &Tensor,
        video_mask: &Tensor,
        train: bool,
    ) -> Result<FusionOutput> {
        let streams = self.encoder.forward(body, hands, face, train)?;
        self.fusion
            .forward(&streams.body_hands, &streams.face, Some(video_mask), train)
    }

    /// Teacher-forced forward pass over a batch.
    pub fn forward(&self, batch: &Batch, train: bool) -> Result<TcrOutput> {
        let memory = self.encode(&batch.body, &batch.hands, &batch.face, &batch.video_mask, train)?;
        let (_, text_len) = batch.text.dims2()?;
        let input = batch.text.i((.., ..text_len.saturating_sub(1)))?;
        let logits = self
            .decoder
            .forward(&input, &memory.fused, Some(&batch.video_mask), train)?;
        Ok(TcrOutput {
            logits,
            temporal_loss: memory.temporal_loss,
        })
    }

    /// Greedy generation in eval mode; returns `[B, n]` u32 ids starting with `<sos>`.
    pub fn generate(&self, batch: &Batch, special: &SpecialTokens) -> Result<Tensor> {
        let memory = self.encode(&batch.body, &batch.hands, &batch.face, &batch.video_mask, false)?;
        self.decoder.generate(
            &memory.fused,
            Some(&batch.video_mask),
            special,
            self.decoder.max_len(),
        )
    }

    /// Trainable parameter count; batch-norm running statistics are excluded.
    pub fn num_parameters(varmap: &VarMap) -> usize {
        let data = varmap.data().lock().unwrap_or_else(|e| e.into_inner());
        data.iter()
            .filter(|(name, _)| !name.contains("running_"))
            .map(|(_, var)| var.elem_count())
            .sum()
    }
}
