//! Training and evaluation loop.
//!
//! ```text
//! per step:  forward(train) → CE(text[:,1:]) + w·temporal → backward → clip ‖g‖ → AdamW
//! per epoch: mean step loss, then greedy generation on the validation split → score
//! ```

use std::sync::Arc;

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, IndexOp, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::loss::{combined_loss, masked_cross_entropy};
use super::metrics::sanitize;
use crate::config::{TcrConfig, TrainConfig};
use crate::data::dataset::{BatchSource, batch_indices, split_train_val};
use crate::data::{Batch, Vocabulary};
use crate::model::TcrModel;
use crate::{Error, Result};

/// Corpus scorer: `(predictions, references) -> score in [0, 1]`.
pub type Scorer = Box<dyn Fn(&[String], &[String]) -> f64 + Send + Sync>;

/// Per-epoch training loss and validation score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub val_score: Vec<f64>,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub predictions: Vec<String>,
    pub references: Vec<String>,
}

pub struct Trainer {
    model: TcrModel,
    varmap: VarMap,
    optimizer: AdamW,
    config: TrainConfig,
    vocab: Arc<Vocabulary>,
    scorer: Scorer,
    device: Device,
    rng: ChaCha8Rng,
}

impl Trainer {
    /// Build a freshly initialized model and its optimizer.
    pub fn new(
        model_config: &TcrConfig,
        config: TrainConfig,
        vocab: Arc<Vocabulary>,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        if model_config.vocab_size != vocab.len() {
            return Err(Error::Config(format!(
                "model vocab_size {} does not match vocabulary of {} tokens",
                model_config.vocab_size,
                vocab.len()
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = TcrModel::new(model_config, vb)?;
        tracing::info!(
            parameters = TcrModel::num_parameters(&varmap),
            vocab = vocab.len(),
            hidden = model_config.hidden_dim,
            "model initialized"
        );

        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        let metric = config.metric;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Ok(Self {
            model,
            varmap,
            optimizer,
            config,
            vocab,
            scorer: Box::new(move |p: &[String], r: &[String]| metric.score(p, r)),
            device: device.clone(),
            rng,
        })
    }

    /// Replace the configured metric with an external scorer.
    pub fn with_scorer(
        mut self,
        scorer: impl Fn(&[String], &[String]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn model(&self) -> &TcrModel {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// One optimization step; returns the total loss before the update.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f64> {
        let output = self.model.forward(batch, true)?;
        let targets = batch.text.i((.., 1..))?;
        let ce = masked_cross_entropy(&output.logits, &targets, self.vocab.special().pad)?;
        let loss = combined_loss(&ce, &output.temporal_loss, self.config.tcr_weight)?;

        let mut grads = loss.backward()?;
        let grad_norm = clip_grad_norm(&mut grads, &self.varmap.all_vars(), self.config.max_grad_norm)?;
        self.optimizer.step(&grads)?;

        let loss = f64::from(loss.to_scalar::<f32>()?);
        tracing::debug!(loss, grad_norm, batch = batch.len(), "train step");
        Ok(loss)
    }

    /// Shuffled pass over `indices`; returns the mean step loss.
    pub fn train_epoch<S: BatchSource>(&mut self, source: &S, indices: &[usize]) -> Result<f64> {
        let batches = batch_indices(indices, self.config.batch_size, Some(&mut self.rng));
        let mut total = 0.0;
        for batch_idx in &batches {
            let batch = source.batch(batch_idx)?.to_device(&self.device)?;
            total += self.train_step(&batch)?;
        }
        Ok(if batches.is_empty() {
            0.0
        } else {
            total / batches.len() as f64
        })
    }

    /// Greedy generation over `indices` in order, decoded and scored.
    pub fn evaluate<S: BatchSource>(&self, source: &S, indices: &[usize]) -> Result<Evaluation> {
        let special = *self.vocab.special();
        let mut predictions = Vec::with_capacity(indices.len());
        let mut references = Vec::with_capacity(indices.len());

        for batch_idx in batch_indices(indices, self.config.batch_size, None) {
            let batch = source.batch(&batch_idx)?.to_device(&self.device)?;
            let generated = self.model.generate(&batch, &special)?;
            let rows: Vec<Vec<u32>> = generated.to_vec2()?;
            predictions.extend(rows.iter().map(|row| self.vocab.decode(row)));
            references.extend(batch.translations);
        }

        let score = sanitize((self.scorer)(&predictions, &references));
        Ok(Evaluation {
            score,
            predictions,
            references,
        })
    }

    /// Train for `num_epochs`, evaluating after each epoch.
    pub fn fit<S: BatchSource>(
        &mut self,
        source: &S,
        train_indices: &[usize],
        val_indices: &[usize],
    ) -> Result<TrainingHistory> {
        tracing::info!(
            train = train_indices.len(),
            val = val_indices.len(),
            epochs = self.config.num_epochs,
            "starting training"
        );
        let mut history = TrainingHistory::default();
        for epoch in 1..=self.config.num_epochs {
            let loss = self.train_epoch(source, train_indices)?;
            let eval = self.evaluate(source, val_indices)?;
            tracing::info!(epoch, loss, score = eval.score, "epoch complete");
            if let (Some(prediction), Some(reference)) =
                (eval.predictions.first(), eval.references.first())
            {
                tracing::info!(%prediction, %reference, "sample translation");
            }
            history.train_loss.push(loss);
            history.val_score.push(eval.score);
        }
        Ok(history)
    }

    /// Split `source` with the configured fraction and seed, then [`Self::fit`].
    pub fn fit_split<S: BatchSource>(&mut self, source: &S) -> Result<TrainingHistory> {
        let (train, val) = split_train_val(
            source.num_samples(),
            self.config.train_fraction,
            self.config.seed,
        );
        self.fit(source, &train, &val)
    }
}

/// Scale gradients so their global L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut sum_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += f64::from(grad.sqr()?.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?);
        }
    }
    let norm = sum_sq.sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let scaled = (grad * scale)?;
                grads.insert(var.as_tensor(), scaled);
            }
        }
    }
    Ok(norm)
}
