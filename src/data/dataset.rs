//! Sample provider, batches and index splitting.
//!
//! [`SampleProvider`] turns aligned [`Sample`]s into fixed-shape tensors on
//! demand:
//!
//! ```text
//! keypoints → extract → pad/truncate (256) → body [256,50] hands [256,84] face [256,140] video_mask [256]
//! translation → tokenize (50)              → text [50] text_mask [50]
//! ```
//!
//! Construction only reads the shared [`Vocabulary`], so samples can be built
//! concurrently from several threads.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::align::Sample;
use super::keypoints::extract_keypoints;
use super::sequence::pad_or_truncate;
use super::tokenizer::encode_tensor;
use super::vocab::Vocabulary;
use crate::Result;
use crate::config::DataConfig;

/// Tensors of one sample.
#[derive(Debug, Clone)]
pub struct SampleTensors {
    /// `[L, 50]` f32
    pub body: Tensor,
    /// `[L, 84]` f32
    pub hands: Tensor,
    /// `[L, 140]` f32
    pub face: Tensor,
    /// `[L]` u8
    pub video_mask: Tensor,
    /// `[T]` u32
    pub text: Tensor,
    /// `[T]` u8
    pub text_mask: Tensor,
    pub translation: String,
}

/// Stacked samples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, L, 50]`
    pub body: Tensor,
    /// `[B, L, 84]`
    pub hands: Tensor,
    /// `[B, L, 140]`
    pub face: Tensor,
    /// `[B, L]` u8
    pub video_mask: Tensor,
    /// `[B, T]` u32
    pub text: Tensor,
    /// `[B, T]` u8
    pub text_mask: Tensor,
    pub translations: Vec<String>,
}

impl Batch {
    /// Stack per-sample tensors along a new batch dimension.
    pub fn stack(items: &[SampleTensors]) -> Result<Self> {
        fn stack_field(items: &[SampleTensors], field: fn(&SampleTensors) -> &Tensor) -> Result<Tensor> {
            let tensors: Vec<&Tensor> = items.iter().map(field).collect();
            Ok(Tensor::stack(&tensors, 0)?)
        }
        Ok(Self {
            body: stack_field(items, |s| &s.body)?,
            hands: stack_field(items, |s| &s.hands)?,
            face: stack_field(items, |s| &s.face)?,
            video_mask: stack_field(items, |s| &s.video_mask)?,
            text: stack_field(items, |s| &s.text)?,
            text_mask: stack_field(items, |s| &s.text_mask)?,
            translations: items.iter().map(|s| s.translation.clone()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            body: self.body.to_device(device)?,
            hands: self.hands.to_device(device)?,
            face: self.face.to_device(device)?,
            video_mask: self.video_mask.to_device(device)?,
            text: self.text.to_device(device)?,
            text_mask: self.text_mask.to_device(device)?,
            translations: self.translations.clone(),
        })
    }
}

/// Anything that can assemble a [`Batch`] from sample indices.
pub trait BatchSource {
    fn num_samples(&self) -> usize;

    fn batch(&self, indices: &[usize]) -> Result<Batch>;
}

/// Builds sample tensors on demand from aligned samples.
#[derive(Debug, Clone)]
pub struct SampleProvider {
    samples: Vec<Sample>,
    vocab: Arc<Vocabulary>,
    config: DataConfig,
    device: Device,
}

impl SampleProvider {
    pub fn new(samples: Vec<Sample>, vocab: Arc<Vocabulary>, config: DataConfig, device: Device) -> Self {
        Self {
            samples,
            vocab,
            config,
            device,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Build the tensors of sample `idx`.
    pub fn get(&self, idx: usize) -> Result<SampleTensors> {
        let sample = self.samples.get(idx).ok_or_else(|| {
            crate::Error::Config(format!(
                "sample index {idx} out of range for {} samples",
                self.samples.len()
            ))
        })?;
        self.build(sample)
    }

    /// Build the tensors of any sample with this provider's vocabulary and lengths.
    pub fn build(&self, sample: &Sample) -> Result<SampleTensors> {
        let record = sample.keypoint_source.load()?;
        let streams = extract_keypoints(&record);
        let (body, hands, face) = streams.to_tensors(&self.device)?;

        let video_len = self.config.max_video_len;
        let (body, video_mask) = pad_or_truncate(&body, video_len)?;
        let (hands, _) = pad_or_truncate(&hands, video_len)?;
        let (face, _) = pad_or_truncate(&face, video_len)?;

        let (text, text_mask) = encode_tensor(
            &sample.translation,
            &self.vocab,
            self.config.max_text_len,
            &self.device,
        )?;

        Ok(SampleTensors {
            body,
            hands,
            face,
            video_mask,
            text,
            text_mask,
            translation: sample.translation.clone(),
        })
    }
}

impl BatchSource for SampleProvider {
    fn num_samples(&self) -> usize {
        self.len()
    }

    fn batch(&self, indices: &[usize]) -> Result<Batch> {
        let items = indices
            .iter()
            .map(|&i| self.get(i))
            .collect::<Result<Vec<_>>>()?;
        Batch::stack(&items)
    }
}

/// Random train/validation index split.
///
/// The first `floor(fraction * len)` shuffled indices train, the rest validate.
pub fn split_train_val(len: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let train_len = ((fraction.clamp(0.0, 1.0) * len as f64).floor() as usize).min(len);
    let val = indices.split_off(train_len);
    (indices, val)
}

/// Chunk `indices` into batches of at most `batch_size`, shuffled when `rng` is given.
pub fn batch_indices(
    indices: &[usize],
    batch_size: usize,
    rng: Option<&mut ChaCha8Rng>,
) -> Vec<Vec<usize>> {
    let mut order = indices.to_vec();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    order
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}
