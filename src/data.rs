//! Data alignment and tensorization.
//!
//! ## Components
//!
//! - [`canonical`] — filename → canonical sample id
//! - [`align`] — join keypoint files with translation rows
//! - [`keypoints`] — OpenPose JSON records → body/hands/face coordinate streams
//! - [`sequence`] — pad/truncate to fixed length with prefix masks
//! - [`vocab`] — closed word vocabulary with reserved tokens
//! - [`tokenizer`] — sentence → fixed-length index sequence
//! - [`dataset`] — on-demand sample provider, batches, splits
//! - [`bundle`] — persisted preprocessed tensors + vocabulary
//! - [`inspect`] — structural summaries of raw inputs

pub mod align;
pub mod bundle;
pub mod canonical;
pub mod dataset;
pub mod inspect;
pub mod keypoints;
pub mod sequence;
pub mod tokenizer;
pub mod vocab;

pub use align::{Aligner, AlignmentReport, KeypointEntry, KeypointSource, Sample};
pub use bundle::PreprocessedBundle;
pub use canonical::canonicalize_id;
pub use dataset::{Batch, BatchSource, SampleProvider, SampleTensors};
pub use keypoints::{KeypointRecord, KeypointStreams, extract_keypoints};
pub use sequence::pad_or_truncate;
pub use tokenizer::tokenize;
pub use vocab::Vocabulary;
