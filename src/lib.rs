//! Sign-language keypoint-to-text translation in pure Rust.
//!
//! A candle-based implementation of a temporal cross-modal representation
//! (TCR) model: per-frame OpenPose keypoints are encoded as two streams,
//! fused with cross-attention under a temporal smoothness penalty, and
//! decoded autoregressively into words.
//!
//! ## Architecture
//!
//! ```text
//! keypoint JSON + translation CSV
//!            ↓  align by canonical id
//!   body [L,50]  hands [L,84]  face [L,140]  text [T]
//!            ↓
//! body‖hands → conv encoder ──┐
//!                             ├→ cross-attention fusion ─→ temporal loss
//! face       → conv encoder ──┘            ↓
//!                               transformer decoder (4 layers)
//!                                          ↓
//!                                  logits / greedy text
//! ```
//!
//! ## Modules
//!
//! - [`config`] — model, data and training configuration
//! - [`data`] — alignment, keypoint extraction, vocabulary, batching, bundles
//! - [`model`] — encoder, fusion, decoder and the assembled model
//! - [`train`] — loss, scoring and the training loop

pub mod config;
pub mod data;
pub mod model;
pub mod train;

mod error;

pub use error::{Error, Result, SafeTensorsError};
