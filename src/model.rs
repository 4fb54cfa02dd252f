//! Model components for keypoint-to-text translation.
//!
//! ## Components
//!
//! - [`encoder`] — dual-stream temporal convolution encoder (body+hands, face)
//! - [`fusion`] — cross-modal attention fusion with temporal-consistency loss
//! - [`decoder`] — post-norm transformer decoder with greedy generation
//! - [`tcr`] — the assembled model
//! - [`attention`], [`mask`], [`norm`] — shared building blocks

pub mod attention;
pub mod decoder;
pub mod encoder;
pub mod fusion;
pub mod mask;
pub mod norm;
pub mod tcr;

pub use fusion::FusionOutput;
pub use tcr::{TcrModel, TcrOutput};
