//! Error types for sign-tcr-rs.

use std::fmt;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// I/O error (listing data directories, reading keypoint files).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (keypoint records, config files, bundle metadata).
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Translation table could not be read.
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    /// Safetensors serialization error.
    #[error("safetensors: {0}")]
    SafeTensors(SafeTensorsError),

    /// Preprocessed bundle is missing a tensor or metadata entry.
    #[error("bundle: {0}")]
    Bundle(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Alignment produced no usable samples; downstream stacking needs at least one.
    #[error(
        "no usable samples: 0 matches between {keypoint_files} keypoint files and {translations} translations"
    )]
    NoSamples {
        keypoint_files: usize,
        translations: usize,
    },
}

/// Wrapper for safetensors errors so the crate version does not leak into the public enum.
#[derive(Debug)]
pub struct SafeTensorsError(pub String);

impl fmt::Display for SafeTensorsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(error: safetensors::SafeTensorError) -> Self {
        Error::SafeTensors(SafeTensorsError(format!("{error:?}")))
    }
}
