//! Error types for dvae-rs.

use std::path::PathBuf;

use candle_core::DType;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Construction-time parameter violation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Wrong tensor rank or channel count at forward time.
    #[error("shape: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    /// Wrong numeric type at forward time.
    #[error("dtype: expected {expected:?}, got {actual:?}")]
    Dtype { expected: DType, actual: DType },

    /// Remote checkpoint answered with a non-success status.
    #[error("fetch {url}: HTTP {status}")]
    Fetch { url: String, status: u16 },

    /// Transport-level HTTP failure (DNS, TLS, connection reset).
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Local checkpoint does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Model weight loading error.
    #[error("weight loading: {0}")]
    WeightLoad(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(error: safetensors::SafeTensorError) -> Self {
        Error::WeightLoad(error.to_string())
    }
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::Shape {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
