//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unknown algorithm prefix: {0}")]
    UnknownAlgorithmPrefix(String),

    #[error("unimplemented digest algorithm: {0}")]
    UnimplementedAlgorithm(String),

    #[error("invalid hash state: {0}")]
    InvalidHashState(String),

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
