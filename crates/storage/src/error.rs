//! Blob store error types.

use crate::driver::DriverError;
use thiserror::Error;

/// Blob-semantic errors surfaced by the store layer.
///
/// Driver errors are translated at the store boundary: a missing path
/// becomes [`StorageError::BlobUnknown`], everything else is wrapped.
/// Digest and length validation failures are terminal for an upload and
/// are never retried here.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob unknown to store")]
    BlobUnknown,

    #[error("blob already exists")]
    BlobExists,

    #[error("unsupported digest algorithm")]
    DigestUnsupported,

    #[error("invalid digest {digest}: {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error("blob size does not match descriptor length")]
    InvalidLength,

    #[error("blob upload unknown")]
    UploadUnknown,

    #[error("upload session closed: {0}")]
    UploadClosed(&'static str),

    #[error("blob of {size} bytes exceeds in-memory limit of {limit}")]
    BlobTooLarge { size: u64, limit: u64 },

    #[error("operation not supported by this blob store")]
    Unsupported,

    #[error(transparent)]
    Core(#[from] caisson_core::Error),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
