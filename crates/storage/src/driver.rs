//! Storage driver contract.
//!
//! A [`StorageDriver`] provides primitive byte-range I/O against a backend
//! namespace of slash-separated paths. Any conforming backend plugs into
//! the blob store unmodified; the engine never assumes more than this
//! contract (plus atomic [`StorageDriver::rename`] for publishing).

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

/// A boxed byte reader positioned at a requested offset.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// A boxed stream of file infos for walk operations.
pub type WalkStream = Pin<Box<dyn Stream<Item = Result<FileInfo, DriverError>> + Send>>;

/// Driver-level errors.
///
/// These never cross the blob store boundary raw: the store translates
/// them into blob-semantic errors before callers see them.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{driver}: {message}")]
    Backend {
        driver: &'static str,
        message: String,
    },

    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
}

impl DriverError {
    /// Whether this error means the path simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. })
    }
}

/// Metadata about a stored object or prefix.
#[derive(Clone, Debug)]
pub struct FileInfo {
    /// The queried path.
    pub path: String,
    /// Object size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, if the backend tracks one.
    pub mod_time: Option<OffsetDateTime>,
    /// Whether the path names a directory/prefix rather than an object.
    pub is_dir: bool,
}

/// Primitive byte-range I/O against a storage backend.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Backend identifier, used for metrics and logging.
    fn name(&self) -> &'static str;

    /// Read an entire object into memory.
    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError>;

    /// Atomically replace an object with the given content.
    async fn put_content(&self, path: &str, content: &[u8]) -> Result<(), DriverError>;

    /// Open a reader positioned at `offset`.
    async fn reader(&self, path: &str, offset: u64) -> Result<ByteReader, DriverError>;

    /// Open a writer. With `append`, the writer continues an existing
    /// object; otherwise it starts fresh.
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError>;

    /// Stat a path.
    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError>;

    /// List the direct children of a path, returned as full paths.
    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError>;

    /// Atomically move an object. This is the publish primitive: a rename
    /// either fully lands or doesn't happen.
    async fn rename(&self, from: &str, to: &str) -> Result<(), DriverError>;

    /// Delete an object, or everything under a prefix.
    async fn delete(&self, path: &str) -> Result<(), DriverError>;

    /// Produce a signed URL clients can be redirected to, if the backend
    /// supports direct serving. `None` means "stream it yourself".
    async fn redirect_url(
        &self,
        method: &str,
        path: &str,
        filename: Option<&str>,
    ) -> Result<Option<String>, DriverError>;

    /// Walk all objects under a path, depth-first.
    async fn walk(&self, path: &str) -> Result<WalkStream, DriverError>;
}

/// A handle for writing one object, used by upload sessions.
#[async_trait]
pub trait FileWriter: Send {
    /// Append data to the object.
    async fn write(&mut self, data: &[u8]) -> Result<(), DriverError>;

    /// Total bytes in the object so far, including bytes from a previous
    /// session when opened in append mode.
    fn size(&self) -> u64;

    /// Flush and finalize the object.
    async fn commit(&mut self) -> Result<(), DriverError>;

    /// Discard buffered content and remove the object.
    async fn cancel(&mut self) -> Result<(), DriverError>;

    /// Release resources, keeping written content durable so the object
    /// can be reopened in append mode later.
    async fn close(&mut self) -> Result<(), DriverError>;
}
