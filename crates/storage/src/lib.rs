//! Blob storage engine for a content-addressable artifact registry.
//!
//! This crate provides:
//! - The [`StorageDriver`] contract and filesystem / S3 / memory backends
//! - Digest-derived storage paths with bounded directory fan-out
//! - Resumable blob uploads with hash-state checkpointing
//! - Scoped and globally-deduplicated blob stores over one implementation

pub mod backends;
pub mod driver;
pub mod error;
pub mod file_reader;
pub mod paths;
pub mod service;
pub mod store;
pub mod writer;

pub use backends::filesystem::FilesystemDriver;
pub use backends::memory::MemoryDriver;
pub use backends::s3::S3Driver;
pub use driver::{ByteReader, DriverError, FileInfo, FileWriter, StorageDriver, WalkStream};
pub use error::{Result, StorageError};
pub use file_reader::FileReader;
pub use paths::{PathBuilder, PathSpec};
pub use service::{DriverProvider, StaticDriverProvider, StorageService, from_config};
pub use store::{BlobHeaders, BlobStore, MAX_BLOB_GET_SIZE, ServedBlob, StoreLayout};
pub use writer::BlobWriter;
