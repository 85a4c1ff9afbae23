//! Core domain types for the Caisson blob storage engine.
//!
//! This crate defines the canonical data model used by the storage layer:
//! - Wire digests and the compact relational digest encoding
//! - Incremental hashing with serializable state for resumable uploads
//! - Blob descriptors and multi-tenant blob locators
//! - Upload session identifiers
//! - Storage backend configuration

pub mod config;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod hash;
pub mod locator;
pub mod upload;

pub use config::StorageConfig;
pub use descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
pub use digest::{Algorithm, CompactDigest, Digest, digest_bytes, hex_decoded_bytes};
pub use error::{Error, Result};
pub use hash::{AnyDigester, FileHashes, MultiHasher, ResumableSha256};
pub use locator::{BlobLocator, Scope};
pub use upload::UploadId;
