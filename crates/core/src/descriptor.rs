//! Blob descriptors.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};

/// Default media type for blobs whose type is unknown.
pub const MEDIA_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Describes a stored blob: what it is, how large it is, and the digest
/// that addresses it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Media type of the content. Empty means "unspecified"; stores fill
    /// in [`MEDIA_TYPE_OCTET_STREAM`] when resolving.
    #[serde(default)]
    pub media_type: String,

    /// Content size in bytes. Zero means "unknown" on commit descriptors;
    /// resolved descriptors always carry the actual size.
    pub size: u64,

    /// The content digest.
    pub digest: Digest,
}

impl Descriptor {
    /// Descriptor for known content.
    pub fn new(digest: Digest, size: u64) -> Self {
        Self {
            media_type: MEDIA_TYPE_OCTET_STREAM.to_string(),
            size,
            digest,
        }
    }

    /// Commit descriptor carrying only the expected digest; size and media
    /// type are resolved during validation.
    pub fn for_digest(digest: Digest) -> Self {
        Self {
            media_type: String::new(),
            size: 0,
            digest,
        }
    }
}
