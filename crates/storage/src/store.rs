//! Blob stores: digest-addressed reads, small-object puts, and resumable
//! upload sessions over a [`StorageDriver`].
//!
//! One implementation serves both topologies. The scoped layout keeps a
//! copy of each blob per owning repository; the global layout is a single
//! shared digest-keyed address space with maximal dedup, reclaimed only by
//! an external reference-counting collector.

use crate::driver::StorageDriver;
use crate::error::{Result, StorageError};
use crate::file_reader::FileReader;
use crate::paths::{PathBuilder, PathSpec};
use crate::writer::BlobWriter;
use bytes::Bytes;
use caisson_core::digest::{Algorithm, Digest};
use caisson_core::hash::MultiHasher;
use caisson_core::{Descriptor, FileHashes, MEDIA_TYPE_OCTET_STREAM, UploadId};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// Upper bound for fully-buffered [`BlobStore::get`] reads. Larger blobs
/// must be streamed through [`BlobStore::open`].
pub const MAX_BLOB_GET_SIZE: u64 = 4 * 1024 * 1024;

/// Cache lifetime advertised for immutable blob responses (365 days).
const BLOB_CACHE_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Copy buffer for streamed writes.
const WRITE_STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Which address space a store serves.
#[derive(Clone, Debug)]
pub enum StoreLayout {
    /// One blob copy per owning repository; no cross-tenant dedup.
    Scoped { scope: String, repo: String },
    /// Shared digest-keyed address space with store-once dedup.
    Global,
}

impl StoreLayout {
    pub(crate) fn blob_data_path(
        &self,
        paths: &PathBuilder,
        digest: &Digest,
    ) -> caisson_core::Result<String> {
        match self {
            Self::Scoped { scope, .. } => {
                paths.path_for(PathSpec::ScopedBlobData { scope, digest })
            }
            Self::Global => paths.path_for(PathSpec::GlobalBlobData { digest }),
        }
    }

    pub(crate) fn upload_data_path(
        &self,
        paths: &PathBuilder,
        id: &str,
    ) -> caisson_core::Result<String> {
        match self {
            Self::Scoped { scope, repo } => {
                paths.path_for(PathSpec::ScopedUploadData { scope, repo, id })
            }
            Self::Global => paths.path_for(PathSpec::GlobalUploadData { id }),
        }
    }

    pub(crate) fn hash_state_path(
        &self,
        paths: &PathBuilder,
        id: &str,
        algorithm: Algorithm,
        offset: Option<u64>,
    ) -> caisson_core::Result<String> {
        match self {
            Self::Scoped { scope, repo } => paths.path_for(PathSpec::ScopedUploadHashState {
                scope,
                repo,
                id,
                algorithm,
                offset,
            }),
            Self::Global => paths.path_for(PathSpec::GlobalUploadHashState {
                id,
                algorithm,
                offset,
            }),
        }
    }
}

/// Response metadata for serving a blob over HTTP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobHeaders {
    pub etag: String,
    pub cache_control: String,
    pub content_type: String,
    pub content_length: u64,
    pub content_digest: String,
}

impl BlobHeaders {
    fn for_descriptor(desc: &Descriptor) -> Self {
        let content_type = if desc.media_type.is_empty() {
            MEDIA_TYPE_OCTET_STREAM.to_string()
        } else {
            desc.media_type.clone()
        };
        Self {
            etag: format!("\"{}\"", desc.digest),
            cache_control: format!("max-age={BLOB_CACHE_MAX_AGE_SECS}"),
            content_type,
            content_length: desc.size,
            content_digest: desc.digest.to_string(),
        }
    }
}

/// How a blob should be served to a client.
#[derive(Debug)]
pub enum ServedBlob {
    /// Redirect the client to a signed backend URL.
    Redirect { url: String, size: u64 },
    /// Stream the content directly.
    Stream {
        reader: FileReader,
        headers: BlobHeaders,
        descriptor: Descriptor,
    },
}

/// A digest-addressed blob store over one driver and one layout.
#[derive(Clone)]
pub struct BlobStore {
    driver: Arc<dyn StorageDriver>,
    paths: PathBuilder,
    layout: StoreLayout,
    redirect: bool,
    delete_enabled: bool,
    resumable_digest_enabled: bool,
}

impl BlobStore {
    /// Create a store over `driver` with the given layout. Redirects and
    /// deletes are off until enabled.
    pub fn new(driver: Arc<dyn StorageDriver>, paths: PathBuilder, layout: StoreLayout) -> Self {
        Self {
            driver,
            paths,
            layout,
            redirect: false,
            delete_enabled: false,
            resumable_digest_enabled: true,
        }
    }

    /// Enable or disable redirect serving for this store.
    pub fn with_redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    /// Enable or disable digest-addressed deletion for this store.
    pub fn with_delete(mut self, delete_enabled: bool) -> Self {
        self.delete_enabled = delete_enabled;
        self
    }

    /// Enable or disable hash-state checkpointing for upload sessions.
    pub fn with_resumable_digests(mut self, enabled: bool) -> Self {
        self.resumable_digest_enabled = enabled;
        self
    }

    fn blob_path(&self, digest: &Digest) -> Result<String> {
        Ok(self.layout.blob_data_path(&self.paths, digest)?)
    }

    /// Resolve the descriptor for a blob. Success is a strong guarantee
    /// the blob exists and is readable.
    pub async fn stat(&self, digest: &Digest) -> Result<Descriptor> {
        let path = self.blob_path(digest)?;
        match self.driver.stat(&path).await {
            Ok(info) if info.is_dir => {
                warn!(%path, "blob path should not be a directory");
                Err(StorageError::BlobUnknown)
            }
            Ok(info) => Ok(Descriptor::new(digest.clone(), info.size)),
            Err(err) if err.is_not_found() => Err(StorageError::BlobUnknown),
            Err(err) => Err(err.into()),
        }
    }

    /// Size of a stored blob, for cheap existence probes.
    pub async fn stat_size(&self, digest: &Digest) -> Result<u64> {
        self.stat(digest).await.map(|desc| desc.size)
    }

    /// Read a blob fully into memory. Bounded by [`MAX_BLOB_GET_SIZE`];
    /// larger payloads must use [`BlobStore::open`].
    pub async fn get(&self, digest: &Digest) -> Result<Bytes> {
        let desc = self.stat(digest).await?;
        if desc.size > MAX_BLOB_GET_SIZE {
            return Err(StorageError::BlobTooLarge {
                size: desc.size,
                limit: MAX_BLOB_GET_SIZE,
            });
        }

        let path = self.blob_path(digest)?;
        match self.driver.get_content(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.is_not_found() => Err(StorageError::BlobUnknown),
            Err(err) => Err(err.into()),
        }
    }

    /// Open a seekable reader over a blob.
    pub async fn open(&self, digest: &Digest) -> Result<FileReader> {
        let desc = self.stat(digest).await?;
        let path = self.blob_path(&desc.digest)?;
        Ok(FileReader::new(self.driver.clone(), path, desc.size))
    }

    /// Store a small object directly, computing its digest. Content
    /// already present is not rewritten. Intended for manifests and other
    /// small metadata blobs; uploads of real layers go through
    /// [`BlobStore::create`].
    pub async fn put(&self, content: &[u8]) -> Result<Descriptor> {
        let digest = Digest::canonical_from_bytes(content);
        match self.stat(&digest).await {
            Ok(desc) => return Ok(desc),
            Err(StorageError::BlobUnknown) => {}
            Err(err) => {
                debug!(%digest, error = %err, "error stating content before put");
                return Err(err);
            }
        }

        let path = self.blob_path(&digest)?;
        self.driver.put_content(&path, content).await?;
        Ok(Descriptor::new(digest, content.len() as u64))
    }

    /// Begin a resumable upload session.
    pub async fn create(&self) -> Result<BlobWriter> {
        let id = UploadId::new().to_string();
        debug!(upload_id = %id, "creating blob upload");
        BlobWriter::open(
            self.driver.clone(),
            self.paths.clone(),
            self.layout.clone(),
            id,
            false,
            self.resumable_digest_enabled,
        )
        .await
    }

    /// Reopen an existing upload session in append mode. Hash state is
    /// restored lazily on the next write.
    pub async fn resume(&self, id: &str) -> Result<BlobWriter> {
        let id = UploadId::parse(id)?;
        debug!(upload_id = %id, "resuming blob upload");
        BlobWriter::open(
            self.driver.clone(),
            self.paths.clone(),
            self.layout.clone(),
            id.to_string(),
            true,
            self.resumable_digest_enabled,
        )
        .await
    }

    /// Stream `reader` into an open upload session while hashing it under
    /// every indexable algorithm.
    pub async fn write_stream<R>(&self, writer: &mut BlobWriter, mut reader: R) -> Result<FileHashes>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut hasher = MultiHasher::new();
        let mut buf = vec![0u8; WRITE_STREAM_BUFFER_SIZE];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(crate::driver::DriverError::Io)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Resolve a blob for serving: a redirect URL when the store allows it
    /// and the driver can sign one, otherwise a seekable reader plus
    /// response headers.
    pub async fn serve_blob(&self, digest: &Digest, method: &str) -> Result<ServedBlob> {
        let desc = self.stat(digest).await?;
        let path = self.blob_path(&desc.digest)?;

        if self.redirect {
            if let Some(url) = self.driver.redirect_url(method, &path, None).await? {
                debug!(%digest, "serving blob via redirect");
                return Ok(ServedBlob::Redirect {
                    url,
                    size: desc.size,
                });
            }
        }

        let reader = FileReader::new(self.driver.clone(), path, desc.size);
        let headers = BlobHeaders::for_descriptor(&desc);
        Ok(ServedBlob::Stream {
            reader,
            headers,
            descriptor: desc,
        })
    }

    /// Delete a blob by digest.
    ///
    /// Scoped stores refuse: their blobs are reclaimed by removing the
    /// whole scope prefix. Global deletion requires the delete option and
    /// belongs to the external reference-counting collector.
    pub async fn delete(&self, digest: &Digest) -> Result<()> {
        match self.layout {
            StoreLayout::Scoped { .. } => Err(StorageError::Unsupported),
            StoreLayout::Global => {
                if !self.delete_enabled {
                    return Err(StorageError::Unsupported);
                }
                let data_path = self.blob_path(digest)?;
                let blob_dir = data_path
                    .strip_suffix("/data")
                    .unwrap_or(data_path.as_str())
                    .to_string();
                match self.driver.delete(&blob_dir).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_not_found() => Err(StorageError::BlobUnknown),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("driver", &self.driver.name())
            .field("layout", &self.layout)
            .field("redirect", &self.redirect)
            .field("delete_enabled", &self.delete_enabled)
            .finish()
    }
}
