//! Resumable blob upload sessions.
//!
//! A [`BlobWriter`] streams bytes to an upload temp path while hashing
//! them incrementally. `close` checkpoints the digester state so a later
//! session (possibly in another process) can resume without re-reading
//! everything already written; `commit` validates the content against the
//! requested digest and publishes it to its content-addressed path with a
//! single atomic rename.

use crate::driver::{DriverError, FileWriter, StorageDriver};
use crate::error::{Result, StorageError};
use crate::file_reader::FileReader;
use crate::paths::PathBuilder;
use crate::store::StoreLayout;
use caisson_core::digest::{Algorithm, Digest};
use caisson_core::hash::{AnyDigester, ResumableSha256};
use caisson_core::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
use std::sync::Arc;
use tracing::{debug, warn};

/// Read buffer for hash reconciliation and full verification.
const VERIFY_BUFFER_SIZE: usize = 64 * 1024;

/// A resumable upload session. Open until `commit` or `cancel`; both
/// terminal states are final and idempotent.
pub struct BlobWriter {
    driver: Arc<dyn StorageDriver>,
    paths: PathBuilder,
    layout: StoreLayout,
    id: String,
    path: String,
    file_writer: Box<dyn FileWriter>,
    digester: ResumableSha256,
    written: u64,
    resumable_digest_enabled: bool,
    committed: Option<Descriptor>,
    cancelled: bool,
    closed: bool,
}

impl BlobWriter {
    pub(crate) async fn open(
        driver: Arc<dyn StorageDriver>,
        paths: PathBuilder,
        layout: StoreLayout,
        id: String,
        append: bool,
        resumable_digest_enabled: bool,
    ) -> Result<Self> {
        let path = layout.upload_data_path(&paths, &id)?;
        let file_writer = match driver.writer(&path, append).await {
            Ok(writer) => writer,
            Err(err) if append && err.is_not_found() => {
                return Err(StorageError::UploadUnknown);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            driver,
            paths,
            layout,
            id,
            path,
            file_writer,
            digester: ResumableSha256::new(),
            written: 0,
            resumable_digest_enabled,
            committed: None,
            cancelled: false,
            closed: false,
        })
    }

    /// Opaque identifier for this upload session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Total bytes in the upload temp object.
    pub fn size(&self) -> u64 {
        self.file_writer.size()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.committed.is_some() {
            return Err(StorageError::UploadClosed("already committed"));
        }
        if self.cancelled {
            return Err(StorageError::UploadClosed("already cancelled"));
        }
        if self.closed {
            return Err(StorageError::UploadClosed("writer closed"));
        }
        Ok(())
    }

    /// Append a chunk to the upload.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        // Bring the digester in line with what the backend already holds
        // before hashing new bytes; a resumed session starts from zero.
        if self.resumable_digest_enabled {
            self.resume_digest().await?;
        }

        self.file_writer.write(data).await?;
        self.digester.update(data);
        self.written += data.len() as u64;
        Ok(data.len())
    }

    /// Persist a hash-state checkpoint and release the backend writer.
    /// The upload stays resumable; calling after `commit` is an error.
    pub async fn close(&mut self) -> Result<()> {
        if self.committed.is_some() {
            return Err(StorageError::UploadClosed("closed after commit"));
        }
        if self.closed {
            return Ok(());
        }
        debug!(upload_id = %self.id, size = self.size(), "closing blob writer");

        if self.resumable_digest_enabled && !self.cancelled {
            self.store_hash_state().await?;
        }
        self.file_writer.close().await?;
        self.closed = true;
        Ok(())
    }

    /// Validate the upload against `desc` and publish it.
    ///
    /// Returns the canonical descriptor. Idempotent: a second commit
    /// returns the same descriptor without touching storage.
    pub async fn commit(&mut self, desc: Descriptor) -> Result<Descriptor> {
        if let Some(committed) = &self.committed {
            return Ok(committed.clone());
        }
        if self.cancelled {
            return Err(StorageError::UploadClosed("already cancelled"));
        }
        debug!(
            upload_id = %self.id,
            digest = %desc.digest,
            desc_size = desc.size,
            "committing blob upload"
        );

        self.file_writer.commit().await?;
        if let Err(err) = self.close().await {
            warn!(upload_id = %self.id, error = %err, "failed to close writer during commit");
        }

        let canonical = self.validate_blob(desc).await?;
        self.move_blob(&canonical).await?;
        self.remove_resources().await?;

        self.committed = Some(canonical.clone());
        debug!(upload_id = %self.id, digest = %canonical.digest, "blob committed");
        Ok(canonical)
    }

    /// Abort the upload and remove its temp data and checkpoints.
    /// Idempotent, and a no-op after a successful commit, so it is safe to
    /// call from deferred cleanup paths.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.committed.is_some() || self.cancelled {
            return Ok(());
        }
        debug!(upload_id = %self.id, "cancelling blob upload");
        self.cancelled = true;

        self.file_writer.cancel().await?;
        if let Err(err) = self.close().await {
            warn!(upload_id = %self.id, error = %err, "error closing writer during cancel");
        }
        self.remove_resources().await
    }

    /// Reconcile the in-memory digester with the bytes the backend
    /// actually holds. Loads the best persisted checkpoint, then hashes
    /// only the remaining gap out of the temp object. Fails rather than
    /// letting a wrong digest through when the gap cannot be closed.
    async fn resume_digest(&mut self) -> Result<()> {
        let target = self.file_writer.size();
        let hashed = self.digester.bytes_hashed();
        if hashed == target {
            return Ok(());
        }
        if hashed > target {
            return Err(StorageError::Driver(DriverError::Io(std::io::Error::other(
                format!(
                    "digester is ahead of upload data: hashed {hashed}, stored {target}"
                ),
            ))));
        }

        if hashed == 0 {
            if let Some(state) = self.best_hash_state(target).await? {
                self.digester = state;
                debug!(
                    upload_id = %self.id,
                    offset = self.digester.bytes_hashed(),
                    "restored hash state from checkpoint"
                );
            }
        }

        let position = self.digester.bytes_hashed();
        if position == target {
            return Ok(());
        }

        debug!(
            upload_id = %self.id,
            from = position,
            to = target,
            "hashing gap from upload data"
        );
        let mut reader = FileReader::new(self.driver.clone(), self.path.clone(), target);
        reader
            .seek(std::io::SeekFrom::Start(position))
            .map_err(StorageError::Driver)?;
        let mut buf = vec![0u8; VERIFY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.digester.update(&buf[..n]);
        }
        reader.close();

        if self.digester.bytes_hashed() != target {
            return Err(StorageError::Driver(DriverError::Io(std::io::Error::other(
                "cannot resume digest: upload data is shorter than expected",
            ))));
        }
        Ok(())
    }

    /// Find the persisted checkpoint with the largest offset at or below
    /// `target`. Unreadable checkpoints are skipped, not fatal; the gap
    /// read recovers from offset zero in the worst case.
    async fn best_hash_state(&self, target: u64) -> Result<Option<ResumableSha256>> {
        let prefix =
            self.layout
                .hash_state_path(&self.paths, &self.id, Algorithm::CANONICAL, None)?;
        let entries = match self.driver.list(&prefix).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut best: Option<(u64, String)> = None;
        for entry in entries {
            let Some(offset) = entry
                .rsplit('/')
                .next()
                .and_then(|segment| segment.parse::<u64>().ok())
            else {
                warn!(upload_id = %self.id, path = %entry, "skipping malformed hash state path");
                continue;
            };
            if offset > target {
                continue;
            }
            if best.as_ref().is_none_or(|(b, _)| offset > *b) {
                best = Some((offset, entry));
            }
        }

        let Some((offset, path)) = best else {
            return Ok(None);
        };
        let payload = match self.driver.get_content(&path).await {
            Ok(payload) => payload,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match ResumableSha256::deserialize_state(&payload) {
            Ok(state) if state.bytes_hashed() == offset => Ok(Some(state)),
            Ok(_) => {
                warn!(upload_id = %self.id, offset, "hash state offset disagrees with path");
                Ok(None)
            }
            Err(err) => {
                warn!(upload_id = %self.id, offset, error = %err, "discarding unreadable hash state");
                Ok(None)
            }
        }
    }

    /// Persist the digester state at its current offset.
    async fn store_hash_state(&mut self) -> Result<()> {
        let offset = self.digester.bytes_hashed();
        let path = self.layout.hash_state_path(
            &self.paths,
            &self.id,
            Algorithm::CANONICAL,
            Some(offset),
        )?;
        debug!(upload_id = %self.id, offset, "persisting hash state checkpoint");
        self.driver
            .put_content(&path, &self.digester.serialize_state())
            .await?;
        Ok(())
    }

    /// Check the uploaded content against the requested descriptor,
    /// returning the canonical descriptor on success.
    ///
    /// Verification is tiered by cost: the resumable digester when its
    /// algorithm matches; the session digester when this session wrote
    /// every byte and the canonical algorithm was requested; a full
    /// re-read of the temp object otherwise.
    async fn validate_blob(&mut self, mut desc: Descriptor) -> Result<Descriptor> {
        let mut verified = false;
        let mut full_hash = false;
        let mut canonical: Option<Digest> = None;

        let size = match self.driver.stat(&self.path).await {
            Ok(info) => {
                if info.is_dir {
                    return Err(StorageError::Driver(DriverError::InvalidPath {
                        path: self.path.clone(),
                    }));
                }
                info.size
            }
            Err(err) if err.is_not_found() => 0,
            Err(err) => return Err(err.into()),
        };

        if desc.size > 0 {
            if desc.size != size {
                debug!(
                    upload_id = %self.id,
                    expected = desc.size,
                    actual = size,
                    "blob size mismatch"
                );
                return Err(StorageError::InvalidLength);
            }
        } else {
            desc.size = size;
        }

        if self.resumable_digest_enabled {
            self.resume_digest().await?;
            let digest = self.digester.finalize_digest();
            if digest.algorithm() == desc.digest.algorithm() {
                verified = digest == desc.digest;
            } else {
                full_hash = true;
            }
            canonical = Some(digest);
        } else {
            full_hash = true;
        }

        // The session saw every byte: the in-memory digester is usable
        // even without checkpoint support, as long as the caller asked for
        // the canonical algorithm.
        if full_hash
            && self.written == size
            && desc.digest.algorithm() == Algorithm::CANONICAL
        {
            let digest = self.digester.finalize_digest();
            verified = digest == desc.digest;
            canonical = Some(digest);
            full_hash = false;
        }

        if full_hash && !verified {
            debug!(upload_id = %self.id, "verifying blob with a full re-read");
            let mut canonical_digester = ResumableSha256::new();
            let mut requested_digester = AnyDigester::new(desc.digest.algorithm());

            let mut reader = FileReader::new(self.driver.clone(), self.path.clone(), desc.size);
            let mut buf = vec![0u8; VERIFY_BUFFER_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                canonical_digester.update(&buf[..n]);
                requested_digester.update(&buf[..n]);
            }
            reader.close();

            verified = requested_digester.finalize() == desc.digest;
            canonical = Some(canonical_digester.finalize_digest());
        }

        if !verified {
            debug!(
                upload_id = %self.id,
                digest = %desc.digest,
                "canonical digest does not match provided digest"
            );
            return Err(StorageError::InvalidDigest {
                digest: desc.digest.to_string(),
                reason: "content does not match digest".to_string(),
            });
        }

        desc.digest = canonical.expect("verified implies a canonical digest");
        if desc.media_type.is_empty() {
            desc.media_type = MEDIA_TYPE_OCTET_STREAM.to_string();
        }
        Ok(desc)
    }

    /// Move the validated content to its content-addressed destination.
    /// If the destination exists the move is skipped: identical digests
    /// mean identical bytes, so the racing loser only wastes work.
    async fn move_blob(&mut self, desc: &Descriptor) -> Result<()> {
        let blob_path = self.layout.blob_data_path(&self.paths, &desc.digest)?;

        match self.driver.stat(&blob_path).await {
            Ok(_) => {
                debug!(
                    upload_id = %self.id,
                    digest = %desc.digest,
                    "blob already exists at destination, skipping move"
                );
                return Ok(());
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        // An upload that never received data has no temp object. The only
        // digest that legitimately matches is the empty-content digest;
        // materialize it as a zero-byte object.
        match self.driver.stat(&self.path).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                if desc.digest == Digest::empty_content() {
                    debug!(upload_id = %self.id, "writing empty blob for empty digest");
                    return Ok(self.driver.put_content(&blob_path, &[]).await?);
                }
                warn!(
                    upload_id = %self.id,
                    digest = %desc.digest,
                    "attempted to move zero-length content with non-zero digest"
                );
            }
            Err(err) => return Err(err.into()),
        }

        debug!(
            upload_id = %self.id,
            from = %self.path,
            to = %blob_path,
            "moving blob to permanent location"
        );
        self.driver.rename(&self.path, &blob_path).await?;
        Ok(())
    }

    /// Remove the upload directory, including any hash-state checkpoints.
    /// Resources already gone are not an error.
    async fn remove_resources(&mut self) -> Result<()> {
        let upload_dir = self
            .path
            .strip_suffix("/data")
            .unwrap_or(self.path.as_str())
            .to_string();
        debug!(upload_id = %self.id, dir = %upload_dir, "removing upload resources");
        match self.driver.delete(&upload_dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => {
                warn!(upload_id = %self.id, error = %err, "unable to delete upload resources");
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("written", &self.written)
            .field("committed", &self.committed.is_some())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
