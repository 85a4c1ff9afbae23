//! Canonical storage path layout.
//!
//! Every persisted object lives at a path derived purely from its digest
//! or upload ID. The layout is the on-disk compatibility surface shared
//! with older deployments, so the exact shapes here must not drift:
//!
//! ```text
//! scoped blob:    /<scope>/docker/blobs/<algorithm>/<2-hex>/<full-hex>/data
//! global blob:    /blobs/<algorithm>/<2-hex>/<2-hex>/<full-hex>/data
//! scoped upload:  /<scope>/docker/_uploads/<repo>/<uploadID>/data
//! global upload:  /_uploads/<uploadID>/data
//! hash state:     <upload-dir>/hashstates/<algorithm>/<offset>
//! ```
//!
//! Scoped stores keep the historical single-level fan-out; the global
//! dedup store shards two levels deep for scale.

use caisson_core::digest::{Algorithm, Digest};

/// Sharding depth for scoped blob paths.
const SCOPED_SHARD_LEVELS: usize = 1;

/// Sharding depth for global blob paths.
const GLOBAL_SHARD_LEVELS: usize = 2;

/// A storage path request. One variant per persisted layout; every shape
/// is resolved through the single match in [`PathBuilder::path_for`].
#[derive(Clone, Debug)]
pub enum PathSpec<'a> {
    /// Blob data owned by a tenant scope.
    ScopedBlobData { scope: &'a str, digest: &'a Digest },
    /// Blob data in the shared dedup address space.
    GlobalBlobData { digest: &'a Digest },
    /// Upload temp data for a scoped store.
    ScopedUploadData {
        scope: &'a str,
        repo: &'a str,
        id: &'a str,
    },
    /// Upload temp data for the global store.
    GlobalUploadData { id: &'a str },
    /// Hash state checkpoint for a scoped upload. `offset: None` resolves
    /// the algorithm directory, for listing.
    ScopedUploadHashState {
        scope: &'a str,
        repo: &'a str,
        id: &'a str,
        algorithm: Algorithm,
        offset: Option<u64>,
    },
    /// Hash state checkpoint for a global upload.
    GlobalUploadHashState {
        id: &'a str,
        algorithm: Algorithm,
        offset: Option<u64>,
    },
}

/// Resolves [`PathSpec`]s to storage paths. Pure string mapping, no I/O.
#[derive(Clone, Debug)]
pub struct PathBuilder {
    root: String,
}

impl PathBuilder {
    /// Path builder rooted at `/`.
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Path builder rooted at an explicit prefix. The prefix used to be a
    /// package-level global; it is injected here instead.
    pub fn with_root(root: impl Into<String>) -> Self {
        let mut root = root.into();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self { root }
    }

    /// Resolve a path spec to a storage path.
    pub fn path_for(&self, spec: PathSpec<'_>) -> caisson_core::Result<String> {
        let path = match spec {
            PathSpec::ScopedBlobData { scope, digest } => {
                format!(
                    "{}{scope}/docker/blobs/{}",
                    self.root,
                    blob_suffix(digest, SCOPED_SHARD_LEVELS)?
                )
            }
            PathSpec::GlobalBlobData { digest } => {
                format!(
                    "{}blobs/{}",
                    self.root,
                    blob_suffix(digest, GLOBAL_SHARD_LEVELS)?
                )
            }
            PathSpec::ScopedUploadData { scope, repo, id } => {
                format!("{}{scope}/docker/_uploads/{repo}/{id}/data", self.root)
            }
            PathSpec::GlobalUploadData { id } => {
                format!("{}_uploads/{id}/data", self.root)
            }
            PathSpec::ScopedUploadHashState {
                scope,
                repo,
                id,
                algorithm,
                offset,
            } => {
                let base = format!(
                    "{}{scope}/docker/_uploads/{repo}/{id}/hashstates/{algorithm}",
                    self.root
                );
                match offset {
                    Some(offset) => format!("{base}/{offset}"),
                    None => base,
                }
            }
            PathSpec::GlobalUploadHashState {
                id,
                algorithm,
                offset,
            } => {
                let base = format!("{}_uploads/{id}/hashstates/{algorithm}", self.root);
                match offset {
                    Some(offset) => format!("{base}/{offset}"),
                    None => base,
                }
            }
        };
        Ok(path)
    }
}

impl Default for PathBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `<algorithm>/<shard-dirs...>/<hex>/data`; each sharding level consumes
/// the next two hex characters to bound directory fan-out.
fn blob_suffix(digest: &Digest, levels: usize) -> caisson_core::Result<String> {
    let hex = digest.encoded();
    if hex.len() < levels * 2 {
        return Err(caisson_core::Error::InvalidDigest(format!(
            "digest too short for path sharding: {digest}"
        )));
    }

    let mut path = String::with_capacity(hex.len() * 2);
    path.push_str(digest.algorithm().as_str());
    for level in 0..levels {
        path.push('/');
        path.push_str(&hex[level * 2..level * 2 + 2]);
    }
    path.push('/');
    path.push_str(hex);
    path.push_str("/data");
    Ok(path)
}
