//! Blob locators for multi-tenant routing.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The owning scope of a blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Scope {
    /// A repository inside a tenant registry.
    Registry {
        /// Root tenant/registry identifier.
        root: String,
        /// Repository key within the registry.
        repo: String,
    },
    /// A standalone generic blob, addressed by its own UUID.
    Generic {
        /// The generic blob identifier.
        id: Uuid,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry { root, repo } => write!(f, "{root}/{repo}"),
            Self::Generic { id } => write!(f, "generic/{id}"),
        }
    }
}

/// Identifies a blob by digest plus owning scope, for routing requests to
/// the right storage backend in multi-tenant deployments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocator {
    pub digest: Digest,
    pub scope: Scope,
}

impl BlobLocator {
    pub fn new(digest: Digest, scope: Scope) -> Self {
        Self { digest, scope }
    }
}
