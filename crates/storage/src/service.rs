//! Composition root: drivers from configuration, driver selection, and
//! store construction.

use crate::backends::filesystem::FilesystemDriver;
use crate::backends::memory::MemoryDriver;
use crate::backends::s3::S3Driver;
use crate::driver::StorageDriver;
use crate::error::{Result, StorageError};
use crate::paths::PathBuilder;
use crate::store::{BlobStore, StoreLayout};
use caisson_core::locator::{BlobLocator, Scope};
use caisson_core::{Error as CoreError, StorageConfig};
use std::sync::Arc;

/// Build a storage driver from configuration.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn StorageDriver>> {
    config.validate().map_err(StorageError::Core)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let driver = FilesystemDriver::new(path).await?;
            Ok(Arc::new(driver))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let driver = S3Driver::new(
                bucket.clone(),
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(driver))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryDriver::new())),
    }
}

/// Selects the driver serving a given scope, for deployments that spread
/// tenants across buckets or backends. `None` selects the default
/// (global) address space.
pub trait DriverProvider: Send + Sync {
    fn driver_for(&self, scope: Option<&Scope>) -> Result<Arc<dyn StorageDriver>>;
}

/// A provider that serves every scope from one driver.
pub struct StaticDriverProvider {
    driver: Arc<dyn StorageDriver>,
}

impl StaticDriverProvider {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }
}

impl DriverProvider for StaticDriverProvider {
    fn driver_for(&self, _scope: Option<&Scope>) -> Result<Arc<dyn StorageDriver>> {
        Ok(self.driver.clone())
    }
}

/// Binds drivers to blob store instances.
///
/// Delete and redirect support are independent options: not every backend
/// can sign URLs, and digest-addressed deletion is reserved for the
/// garbage collector in global deployments.
pub struct StorageService {
    provider: Arc<dyn DriverProvider>,
    paths: PathBuilder,
    redirect: bool,
    delete_enabled: bool,
    resumable_digests: bool,
}

impl StorageService {
    /// Service over a single driver.
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self::with_provider(Arc::new(StaticDriverProvider::new(driver)))
    }

    /// Service over a dynamic driver provider.
    pub fn with_provider(provider: Arc<dyn DriverProvider>) -> Self {
        Self {
            provider,
            paths: PathBuilder::new(),
            redirect: false,
            delete_enabled: false,
            resumable_digests: true,
        }
    }

    /// Enable redirect serving on stores built by this service.
    pub fn with_redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    /// Enable digest-addressed deletion on the global store.
    pub fn with_delete(mut self, delete_enabled: bool) -> Self {
        self.delete_enabled = delete_enabled;
        self
    }

    /// Enable or disable hash-state checkpointing for uploads.
    pub fn with_resumable_digests(mut self, enabled: bool) -> Self {
        self.resumable_digests = enabled;
        self
    }

    /// Root the persisted layout at a prefix other than `/`.
    pub fn with_path_root(mut self, root: impl Into<String>) -> Self {
        self.paths = PathBuilder::with_root(root);
        self
    }

    /// A scoped store: one blob copy per owning repository.
    pub fn oci_store(&self, scope: impl Into<String>, repo: impl Into<String>) -> Result<BlobStore> {
        let scope = scope.into();
        let repo = repo.into();
        if scope.is_empty() || repo.is_empty() {
            return Err(StorageError::Core(CoreError::Config(
                "scoped stores require a scope and repository".to_string(),
            )));
        }

        let selector = Scope::Registry {
            root: scope.clone(),
            repo: repo.clone(),
        };
        let driver = self.provider.driver_for(Some(&selector))?;
        Ok(self.build(driver, StoreLayout::Scoped { scope, repo }))
    }

    /// The global store: a shared, deduplicated address space.
    pub fn global_store(&self) -> Result<BlobStore> {
        let driver = self.provider.driver_for(None)?;
        Ok(self.build(driver, StoreLayout::Global))
    }

    /// Resolve the store serving a locator's owning scope. Repository
    /// blobs route to their scoped store; generic blobs live in the
    /// global dedup space.
    pub fn store_for(&self, locator: &BlobLocator) -> Result<BlobStore> {
        match &locator.scope {
            Scope::Registry { root, repo } => self.oci_store(root.clone(), repo.clone()),
            Scope::Generic { .. } => self.global_store(),
        }
    }

    fn build(&self, driver: Arc<dyn StorageDriver>, layout: StoreLayout) -> BlobStore {
        BlobStore::new(driver, self.paths.clone(), layout)
            .with_redirect(self.redirect)
            .with_delete(self.delete_enabled)
            .with_resumable_digests(self.resumable_digests)
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("redirect", &self.redirect)
            .field("delete_enabled", &self.delete_enabled)
            .field("resumable_digests", &self.resumable_digests)
            .finish()
    }
}
