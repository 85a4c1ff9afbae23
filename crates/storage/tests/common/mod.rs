//! Shared fixtures for storage integration tests.

use caisson_storage::{BlobStore, MemoryDriver, PathBuilder, StorageDriver, StoreLayout};
use std::sync::Arc;

/// A fresh in-memory driver.
#[allow(dead_code)]
pub fn memory_driver() -> Arc<dyn StorageDriver> {
    Arc::new(MemoryDriver::new())
}

/// A global blob store over the given driver.
#[allow(dead_code)]
pub fn global_store(driver: Arc<dyn StorageDriver>) -> BlobStore {
    BlobStore::new(driver, PathBuilder::new(), StoreLayout::Global)
}

/// A scoped blob store over the given driver.
#[allow(dead_code)]
pub fn scoped_store(driver: Arc<dyn StorageDriver>, scope: &str, repo: &str) -> BlobStore {
    BlobStore::new(
        driver,
        PathBuilder::new(),
        StoreLayout::Scoped {
            scope: scope.to_string(),
            repo: repo.to_string(),
        },
    )
}

/// Deterministic test payload.
#[allow(dead_code)]
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u64).wrapping_mul(31).wrapping_add(seed as u64) as u8)
        .collect()
}
