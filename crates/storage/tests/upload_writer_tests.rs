//! Integration tests for resumable upload sessions.

mod common;

use caisson_core::digest::{Algorithm, Digest};
use caisson_core::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
use caisson_storage::{StorageDriver, StorageError, StoreLayout};
use common::{global_store, memory_driver, payload, scoped_store};

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_create_write_commit() {
    let store = global_store(memory_driver());
    let content = payload(1, 8192);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    writer.write(&content).await.expect("write failed");
    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");

    assert_eq!(desc.size, 8192);
    assert_eq!(desc.digest, digest);
    assert_eq!(desc.media_type, MEDIA_TYPE_OCTET_STREAM);

    let fetched = store.get(&digest).await.expect("get failed");
    assert_eq!(&fetched[..], &content[..]);
}

#[tokio::test]
async fn test_chunked_upload_resume_scenario() {
    let driver = memory_driver();
    let store = global_store(driver.clone());
    let chunk = vec![0u8; MIB];
    let full = vec![0u8; 2 * MIB];
    let digest = Digest::canonical_from_bytes(&full);

    let mut writer = store.create().await.expect("create failed");
    let id = writer.id().to_string();
    writer.write(&chunk).await.expect("first write failed");
    writer.close().await.expect("close failed");

    // Closing persisted a hash-state checkpoint at the current offset.
    let state_path = format!("/_uploads/{id}/hashstates/sha256/{MIB}");
    driver
        .get_content(&state_path)
        .await
        .expect("hash state checkpoint should exist after close");

    // A new session continues where the first left off.
    let mut writer = store.resume(&id).await.expect("resume failed");
    assert_eq!(writer.size(), MIB as u64);
    writer.write(&chunk).await.expect("second write failed");

    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");
    assert_eq!(desc.size, 2 * MIB as u64);
    assert_eq!(desc.digest, digest);

    // The blob is served from its canonical location without re-upload,
    // and the upload's temp resources are gone.
    let statted = store.stat(&digest).await.expect("stat failed");
    assert_eq!(statted, desc);
    assert!(driver.get_content(&state_path).await.is_err());
    assert!(
        driver
            .stat(&format!("/_uploads/{id}/data"))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_resume_then_commit_without_new_writes() {
    let store = global_store(memory_driver());
    let content = payload(2, 300_000);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    let id = writer.id().to_string();
    writer.write(&content).await.expect("write failed");
    writer.close().await.expect("close failed");

    // The restored checkpoint alone must be enough to validate.
    let mut writer = store.resume(&id).await.expect("resume failed");
    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");
    assert_eq!(desc.digest, digest);
    assert_eq!(desc.size, content.len() as u64);
}

#[tokio::test]
async fn test_commit_detects_corruption_and_moves_nothing() {
    let store = global_store(memory_driver());
    let content = payload(3, 2048);
    let wrong_digest = Digest::canonical_from_bytes(b"something else entirely");

    let mut writer = store.create().await.expect("create failed");
    writer.write(&content).await.expect("write failed");

    match writer.commit(Descriptor::for_digest(wrong_digest.clone())).await {
        Err(StorageError::InvalidDigest { digest, .. }) => {
            assert_eq!(digest, wrong_digest.to_string());
        }
        other => panic!("expected InvalidDigest, got {other:?}"),
    }

    // Neither the claimed nor the actual digest was published.
    assert!(matches!(
        store.stat(&wrong_digest).await,
        Err(StorageError::BlobUnknown)
    ));
    assert!(matches!(
        store.stat(&Digest::canonical_from_bytes(&content)).await,
        Err(StorageError::BlobUnknown)
    ));
}

#[tokio::test]
async fn test_commit_rejects_size_mismatch() {
    let store = global_store(memory_driver());
    let content = payload(4, 1000);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    writer.write(&content).await.expect("write failed");

    let desc = Descriptor {
        media_type: String::new(),
        size: 999,
        digest,
    };
    assert!(matches!(
        writer.commit(desc).await,
        Err(StorageError::InvalidLength)
    ));
}

#[tokio::test]
async fn test_zero_length_blob_commit() {
    let store = global_store(memory_driver());
    let digest = Digest::empty_content();

    let mut writer = store.create().await.expect("create failed");
    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");

    assert_eq!(desc.size, 0);
    assert_eq!(desc.digest, digest);

    let statted = store.stat(&digest).await.expect("stat failed");
    assert_eq!(statted.size, 0);
    let fetched = store.get(&digest).await.expect("get failed");
    assert!(fetched.is_empty());
}

#[tokio::test]
async fn test_cancel_removes_all_resources() {
    let driver = memory_driver();
    let store = global_store(driver.clone());
    let content = payload(5, 4096);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    let id = writer.id().to_string();
    writer.write(&content).await.expect("write failed");
    writer.close().await.expect("close failed");

    let mut writer = store.resume(&id).await.expect("resume failed");
    writer.cancel().await.expect("cancel failed");

    // No temp data, no checkpoints, nothing published.
    assert!(driver.list(&format!("/_uploads/{id}")).await.is_err());
    assert!(matches!(
        store.stat(&digest).await,
        Err(StorageError::BlobUnknown)
    ));

    // Cancel is idempotent, and writes are refused afterwards.
    writer.cancel().await.expect("second cancel failed");
    assert!(matches!(
        writer.write(b"more").await,
        Err(StorageError::UploadClosed(_))
    ));
}

#[tokio::test]
async fn test_commit_is_idempotent() {
    let store = global_store(memory_driver());
    let content = payload(6, 512);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    writer.write(&content).await.expect("write failed");
    let first = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");
    let second = writer
        .commit(Descriptor::for_digest(digest))
        .await
        .expect("second commit failed");
    assert_eq!(first, second);

    // Cancel after a successful commit is a safe no-op.
    writer.cancel().await.expect("cancel after commit failed");
}

#[tokio::test]
async fn test_duplicate_content_commits_once() {
    let store = global_store(memory_driver());
    let content = payload(7, 2048);
    let digest = Digest::canonical_from_bytes(&content);

    for _ in 0..2 {
        let mut writer = store.create().await.expect("create failed");
        writer.write(&content).await.expect("write failed");
        let desc = writer
            .commit(Descriptor::for_digest(digest.clone()))
            .await
            .expect("commit failed");
        assert_eq!(desc.digest, digest);
    }

    let statted = store.stat(&digest).await.expect("stat failed");
    assert_eq!(statted.size, content.len() as u64);
}

#[tokio::test]
async fn test_close_after_commit_is_an_error() {
    let store = global_store(memory_driver());
    let content = payload(8, 64);

    let mut writer = store.create().await.expect("create failed");
    writer.write(&content).await.expect("write failed");
    writer
        .commit(Descriptor::for_digest(Digest::canonical_from_bytes(&content)))
        .await
        .expect("commit failed");

    assert!(matches!(
        writer.close().await,
        Err(StorageError::UploadClosed(_))
    ));
}

#[tokio::test]
async fn test_commit_with_sha512_descriptor_returns_canonical() {
    let store = global_store(memory_driver());
    let content = payload(9, 100_000);
    let sha512 = Digest::from_bytes(Algorithm::Sha512, &content);
    let canonical = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    writer.write(&content).await.expect("write failed");
    let desc = writer
        .commit(Descriptor::for_digest(sha512))
        .await
        .expect("commit failed");

    // Content is verified against the requested algorithm but published
    // under its canonical address.
    assert_eq!(desc.digest, canonical);
    assert!(store.stat(&canonical).await.is_ok());
}

#[tokio::test]
async fn test_resume_without_checkpoints_still_validates() {
    let driver = memory_driver();
    let store = global_store(driver.clone()).with_resumable_digests(false);
    let content = payload(10, 150_000);
    let digest = Digest::canonical_from_bytes(&content);
    let split = 70_000;

    let mut writer = store.create().await.expect("create failed");
    let id = writer.id().to_string();
    writer.write(&content[..split]).await.expect("write failed");
    writer.close().await.expect("close failed");

    // No checkpoints were persisted.
    assert!(
        driver
            .list(&format!("/_uploads/{id}/hashstates/sha256"))
            .await
            .is_err()
    );

    // The resumed session wrote only the tail, so commit must fall back
    // to a full re-read to verify.
    let mut writer = store.resume(&id).await.expect("resume failed");
    writer.write(&content[split..]).await.expect("write failed");
    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");
    assert_eq!(desc.digest, digest);
    assert_eq!(desc.size, content.len() as u64);
}

#[tokio::test]
async fn test_resume_rejects_invalid_and_unknown_ids() {
    let store = global_store(memory_driver());

    assert!(matches!(
        store.resume("../../escape").await,
        Err(StorageError::Core(_))
    ));
    assert!(matches!(
        store
            .resume("00000000-0000-4000-8000-000000000000")
            .await,
        Err(StorageError::UploadUnknown)
    ));
}

#[tokio::test]
async fn test_scoped_upload_layout() {
    let driver = memory_driver();
    let store = scoped_store(driver.clone(), "acme", "web");
    let content = payload(11, 1024);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    let id = writer.id().to_string();
    writer.write(&content).await.expect("write failed");
    writer.close().await.expect("close failed");

    driver
        .stat(&format!("/acme/docker/_uploads/web/{id}/data"))
        .await
        .expect("scoped upload temp path should exist");

    let mut writer = store.resume(&id).await.expect("resume failed");
    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");
    assert_eq!(desc.digest, digest);

    let hex = digest.encoded();
    driver
        .stat(&format!(
            "/acme/docker/blobs/sha256/{}/{hex}/data",
            &hex[..2]
        ))
        .await
        .expect("scoped blob path should exist");
}

#[tokio::test]
async fn test_write_stream_hashes_all_algorithms() {
    let store = global_store(memory_driver());
    let content = payload(12, 50_000);
    let digest = Digest::canonical_from_bytes(&content);

    let mut writer = store.create().await.expect("create failed");
    let hashes = store
        .write_stream(&mut writer, content.as_slice())
        .await
        .expect("write_stream failed");

    assert_eq!(hashes.size, content.len() as u64);
    assert_eq!(hashes.sha256, digest.encoded());
    assert_eq!(
        hashes.sha512,
        Digest::from_bytes(Algorithm::Sha512, &content).encoded()
    );
    assert_eq!(
        hashes.sha1,
        Digest::from_bytes(Algorithm::Sha1, &content).encoded()
    );
    assert_eq!(
        hashes.md5,
        Digest::from_bytes(Algorithm::Md5, &content).encoded()
    );

    let desc = writer
        .commit(Descriptor::for_digest(digest))
        .await
        .expect("commit failed");
    assert_eq!(desc.size, content.len() as u64);
}

#[tokio::test]
async fn test_upload_on_filesystem_driver() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver: std::sync::Arc<dyn caisson_storage::StorageDriver> = std::sync::Arc::new(
        caisson_storage::FilesystemDriver::new(dir.path())
            .await
            .expect("driver"),
    );
    let store = caisson_storage::BlobStore::new(
        driver,
        caisson_storage::PathBuilder::new(),
        StoreLayout::Global,
    );

    let content = payload(13, 600_000);
    let digest = Digest::canonical_from_bytes(&content);
    let split = 250_000;

    let mut writer = store.create().await.expect("create failed");
    let id = writer.id().to_string();
    writer.write(&content[..split]).await.expect("write failed");
    writer.close().await.expect("close failed");

    let mut writer = store.resume(&id).await.expect("resume failed");
    writer.write(&content[split..]).await.expect("write failed");
    let desc = writer
        .commit(Descriptor::for_digest(digest.clone()))
        .await
        .expect("commit failed");

    assert_eq!(desc.size, content.len() as u64);
    let fetched = store.get(&digest).await.expect("get failed");
    assert_eq!(&fetched[..], &content[..]);
}
