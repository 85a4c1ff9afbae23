//! Integration tests for blob store reads, puts and serving.

mod common;

use caisson_core::digest::{Algorithm, Digest};
use caisson_storage::{MAX_BLOB_GET_SIZE, ServedBlob, StorageError};
use common::{global_store, memory_driver, payload, scoped_store};

#[tokio::test]
async fn test_put_stat_get_roundtrip() {
    let store = global_store(memory_driver());
    let content = payload(1, 1024);

    let desc = store.put(&content).await.expect("put failed");
    assert_eq!(desc.size, 1024);
    assert_eq!(desc.digest, Digest::canonical_from_bytes(&content));
    assert_eq!(desc.media_type, "application/octet-stream");

    let statted = store.stat(&desc.digest).await.expect("stat failed");
    assert_eq!(statted, desc);

    let fetched = store.get(&desc.digest).await.expect("get failed");
    assert_eq!(&fetched[..], &content[..]);
}

#[tokio::test]
async fn test_put_existing_content_short_circuits() {
    let store = global_store(memory_driver());
    let content = payload(2, 256);

    let first = store.put(&content).await.expect("first put failed");
    let second = store.put(&content).await.expect("second put failed");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_stat_unknown_blob() {
    let store = global_store(memory_driver());
    let digest = Digest::canonical_from_bytes(b"never stored");

    assert!(matches!(
        store.stat(&digest).await,
        Err(StorageError::BlobUnknown)
    ));
    assert!(matches!(
        store.get(&digest).await,
        Err(StorageError::BlobUnknown)
    ));
}

#[tokio::test]
async fn test_get_refuses_oversized_blob() {
    let store = global_store(memory_driver());
    let content = vec![0u8; MAX_BLOB_GET_SIZE as usize + 1];

    let desc = store.put(&content).await.expect("put failed");
    match store.get(&desc.digest).await {
        Err(StorageError::BlobTooLarge { size, limit }) => {
            assert_eq!(size, content.len() as u64);
            assert_eq!(limit, MAX_BLOB_GET_SIZE);
        }
        other => panic!("expected BlobTooLarge, got {other:?}"),
    }

    // Open still works for large payloads.
    let mut reader = store.open(&desc.digest).await.expect("open failed");
    let streamed = reader.read_to_end().await.expect("read failed");
    assert_eq!(streamed.len(), content.len());
}

#[tokio::test]
async fn test_open_seek_and_read() {
    let store = global_store(memory_driver());
    let content = payload(3, 4096);
    let desc = store.put(&content).await.expect("put failed");

    let mut reader = store.open(&desc.digest).await.expect("open failed");
    assert_eq!(reader.size(), 4096);

    reader.seek(std::io::SeekFrom::Start(4000)).expect("seek failed");
    let rest = reader.read_to_end().await.expect("read failed");
    assert_eq!(&rest[..], &content[4000..]);
}

#[tokio::test]
async fn test_serve_blob_streams_with_headers() {
    let store = global_store(memory_driver());
    let content = payload(4, 512);
    let desc = store.put(&content).await.expect("put failed");

    match store.serve_blob(&desc.digest, "GET").await.expect("serve failed") {
        ServedBlob::Stream {
            mut reader,
            headers,
            descriptor,
        } => {
            assert_eq!(descriptor, desc);
            assert_eq!(headers.etag, format!("\"{}\"", desc.digest));
            assert_eq!(headers.content_length, 512);
            assert_eq!(headers.content_type, "application/octet-stream");
            assert_eq!(headers.content_digest, desc.digest.to_string());
            assert!(headers.cache_control.starts_with("max-age="));

            let streamed = reader.read_to_end().await.expect("read failed");
            assert_eq!(&streamed[..], &content[..]);
        }
        ServedBlob::Redirect { .. } => panic!("memory driver cannot redirect"),
    }
}

#[tokio::test]
async fn test_serve_blob_redirect_falls_back_without_signer() {
    // Redirect enabled, but the memory driver cannot sign URLs.
    let store = global_store(memory_driver()).with_redirect(true);
    let desc = store.put(b"redirect me").await.expect("put failed");

    match store.serve_blob(&desc.digest, "GET").await.expect("serve failed") {
        ServedBlob::Stream { .. } => {}
        ServedBlob::Redirect { .. } => panic!("memory driver cannot redirect"),
    }
}

#[tokio::test]
async fn test_scoped_store_delete_unsupported() {
    let store = scoped_store(memory_driver(), "acme", "web");
    let desc = store.put(b"scoped blob").await.expect("put failed");

    assert!(matches!(
        store.delete(&desc.digest).await,
        Err(StorageError::Unsupported)
    ));
}

#[tokio::test]
async fn test_global_delete_requires_option() {
    let driver = memory_driver();
    let store = global_store(driver.clone());
    let desc = store.put(b"deletable").await.expect("put failed");

    assert!(matches!(
        store.delete(&desc.digest).await,
        Err(StorageError::Unsupported)
    ));

    let store = global_store(driver).with_delete(true);
    store.delete(&desc.digest).await.expect("delete failed");
    assert!(matches!(
        store.stat(&desc.digest).await,
        Err(StorageError::BlobUnknown)
    ));
    assert!(matches!(
        store.delete(&desc.digest).await,
        Err(StorageError::BlobUnknown)
    ));
}

#[tokio::test]
async fn test_scoped_and_global_blobs_do_not_collide() {
    let driver = memory_driver();
    let scoped = scoped_store(driver.clone(), "acme", "web");
    let global = global_store(driver);

    let content = payload(5, 128);
    let desc = scoped.put(&content).await.expect("scoped put failed");

    // Same digest, different address space.
    assert!(matches!(
        global.stat(&desc.digest).await,
        Err(StorageError::BlobUnknown)
    ));
    assert_eq!(
        scoped.stat(&desc.digest).await.expect("scoped stat failed"),
        desc
    );
}

#[tokio::test]
async fn test_sha512_addressed_blob() {
    let store = global_store(memory_driver());
    let content = payload(6, 64);
    let desc = store.put(&content).await.expect("put failed");

    // Storage is addressed by the canonical digest; a sha512 digest of the
    // same content is a different address and is unknown.
    let sha512 = Digest::from_bytes(Algorithm::Sha512, &content);
    assert!(matches!(
        store.stat(&sha512).await,
        Err(StorageError::BlobUnknown)
    ));
    assert!(store.stat(&desc.digest).await.is_ok());
}
