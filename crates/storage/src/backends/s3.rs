//! S3-compatible storage driver using the AWS SDK.

use crate::driver::{
    ByteReader, DriverError, FileInfo, FileWriter, StorageDriver, WalkStream,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB). All parts except
/// the last must be at least this large.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Lifetime of presigned redirect URLs (20 minutes).
const REDIRECT_URL_EXPIRY: Duration = Duration::from_secs(20 * 60);

/// Page size for listing operations.
const LIST_PAGE_SIZE: i32 = 1000;

/// Characters escaped in `x-amz-copy-source` values; slashes separate the
/// bucket from the key and stay literal.
const COPY_SOURCE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn backend_err(op: &'static str, err: impl std::fmt::Display) -> DriverError {
    DriverError::Backend {
        driver: "s3",
        message: format!("{op}: {err}"),
    }
}

/// S3-compatible object store.
pub struct S3Driver {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Driver {
    /// Create an S3 driver.
    ///
    /// Credentials fall back to the ambient AWS chain when not supplied
    /// explicitly; `force_path_style` is required for MinIO and most
    /// S3-compatible services.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: impl Into<String>,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> Result<Self, DriverError> {
        let region = Region::new(region.unwrap_or_else(|| "us-east-1".to_string()));
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if let (Some(access_key_id), Some(secret_access_key)) =
            (access_key_id, secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "caisson-static",
            ));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(force_path_style)
            .build();

        let prefix = match prefix {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/", prefix.trim_matches('/'))
            }
            _ => String::new(),
        };

        Ok(Self {
            client: Client::from_conf(config),
            bucket: bucket.into(),
            prefix,
        })
    }

    /// Map a storage path to an object key.
    fn key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches('/'))
    }

    /// Map an object key back to a storage path.
    fn path_of(&self, key: &str) -> String {
        format!("/{}", key.strip_prefix(&self.prefix).unwrap_or(key))
    }

    fn copy_source(&self, key: &str) -> String {
        utf8_percent_encode(&format!("{}/{}", self.bucket, key), COPY_SOURCE_SET).to_string()
    }

    async fn key_has_children(&self, key: &str) -> Result<bool, DriverError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{key}/"))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| backend_err("list_objects_v2", e.into_service_error()))?;
        Ok(!resp.contents().is_empty() || !resp.common_prefixes().is_empty())
    }

    /// All object keys at or under a path (the exact key plus everything
    /// below it as a directory).
    async fn keys_under(&self, key: &str) -> Result<Vec<String>, DriverError> {
        let mut keys = Vec::new();
        if self.head_size(key).await?.is_some() {
            keys.push(key.to_string());
        }

        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(format!("{key}/"))
                .max_keys(LIST_PAGE_SIZE);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| backend_err("list_objects_v2", e.into_service_error()))?;
            for object in resp.contents() {
                if let Some(k) = object.key() {
                    keys.push(k.to_string());
                }
            }
            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn head_size(&self, key: &str) -> Result<Option<u64>, DriverError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(resp.content_length().unwrap_or(0) as u64)),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(None)
                } else {
                    Err(backend_err("head_object", service))
                }
            }
        }
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        let key = self.key(path);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(DriverError::PathNotFound {
                        path: path.to_string(),
                    });
                }
                return Err(backend_err("get_object", service));
            }
        };
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| backend_err("get_object body", e))?;
        Ok(data.into_bytes())
    }

    #[instrument(skip(self, content), fields(backend = "s3", size = content.len()))]
    async fn put_content(&self, path: &str, content: &[u8]) -> Result<(), DriverError> {
        let key = self.key(path);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(Bytes::copy_from_slice(content)))
            .send()
            .await
            .map_err(|e| backend_err("put_object", e.into_service_error()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn reader(&self, path: &str, offset: u64) -> Result<ByteReader, DriverError> {
        let key = self.key(path);
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .range(format!("bytes={offset}-"))
            .send()
            .await
        {
            Ok(resp) => Ok(Box::new(resp.body.into_async_read())),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(DriverError::PathNotFound {
                        path: path.to_string(),
                    });
                }
                // Reading exactly at the end of an object is not an error;
                // S3 just refuses the empty range.
                if service.code() == Some("InvalidRange") {
                    return Ok(Box::new(tokio::io::empty()));
                }
                Err(backend_err("get_object", service))
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        let key = self.key(path);

        let mut writer = S3FileWriter {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.clone(),
            copy_source: self.copy_source(&key),
            upload_id: None,
            parts: Vec::new(),
            part_number: 0,
            buffer: Vec::new(),
            size: 0,
            finalized: false,
            cancelled: false,
        };

        let existing = if append {
            match self.head_size(&key).await? {
                Some(size) => size,
                None => {
                    return Err(DriverError::PathNotFound {
                        path: path.to_string(),
                    });
                }
            }
        } else {
            0
        };

        writer.start_multipart().await?;

        // Appending to S3 means starting a fresh multipart upload seeded
        // with the already-staged object: copied server-side when it meets
        // the minimum part size, reloaded into the part buffer otherwise.
        if existing >= MIN_PART_SIZE as u64 {
            writer.copy_existing_part().await?;
            writer.size = existing;
        } else if existing > 0 {
            let staged = self.get_content(path).await?;
            writer.buffer.extend_from_slice(&staged);
            writer.size = existing;
        }

        Ok(Box::new(writer))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        let key = self.key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => Ok(FileInfo {
                path: path.to_string(),
                size: resp.content_length().unwrap_or(0) as u64,
                mod_time: resp
                    .last_modified()
                    .and_then(|t| time::OffsetDateTime::from_unix_timestamp(t.secs()).ok()),
                is_dir: false,
            }),
            Err(err) => {
                let service = err.into_service_error();
                if !service.is_not_found() {
                    return Err(backend_err("head_object", service));
                }
                if self.key_has_children(&key).await? {
                    return Ok(FileInfo {
                        path: path.to_string(),
                        size: 0,
                        mod_time: None,
                        is_dir: true,
                    });
                }
                Err(DriverError::PathNotFound {
                    path: path.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        let key = self.key(path);
        let prefix = format!("{key}/");

        let mut results = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .max_keys(LIST_PAGE_SIZE);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| backend_err("list_objects_v2", e.into_service_error()))?;

            for object in resp.contents() {
                if let Some(k) = object.key() {
                    results.push(self.path_of(k));
                }
            }
            for common in resp.common_prefixes() {
                if let Some(p) = common.prefix() {
                    results.push(self.path_of(p.trim_end_matches('/')));
                }
            }

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        if results.is_empty() {
            return Err(DriverError::PathNotFound {
                path: path.to_string(),
            });
        }
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn rename(&self, from: &str, to: &str) -> Result<(), DriverError> {
        let from_key = self.key(from);
        let to_key = self.key(to);

        if let Err(err) = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(&from_key))
            .key(&to_key)
            .send()
            .await
        {
            let service = err.into_service_error();
            if service.code() == Some("NoSuchKey") {
                return Err(DriverError::PathNotFound {
                    path: from.to_string(),
                });
            }
            return Err(backend_err("copy_object", service));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&from_key)
            .send()
            .await
            .map_err(|e| backend_err("delete_object", e.into_service_error()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        let key = self.key(path);
        let keys = self.keys_under(&key).await?;
        if keys.is_empty() {
            return Err(DriverError::PathNotFound {
                path: path.to_string(),
            });
        }
        for k in keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&k)
                .send()
                .await
                .map_err(|e| backend_err("delete_object", e.into_service_error()))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn redirect_url(
        &self,
        method: &str,
        path: &str,
        filename: Option<&str>,
    ) -> Result<Option<String>, DriverError> {
        if !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("HEAD") {
            return Ok(None);
        }
        let key = self.key(path);

        let config = PresigningConfig::expires_in(REDIRECT_URL_EXPIRY)
            .map_err(|e| backend_err("presigning config", e))?;
        let mut req = self.client.get_object().bucket(&self.bucket).key(&key);
        if let Some(filename) = filename {
            req = req.response_content_disposition(format!(
                "attachment; filename=\"{filename}\""
            ));
        }
        let presigned = req
            .presigned(config)
            .await
            .map_err(|e| backend_err("presign get_object", e.into_service_error()))?;
        Ok(Some(presigned.uri().to_string()))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn walk(&self, path: &str) -> Result<WalkStream, DriverError> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let prefix_len = self.prefix.len();
        let prefix = format!("{}/", self.key(path).trim_end_matches('/'));

        let stream = async_stream::try_stream! {
            let mut continuation: Option<String> = None;
            loop {
                let mut req = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix)
                    .max_keys(LIST_PAGE_SIZE);
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| backend_err("list_objects_v2", e.into_service_error()))?;

                for object in resp.contents() {
                    let Some(key) = object.key() else { continue };
                    yield FileInfo {
                        path: format!("/{}", &key[prefix_len.min(key.len())..]),
                        size: object.size().unwrap_or(0) as u64,
                        mod_time: object
                            .last_modified()
                            .and_then(|t| time::OffsetDateTime::from_unix_timestamp(t.secs()).ok()),
                        is_dir: false,
                    };
                }

                match resp.next_continuation_token() {
                    Some(token) if resp.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Multipart writer for one staged object.
///
/// Every `close` completes the in-flight multipart upload so the staged
/// object is durable; a later append re-seeds a fresh multipart upload
/// from it. This keeps resumable uploads inside S3's minimum-part-size
/// rules without tracking unfinalized parts across sessions.
struct S3FileWriter {
    client: Client,
    bucket: String,
    key: String,
    copy_source: String,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
    size: u64,
    finalized: bool,
    cancelled: bool,
}

impl S3FileWriter {
    async fn start_multipart(&mut self) -> Result<(), DriverError> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| backend_err("create_multipart_upload", e.into_service_error()))?;
        let upload_id = resp
            .upload_id()
            .ok_or_else(|| backend_err("create_multipart_upload", "missing upload id"))?;
        self.upload_id = Some(upload_id.to_string());
        Ok(())
    }

    fn upload_id(&self) -> Result<&str, DriverError> {
        self.upload_id
            .as_deref()
            .ok_or_else(|| backend_err("multipart", "upload already finalized"))
    }

    /// Seed the multipart upload with the already-staged object.
    async fn copy_existing_part(&mut self) -> Result<(), DriverError> {
        let upload_id = self.upload_id()?.to_string();
        self.part_number += 1;
        let resp = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(&self.key)
            .copy_source(&self.copy_source)
            .upload_id(&upload_id)
            .part_number(self.part_number)
            .send()
            .await
            .map_err(|e| backend_err("upload_part_copy", e.into_service_error()))?;

        let e_tag = resp
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .ok_or_else(|| backend_err("upload_part_copy", "missing etag"))?;
        self.parts.push(
            CompletedPart::builder()
                .e_tag(e_tag)
                .part_number(self.part_number)
                .build(),
        );
        Ok(())
    }

    async fn flush_part(&mut self) -> Result<(), DriverError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let upload_id = self.upload_id()?.to_string();
        let body = std::mem::take(&mut self.buffer);
        self.part_number += 1;

        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .part_number(self.part_number)
            .body(ByteStream::from(Bytes::from(body)))
            .send()
            .await
            .map_err(|e| backend_err("upload_part", e.into_service_error()))?;

        let e_tag = resp
            .e_tag()
            .ok_or_else(|| backend_err("upload_part", "missing etag"))?;
        self.parts.push(
            CompletedPart::builder()
                .e_tag(e_tag)
                .part_number(self.part_number)
                .build(),
        );
        Ok(())
    }

    /// Complete the multipart upload, making the staged object durable.
    async fn finalize(&mut self) -> Result<(), DriverError> {
        if self.finalized {
            return Ok(());
        }
        self.flush_part().await?;
        let upload_id = self.upload_id()?.to_string();

        if self.parts.is_empty() {
            // S3 refuses an empty completion; stage a zero-byte object.
            self.abort(&upload_id).await?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(ByteStream::from_static(b""))
                .send()
                .await
                .map_err(|e| backend_err("put_object", e.into_service_error()))?;
        } else {
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(std::mem::take(&mut self.parts)))
                .build();
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(&self.key)
                .upload_id(&upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .map_err(|e| backend_err("complete_multipart_upload", e.into_service_error()))?;
        }

        self.upload_id = None;
        self.finalized = true;
        Ok(())
    }

    async fn abort(&self, upload_id: &str) -> Result<(), DriverError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| backend_err("abort_multipart_upload", e.into_service_error()))?;
        Ok(())
    }
}

#[async_trait]
impl FileWriter for S3FileWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        if self.finalized || self.cancelled {
            return Err(backend_err("upload_part", "writer is closed"));
        }
        self.buffer.extend_from_slice(data);
        self.size += data.len() as u64;
        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.finalize().await
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.cancelled = true;
        if let Some(upload_id) = self.upload_id.take() {
            self.abort(&upload_id).await?;
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| backend_err("delete_object", e.into_service_error()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.cancelled {
            return Ok(());
        }
        self.finalize().await
    }
}
