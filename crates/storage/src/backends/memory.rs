//! In-memory storage driver.
//!
//! Keeps every object in a sorted map behind a mutex. Contents do not
//! survive the process; intended for tests and ephemeral deployments.

use crate::driver::{
    ByteReader, DriverError, FileInfo, FileWriter, StorageDriver, WalkStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

#[derive(Clone)]
struct Entry {
    data: Vec<u8>,
    mod_time: OffsetDateTime,
}

type Objects = Arc<Mutex<BTreeMap<String, Entry>>>;

/// In-memory object store.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    objects: Objects,
}

impl MemoryDriver {
    /// Create an empty in-memory driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a storage path to an internal key.
    fn key(path: &str) -> Result<String, DriverError> {
        let rel = path.trim_start_matches('/').trim_end_matches('/');
        if rel.is_empty() {
            return Err(DriverError::InvalidPath {
                path: path.to_string(),
            });
        }
        for segment in rel.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(DriverError::InvalidPath {
                    path: path.to_string(),
                });
            }
        }
        Ok(rel.to_string())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        self.objects.lock().expect("memory driver mutex poisoned")
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        let key = Self::key(path)?;
        let objects = self.lock();
        objects
            .get(&key)
            .map(|entry| Bytes::from(entry.data.clone()))
            .ok_or_else(|| DriverError::PathNotFound {
                path: path.to_string(),
            })
    }

    async fn put_content(&self, path: &str, content: &[u8]) -> Result<(), DriverError> {
        let key = Self::key(path)?;
        self.lock().insert(
            key,
            Entry {
                data: content.to_vec(),
                mod_time: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ByteReader, DriverError> {
        let key = Self::key(path)?;
        let objects = self.lock();
        let entry = objects.get(&key).ok_or_else(|| DriverError::PathNotFound {
            path: path.to_string(),
        })?;
        let start = (offset as usize).min(entry.data.len());
        let rest = entry.data[start..].to_vec();
        Ok(Box::new(std::io::Cursor::new(rest)))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        let key = Self::key(path)?;
        let buf = if append {
            let objects = self.lock();
            objects
                .get(&key)
                .map(|entry| entry.data.clone())
                .ok_or_else(|| DriverError::PathNotFound {
                    path: path.to_string(),
                })?
        } else {
            Vec::new()
        };

        Ok(Box::new(MemoryFileWriter {
            objects: self.objects.clone(),
            key,
            buf,
            cancelled: false,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        let key = Self::key(path)?;
        let objects = self.lock();
        if let Some(entry) = objects.get(&key) {
            return Ok(FileInfo {
                path: path.to_string(),
                size: entry.data.len() as u64,
                mod_time: Some(entry.mod_time),
                is_dir: false,
            });
        }

        let prefix = format!("{key}/");
        if objects.range(prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&prefix)) {
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

    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        let key = Self::key(path)?;
        let prefix = format!("{key}/");
        let objects = self.lock();

        let mut children = BTreeSet::new();
        for (k, _) in objects.range(prefix.clone()..) {
            let Some(rest) = k.strip_prefix(&prefix) else {
                break;
            };
            let child = rest.split('/').next().expect("split yields at least one");
            children.insert(child.to_string());
        }

        if children.is_empty() {
            return Err(DriverError::PathNotFound {
                path: path.to_string(),
            });
        }
        Ok(children
            .into_iter()
            .map(|child| format!("/{prefix}{child}"))
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DriverError> {
        let from_key = Self::key(from)?;
        let to_key = Self::key(to)?;
        let mut objects = self.lock();
        let entry = objects
            .remove(&from_key)
            .ok_or_else(|| DriverError::PathNotFound {
                path: from.to_string(),
            })?;
        objects.insert(to_key, entry);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        let key = Self::key(path)?;
        let prefix = format!("{key}/");
        let mut objects = self.lock();

        let mut removed = objects.remove(&key).is_some();
        let nested: Vec<String> = objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in nested {
            objects.remove(&k);
            removed = true;
        }

        if removed {
            Ok(())
        } else {
            Err(DriverError::PathNotFound {
                path: path.to_string(),
            })
        }
    }

    async fn redirect_url(
        &self,
        _method: &str,
        _path: &str,
        _filename: Option<&str>,
    ) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    async fn walk(&self, path: &str) -> Result<WalkStream, DriverError> {
        let key = Self::key(path)?;
        let prefix = format!("{key}/");
        let objects = self.lock();

        let infos: Vec<FileInfo> = objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, entry)| FileInfo {
                path: format!("/{k}"),
                size: entry.data.len() as u64,
                mod_time: Some(entry.mod_time),
                is_dir: false,
            })
            .collect();

        Ok(Box::pin(futures::stream::iter(infos.into_iter().map(Ok))))
    }
}

/// Writer handle buffering one object; content becomes visible on
/// `commit` or `close`, so closed uploads stay resumable.
struct MemoryFileWriter {
    objects: Objects,
    key: String,
    buf: Vec<u8>,
    cancelled: bool,
}

impl MemoryFileWriter {
    fn persist(&self) {
        self.objects.lock().expect("memory driver mutex poisoned").insert(
            self.key.clone(),
            Entry {
                data: self.buf.clone(),
                mod_time: OffsetDateTime::now_utc(),
            },
        );
    }
}

#[async_trait]
impl FileWriter for MemoryFileWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.persist();
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.cancelled = true;
        self.objects
            .lock()
            .expect("memory driver mutex poisoned")
            .remove(&self.key);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if !self.cancelled {
            self.persist();
        }
        Ok(())
    }
}
