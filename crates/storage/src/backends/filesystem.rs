//! Local filesystem storage driver.

use crate::driver::{
    ByteReader, DriverError, FileInfo, FileWriter, StorageDriver, WalkStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem driver rooted at a directory.
pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    /// Create a filesystem driver, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, DriverError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Map a storage path to a real path, rejecting anything that could
    /// escape the root.
    fn full_path(&self, path: &str) -> Result<PathBuf, DriverError> {
        let rel = path.trim_start_matches('/');
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(DriverError::InvalidPath {
                        path: path.to_string(),
                    });
                }
            }
        }
        Ok(self.root.join(rel))
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), DriverError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn not_found(path: &str, err: std::io::Error) -> DriverError {
        if err.kind() == std::io::ErrorKind::NotFound {
            DriverError::PathNotFound {
                path: path.to_string(),
            }
        } else {
            DriverError::Io(err)
        }
    }
}

#[async_trait]
impl StorageDriver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        let full = self.full_path(path)?;
        let data = fs::read(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, content), fields(backend = "filesystem", size = content.len()))]
    async fn put_content(&self, path: &str, content: &[u8]) -> Result<(), DriverError> {
        let full = self.full_path(path)?;
        self.ensure_parent(&full).await?;

        // Write to a uniquely-named sibling, fsync, then rename so the
        // final path only ever holds complete content.
        let temp = full.with_file_name(format!(
            "{}.tmp.{}",
            full.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp, &full).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn reader(&self, path: &str, offset: u64) -> Result<ByteReader, DriverError> {
        let full = self.full_path(path)?;
        let mut file = fs::File::open(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        let full = self.full_path(path)?;

        let (file, size) = if append {
            let file = fs::OpenOptions::new()
                .append(true)
                .open(&full)
                .await
                .map_err(|e| Self::not_found(path, e))?;
            let size = file.metadata().await?.len();
            (file, size)
        } else {
            self.ensure_parent(&full).await?;
            let file = fs::File::create(&full).await?;
            (file, 0)
        };

        Ok(Box::new(FilesystemFileWriter {
            file: Some(file),
            path: full,
            size,
            committed: false,
            cancelled: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        let full = self.full_path(path)?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(FileInfo {
            path: path.to_string(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            mod_time: metadata.modified().ok().map(Into::into),
            is_dir: metadata.is_dir(),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        let full = self.full_path(path)?;
        let mut entries = fs::read_dir(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;

        let base = path.trim_end_matches('/');
        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            results.push(format!("{base}/{name}"));
        }
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn rename(&self, from: &str, to: &str) -> Result<(), DriverError> {
        let from_full = self.full_path(from)?;
        let to_full = self.full_path(to)?;
        self.ensure_parent(&to_full).await?;
        fs::rename(&from_full, &to_full)
            .await
            .map_err(|e| Self::not_found(from, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        let full = self.full_path(path)?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        if metadata.is_dir() {
            fs::remove_dir_all(&full).await?;
        } else {
            fs::remove_file(&full).await?;
        }
        Ok(())
    }

    async fn redirect_url(
        &self,
        _method: &str,
        _path: &str,
        _filename: Option<&str>,
    ) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn walk(&self, path: &str) -> Result<WalkStream, DriverError> {
        let base = self.full_path(path)?;
        let root = self.root.clone();

        let base_exists = match fs::try_exists(&base).await {
            Ok(exists) => exists,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(DriverError::Io(e)),
        };

        let stream = async_stream::try_stream! {
            if !base_exists {
                return;
            }
            let mut stack = vec![base];
            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let entry_path = entry.path();
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        stack.push(entry_path);
                    } else if file_type.is_file() {
                        let metadata = entry.metadata().await?;
                        let rel = entry_path
                            .strip_prefix(&root)
                            .map(|p| p.to_string_lossy().into_owned())
                            .unwrap_or_else(|_| entry_path.to_string_lossy().into_owned());
                        yield FileInfo {
                            path: format!("/{rel}"),
                            size: metadata.len(),
                            mod_time: metadata.modified().ok().map(Into::into),
                            is_dir: false,
                        };
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Writer handle over one local file. Upload temp objects are written in
/// place; publish atomicity comes from the rename in the blob writer.
struct FilesystemFileWriter {
    file: Option<fs::File>,
    path: PathBuf,
    size: u64,
    committed: bool,
    cancelled: bool,
}

impl FilesystemFileWriter {
    fn file_mut(&mut self) -> Result<&mut fs::File, DriverError> {
        self.file
            .as_mut()
            .ok_or_else(|| DriverError::Io(std::io::Error::other("file writer is closed")))
    }
}

#[async_trait]
impl FileWriter for FilesystemFileWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let file = self.file_mut()?;
        file.write_all(data).await?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        let file = self.file_mut()?;
        file.flush().await?;
        file.sync_all().await?;
        self.committed = true;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.cancelled = true;
        self.file = None;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriverError::Io(e)),
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(mut file) = self.file.take() {
            if !self.cancelled {
                file.flush().await?;
                file.sync_all().await?;
            }
        }
        Ok(())
    }
}
