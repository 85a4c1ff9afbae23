//! Seekable buffered reads over a driver's byte-range reader.

use crate::driver::{ByteReader, DriverError, StorageDriver};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};

/// Buffer size for backend reads.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A seekable reader over one stored object.
///
/// The backend connection is opened lazily on the first read and
/// invalidated (not reopened) by `seek`, so mostly-sequential access with
/// occasional seeks costs one reconnect per jump. Reads past the declared
/// size report EOF even if the backend would return more bytes.
pub struct FileReader {
    driver: Arc<dyn StorageDriver>,
    path: String,
    size: u64,
    offset: u64,
    reader: Option<BufReader<ByteReader>>,
    closed: bool,
}

impl FileReader {
    /// Create a reader for `path` with a declared content size.
    pub fn new(driver: Arc<dyn StorageDriver>, path: impl Into<String>, size: u64) -> Self {
        Self {
            driver,
            path: path.into(),
            size,
            offset: 0,
            reader: None,
            closed: false,
        }
    }

    /// Declared content size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Read into `buf`, returning the number of bytes read. Returns 0 at
    /// (or past) the declared size.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        if self.closed {
            return Err(DriverError::Io(std::io::Error::other(
                "file reader is closed",
            )));
        }
        if buf.is_empty() || self.offset >= self.size {
            return Ok(0);
        }

        if self.reader.is_none() {
            let raw = self.driver.reader(&self.path, self.offset).await?;
            self.reader = Some(BufReader::with_capacity(READ_BUFFER_SIZE, raw));
        }
        let reader = self.reader.as_mut().expect("reader was just opened");

        let remaining = self.size - self.offset;
        let cap = buf.len().min(remaining as usize);
        let n = reader.read(&mut buf[..cap]).await?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Read everything from the current position to the declared size.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, DriverError> {
        let mut out = Vec::with_capacity((self.size - self.offset.min(self.size)) as usize);
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Reposition the reader. The backend connection is dropped here and
    /// reopened on the next `read`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, DriverError> {
        if self.closed {
            return Err(DriverError::Io(std::io::Error::other(
                "file reader is closed",
            )));
        }
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of file",
            ))
        })?;

        if target != self.offset {
            self.offset = target;
            self.reader = None;
        }
        Ok(self.offset)
    }

    /// Drop the backend connection. Idempotent.
    pub fn close(&mut self) {
        self.reader = None;
        self.closed = true;
    }
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("connected", &self.reader.is_some())
            .finish()
    }
}
