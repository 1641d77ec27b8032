//! Byte resource abstractions and their stock implementations.
//!
//! A resource reports its outcome through `Result`: `Ok(0)` from a read
//! means end of data, `Ok(0)` from a write means the destination no longer
//! accepts bytes, and `Err` carries the terminal failure. `close` is
//! idempotent; the adapters in this module's siblings guarantee they call
//! it exactly once per terminal transition, but implementations must still
//! tolerate a second call.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::FlowError;

/// A byte source with explicit open and close lifecycle.
pub trait ReadResource: Send + 'static {
    /// Acquires the underlying handle.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::OpenFailed`] when the source cannot be opened.
    fn open(&mut self) -> Result<(), FlowError>;

    /// Reads up to `buf.len()` bytes. `Ok(0)` signals end of data.
    ///
    /// # Errors
    ///
    /// Returns the resource's own failure for an unreadable source.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlowError>;

    /// Releases the underlying handle.
    fn close(&mut self);
}

/// A byte destination with explicit open and close lifecycle.
pub trait WriteResource: Send + 'static {
    /// Acquires the underlying handle.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::OpenFailed`] when the destination cannot be
    /// opened.
    fn open(&mut self) -> Result<(), FlowError>;

    /// Writes a prefix of `bytes`, returning how many were accepted.
    /// `Ok(0)` signals a destination that accepts no further bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::NoCapacity`] or the resource's own failure.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlowError>;

    /// Releases the underlying handle.
    fn close(&mut self);
}

// ----------------------------------------------------------------------------
// In-memory implementations
// ----------------------------------------------------------------------------

/// Reads from an in-memory byte buffer.
pub struct BytesReader {
    data: Bytes,
    position: usize,
}

impl BytesReader {
    /// Wraps `data` for sequential reading.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }
}

impl ReadResource for BytesReader {
    fn open(&mut self) -> Result<(), FlowError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlowError> {
        let remaining = self.data.len() - self.position;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn close(&mut self) {}
}

/// Writes into a shared in-memory buffer with a hard capacity.
///
/// A write that partially fits accepts what it can; the next write against
/// the full buffer fails with [`FlowError::NoCapacity`]. The storage handle
/// stays readable after the writer closes, which is what tests want.
pub struct FixedBufferWriter {
    storage: Arc<Mutex<Vec<u8>>>,
    capacity: usize,
}

impl FixedBufferWriter {
    /// Creates a writer that accepts at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    /// Handle to the written bytes.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.storage)
    }
}

impl WriteResource for FixedBufferWriter {
    fn open(&mut self) -> Result<(), FlowError> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlowError> {
        let mut storage = self.storage.lock();
        let room = self.capacity - storage.len();
        if room == 0 {
            return Err(FlowError::NoCapacity);
        }
        let n = room.min(bytes.len());
        storage.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn close(&mut self) {}
}

// ----------------------------------------------------------------------------
// File-backed implementations
// ----------------------------------------------------------------------------

/// Reads from a file opened lazily at `open` time.
pub struct FileReader {
    path: PathBuf,
    file: Option<File>,
}

impl FileReader {
    /// Reads from the file at `path`. The path is not validated here; a
    /// missing file surfaces as an open failure on first subscription.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl ReadResource for FileReader {
    fn open(&mut self) -> Result<(), FlowError> {
        let file = File::open(&self.path)
            .map_err(|e| FlowError::OpenFailed(format!("{}: {e}", self.path.display())))?;
        self.file = Some(file);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlowError> {
        match &mut self.file {
            Some(file) => file.read(buf).map_err(FlowError::from),
            None => Err(FlowError::Io("read on a closed file".into())),
        }
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "closed file reader");
        }
    }
}

/// Writes to a file created at `open` time.
pub struct FileWriter {
    path: PathBuf,
    file: Option<File>,
}

impl FileWriter {
    /// Writes to the file at `path`, truncating any existing content.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl WriteResource for FileWriter {
    fn open(&mut self) -> Result<(), FlowError> {
        let file = File::create(&self.path)
            .map_err(|e| FlowError::OpenFailed(format!("{}: {e}", self.path.display())))?;
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlowError> {
        match &mut self.file {
            Some(file) => file.write(bytes).map_err(FlowError::from),
            None => Err(FlowError::Io("write on a closed file".into())),
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                debug!(path = %self.path.display(), error = %e, "flush on close failed");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
