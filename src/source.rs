//! # Byte-Source Boundary
//!
//! A [`ByteSource`] supplies raw byte ranges for one physical file. It is the
//! seam between the decode pipeline and whatever actually stores the bytes:
//! local disk here, remote filesystems in the collaborating layer.
//!
//! Reads are positional and stateless from the caller's point of view, so a
//! single source can be shared by any number of cursors and builder
//! invocations.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

/// Largest permitted single read. A read request must describe its length in
/// 32 bits, so anything at or above this is rejected up front.
pub const MAX_SINGLE_READ: u64 = u32::MAX as u64;

/// Errors produced by a byte source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Underlying I/O failure; fatal to the enclosing build.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single read larger than the 32-bit length cap was requested.
    #[error("cannot perform a single read of {len} bytes (max {MAX_SINGLE_READ})")]
    ReadTooLarge {
        /// Requested read length.
        len: u64,
    },

    /// The requested range extends past the end of the source.
    #[error("read of {len} bytes at offset {offset} exceeds source length {limit}")]
    OutOfBounds {
        /// Requested start offset.
        offset: u64,
        /// Requested read length.
        len: u64,
        /// Total length of the source.
        limit: u64,
    },

    /// The internal file handle lock was poisoned by a panicking reader.
    #[error("file handle lock poisoned")]
    Poisoned,
}

/// Supplies `read(offset, length) -> bytes` and a total length for one
/// physical file.
///
/// Implementations must be safe to share across threads; concurrent reads of
/// any ranges are permitted.
pub trait ByteSource: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Short reads are errors: either the full range is returned or the call
    /// fails.
    fn read(&self, offset: u64, len: usize) -> Result<Bytes, SourceError>;

    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Whether the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local-disk [`ByteSource`] over a regular file.
pub struct FileSource {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Open a file for positional reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        log::debug!("opened {} ({} bytes)", path.display(), len);
        Ok(Arc::new(Self {
            path,
            file: Mutex::new(file),
            len,
        }))
    }

    /// Path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn read(&self, offset: u64, len: usize) -> Result<Bytes, SourceError> {
        check_range(offset, len, self.len)?;
        let mut buf = vec![0u8; len];
        {
            let mut file = self.file.lock().map_err(|_| SourceError::Poisoned)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(Bytes::from(buf))
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// In-memory [`ByteSource`], useful for adapters that already hold the file
/// contents and for tests.
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    /// Wrap an in-memory buffer as a source.
    pub fn new(data: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self { data: data.into() })
    }
}

impl ByteSource for BytesSource {
    fn read(&self, offset: u64, len: usize) -> Result<Bytes, SourceError> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

fn check_range(offset: u64, len: usize, limit: u64) -> Result<(), SourceError> {
    let len = len as u64;
    if len >= MAX_SINGLE_READ {
        return Err(SourceError::ReadTooLarge { len });
    }
    if offset.checked_add(len).map_or(true, |end| end > limit) {
        return Err(SourceError::OutOfBounds { offset, len, limit });
    }
    Ok(())
}
