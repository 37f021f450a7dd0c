//! # Cursors and Backing Buffers
//!
//! A [`Cursor`] is a positioned, duplicable view over a backing store. The
//! store is either a raw [`ByteSource`] or a *possibly compressed* overlay:
//! a byte range of the parent that, when its compressed and uncompressed
//! lengths differ, is decompressed in full on first access.
//!
//! The decompressed buffer is held under a reclaimable cell shared by all
//! duplicates of the cursor. [`Cursor::reclaim_decompressed`] may drop it at
//! any time; the next read transparently recomputes it. Reclamation is a
//! memory-pressure event, never an error, and recomputation is idempotent.

use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::compression::{decompress_block, CompressionError};
use crate::source::{ByteSource, SourceError};

/// Errors produced by cursor reads.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The underlying byte source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The compressed overlay could not be decoded.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// The requested range extends past the cursor's limit.
    #[error("read of {len} bytes at offset {offset} exceeds limit {limit}")]
    OutOfBounds {
        /// Requested start offset.
        offset: u64,
        /// Requested read length.
        len: u64,
        /// Limit of the backing buffer.
        limit: u64,
    },

    /// The decompression cell's lock was poisoned by a panicking reader.
    #[error("decompression cell lock poisoned")]
    Poisoned,
}

#[derive(Clone)]
enum Backing {
    Source(Arc<dyn ByteSource>),
    Compressed(CompressedBuf),
}

/// A byte range of a parent cursor that may be stored compressed.
///
/// When `compressed_len == uncompressed_len` reads pass straight through to
/// the parent at `base + offset`. Otherwise the entire block is decompressed
/// on first access and retained in a cell shared across duplicates.
#[derive(Clone)]
struct CompressedBuf {
    parent: Box<Cursor>,
    base: u64,
    compressed_len: u32,
    uncompressed_len: u32,
    decompressed: Arc<Mutex<Option<Bytes>>>,
}

impl CompressedBuf {
    fn read(&self, offset: u64, len: usize) -> Result<Bytes, CursorError> {
        if self.compressed_len == self.uncompressed_len {
            // Stored raw.
            return self.parent.read(self.base + offset, len);
        }
        let limit = self.uncompressed_len as u64;
        if offset.checked_add(len as u64).map_or(true, |end| end > limit) {
            return Err(CursorError::OutOfBounds {
                offset,
                len: len as u64,
                limit,
            });
        }
        let whole = self.decompressed_bytes()?;
        let start = offset as usize;
        // Bytes slices are immutable and independent; nothing handed out can
        // corrupt the retained copy.
        Ok(whole.slice(start..start + len))
    }

    fn decompressed_bytes(&self) -> Result<Bytes, CursorError> {
        let mut cell = self.decompressed.lock().map_err(|_| CursorError::Poisoned)?;
        if let Some(bytes) = cell.as_ref() {
            return Ok(bytes.clone());
        }
        log::trace!(
            "decompressing {}-byte block at base {} (cold or reclaimed)",
            self.compressed_len,
            self.base
        );
        let block = self.parent.read(self.base, self.compressed_len as usize)?;
        let bytes = decompress_block(&block, self.uncompressed_len as usize)?;
        *cell = Some(bytes.clone());
        Ok(bytes)
    }

    fn reclaim(&self) {
        if let Ok(mut cell) = self.decompressed.lock() {
            *cell = None;
        }
    }
}

/// Positioned, duplicable view over a backing store.
///
/// Cloning (or [`Cursor::duplicate`]) yields an independently positioned view
/// over the *same* storage; a compressed overlay's cached decompression is
/// shared, not copied, so duplicates observe each other's cached result.
#[derive(Clone)]
pub struct Cursor {
    backing: Backing,
    pos: u64,
}

impl Cursor {
    /// Cursor over a raw byte source, positioned at offset 0.
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self {
            backing: Backing::Source(source),
            pos: 0,
        }
    }

    /// Read `len` bytes at absolute `offset`, without moving the position.
    pub fn read(&self, offset: u64, len: usize) -> Result<Bytes, CursorError> {
        match &self.backing {
            Backing::Source(src) => Ok(src.read(offset, len)?),
            Backing::Compressed(buf) => buf.read(offset, len),
        }
    }

    /// Total number of addressable bytes behind this cursor.
    pub fn limit(&self) -> u64 {
        match &self.backing {
            Backing::Source(src) => src.len(),
            Backing::Compressed(buf) => buf.uncompressed_len as u64,
        }
    }

    /// An independently positioned duplicate sharing the backing store.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// A cursor over a possibly compressed sub-range of this one.
    ///
    /// `base` is the absolute offset of the stored body; `compressed_len` its
    /// stored length and `uncompressed_len` its logical length. The returned
    /// cursor addresses the *uncompressed* bytes starting at offset 0.
    pub fn compressed_view(&self, base: u64, compressed_len: u32, uncompressed_len: u32) -> Self {
        Self {
            backing: Backing::Compressed(CompressedBuf {
                parent: Box::new(self.duplicate()),
                base,
                compressed_len,
                uncompressed_len,
                decompressed: Arc::new(Mutex::new(None)),
            }),
            pos: 0,
        }
    }

    /// Drop any retained decompressed buffer. The next read recomputes it.
    pub fn reclaim_decompressed(&self) {
        if let Backing::Compressed(buf) = &self.backing {
            buf.reclaim();
        }
    }

    /// Current read position for the sequential `read_*` helpers.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move the sequential read position.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Read `len` bytes at the current position and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CursorError> {
        let bytes = self.read(self.pos, len)?;
        self.pos += len as u64;
        Ok(bytes)
    }

    /// Read a big-endian `u8` at the current position.
    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a big-endian `u16` at the current position.
    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        Ok(BigEndian::read_u16(&self.read_bytes(2)?))
    }

    /// Read a big-endian `u32` at the current position.
    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        Ok(BigEndian::read_u32(&self.read_bytes(4)?))
    }

    /// Read a big-endian `u64` at the current position.
    pub fn read_u64(&mut self) -> Result<u64, CursorError> {
        Ok(BigEndian::read_u64(&self.read_bytes(8)?))
    }
}
