//! # Compressed Block Decoding
//!
//! Basket bodies are stored either raw or as a single compressed block. A
//! compressed block carries a small header (a two-byte codec tag plus the
//! compressed and uncompressed payload sizes) followed by the codec stream.
//!
//! Decompression is all-or-nothing: the whole block is decoded in one pass
//! and the output must match the declared uncompressed length exactly.
//! Truncated or padded output is a corruption error, never silently accepted.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use flate2::read::ZlibDecoder;

/// Length of the header preceding the codec stream in a compressed block:
/// 2-byte tag, 4-byte compressed size, 4-byte uncompressed size.
pub const BLOCK_HEADER_LEN: usize = 10;

/// Codecs a compressed block may be encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// zlib / DEFLATE (`ZL`).
    Zlib,
    /// LZ4 block format (`L4`).
    Lz4,
    /// Zstandard (`ZS`).
    Zstd,
}

impl Codec {
    /// Look up a codec by its two-byte block-header tag.
    pub fn from_tag(tag: [u8; 2]) -> Option<Self> {
        match &tag {
            b"ZL" => Some(Codec::Zlib),
            b"L4" => Some(Codec::Lz4),
            b"ZS" => Some(Codec::Zstd),
            _ => None,
        }
    }

    /// The two-byte tag written into block headers for this codec.
    pub fn tag(&self) -> [u8; 2] {
        match self {
            Codec::Zlib => *b"ZL",
            Codec::Lz4 => *b"L4",
            Codec::Zstd => *b"ZS",
        }
    }
}

/// Errors produced while decoding a compressed block.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// The block header names a codec this build does not understand.
    #[error("unknown codec tag {tag:?}")]
    UnknownCodec {
        /// Tag found in the block header.
        tag: [u8; 2],
    },

    /// The block is too short to contain its own header.
    #[error("compressed block truncated: {len} bytes, need at least {BLOCK_HEADER_LEN}")]
    TruncatedBlock {
        /// Actual block length.
        len: usize,
    },

    /// The sizes declared inside the block disagree with the basket record.
    #[error("block header declares {in_block} uncompressed bytes, basket record declares {declared}")]
    DeclaredSizeMismatch {
        /// Uncompressed size from the block header.
        in_block: usize,
        /// Uncompressed size from the enclosing basket record.
        declared: usize,
    },

    /// The codec stream does not fit inside the block.
    #[error("block header declares a {stream_len}-byte codec stream but only {available} bytes follow")]
    StreamOverrun {
        /// Stream length from the block header.
        stream_len: usize,
        /// Bytes actually present after the header.
        available: usize,
    },

    /// The codec produced a different number of bytes than declared.
    #[error("decompressed length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Declared uncompressed length.
        expected: usize,
        /// Bytes the codec actually produced.
        actual: usize,
    },

    /// zlib / zstd stream failure.
    #[error("codec stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// LZ4 block failure.
    #[error("lz4 block error: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),
}

/// Decompress one whole block, verifying the output length.
///
/// `declared_len` is the uncompressed length recorded in the enclosing basket
/// record; it must agree with the block's own header. On success exactly
/// `declared_len` bytes are returned.
pub fn decompress_block(block: &[u8], declared_len: usize) -> Result<Bytes, CompressionError> {
    if block.len() < BLOCK_HEADER_LEN {
        return Err(CompressionError::TruncatedBlock { len: block.len() });
    }
    let tag = [block[0], block[1]];
    let codec = Codec::from_tag(tag).ok_or(CompressionError::UnknownCodec { tag })?;
    let stream_len = BigEndian::read_u32(&block[2..6]) as usize;
    let uncompressed_len = BigEndian::read_u32(&block[6..10]) as usize;

    if uncompressed_len != declared_len {
        return Err(CompressionError::DeclaredSizeMismatch {
            in_block: uncompressed_len,
            declared: declared_len,
        });
    }
    let available = block.len() - BLOCK_HEADER_LEN;
    if stream_len > available {
        return Err(CompressionError::StreamOverrun {
            stream_len,
            available,
        });
    }
    let stream = &block[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + stream_len];

    let out = match codec {
        Codec::Zlib => {
            let mut out = Vec::with_capacity(uncompressed_len);
            ZlibDecoder::new(stream).read_to_end(&mut out)?;
            out
        }
        Codec::Lz4 => lz4_flex::decompress(stream, uncompressed_len)?,
        Codec::Zstd => zstd::decode_all(stream)?,
    };

    if out.len() != uncompressed_len {
        return Err(CompressionError::LengthMismatch {
            expected: uncompressed_len,
            actual: out.len(),
        });
    }
    log::trace!(
        "decompressed {:?} block: {} -> {} bytes",
        codec,
        stream_len,
        uncompressed_len
    );
    Ok(Bytes::from(out))
}
