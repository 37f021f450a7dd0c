//! # Interpretation Engine
//!
//! Decoding strategies that turn a raw basket payload into a typed chunk.
//! The strategy for a branch is chosen once, from its type descriptor,
//! before any basket I/O; unknown primitive tags fail fast here.
//!
//! Strategies form a closed set:
//!
//! - [`Interpretation::Dtype`]: dense rows of one big-endian primitive,
//!   optionally with a fixed number of elements per row.
//! - [`Interpretation::Jagged`]: a row-boundary offsets sub-array (byte
//!   units of the inner element) followed by the flattened inner data.
//!
//! Struct branches have no strategy of their own; each child decodes
//! independently and the column layer presents the record-of-arrays view.

use byteorder::{BigEndian, ByteOrder};

use crate::array::{Array, TypedValues};
use crate::file::{Shape, TypeDescriptor};

/// Errors raised while constructing or applying a decode strategy.
#[derive(Debug, thiserror::Error)]
pub enum InterpretationError {
    /// The branch declares a primitive this crate cannot decode. Raised at
    /// strategy construction, before any I/O.
    #[error("unsupported primitive tag {tag}")]
    UnsupportedPrimitive {
        /// On-disk primitive tag.
        tag: u8,
    },

    /// A fixed per-row shape of zero elements is meaningless.
    #[error("fixed per-row length of zero")]
    ZeroFixedLength,

    /// The payload does not divide into whole rows.
    #[error("payload of {payload_len} bytes is not a whole number of {row_bytes}-byte rows")]
    NonIntegralRows {
        /// Payload length in bytes.
        payload_len: usize,
        /// Bytes per row.
        row_bytes: usize,
    },

    /// The payload holds a different number of rows than the basket table
    /// declares.
    #[error("payload holds {actual} rows, basket table declares {expected}")]
    RowCountMismatch {
        /// Rows expected from the basket's entry range.
        expected: u64,
        /// Rows actually present in the payload.
        actual: u64,
    },

    /// A jagged payload is too short to hold its offsets sub-array.
    #[error("jagged payload of {payload_len} bytes cannot hold a {needed}-byte offsets sub-array")]
    OffsetsTruncated {
        /// Payload length in bytes.
        payload_len: usize,
        /// Bytes required by the offsets sub-array.
        needed: usize,
    },

    /// The jagged offsets sub-array decreases.
    #[error("jagged offsets not monotonic at index {index}: {prev} followed by {next}")]
    NonMonotonicOffsets {
        /// Index of the offending offset.
        index: usize,
        /// Preceding offset value.
        prev: u32,
        /// Offending offset value.
        next: u32,
    },

    /// A jagged offset does not land on an element boundary.
    #[error("jagged offset {offset} at index {index} is not a multiple of the {elem_size}-byte element size")]
    MisalignedOffset {
        /// Index of the offending offset.
        index: usize,
        /// Offending offset value (bytes).
        offset: u32,
        /// Inner element size in bytes.
        elem_size: usize,
    },

    /// The flattened region's length disagrees with the final offset.
    #[error("jagged flat data is {actual} bytes but the final offset declares {declared}")]
    FlatLengthMismatch {
        /// Bytes declared by the final offset.
        declared: usize,
        /// Bytes actually present after the offsets sub-array.
        actual: usize,
    },
}

/// Primitive element types of the persisted format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    /// One-byte boolean.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl Dtype {
    /// Map an on-disk primitive tag to a dtype.
    pub fn from_tag(tag: u8) -> Result<Self, InterpretationError> {
        match tag {
            1 => Ok(Dtype::Bool),
            2 => Ok(Dtype::Int8),
            3 => Ok(Dtype::UInt8),
            4 => Ok(Dtype::Int16),
            5 => Ok(Dtype::UInt16),
            6 => Ok(Dtype::Int32),
            7 => Ok(Dtype::UInt32),
            8 => Ok(Dtype::Int64),
            9 => Ok(Dtype::UInt64),
            10 => Ok(Dtype::Float32),
            11 => Ok(Dtype::Float64),
            tag => Err(InterpretationError::UnsupportedPrimitive { tag }),
        }
    }

    /// The on-disk tag for this dtype.
    pub fn tag(&self) -> u8 {
        match self {
            Dtype::Bool => 1,
            Dtype::Int8 => 2,
            Dtype::UInt8 => 3,
            Dtype::Int16 => 4,
            Dtype::UInt16 => 5,
            Dtype::Int32 => 6,
            Dtype::UInt32 => 7,
            Dtype::Int64 => 8,
            Dtype::UInt64 => 9,
            Dtype::Float32 => 10,
            Dtype::Float64 => 11,
        }
    }

    /// Element size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Dtype::Bool | Dtype::Int8 | Dtype::UInt8 => 1,
            Dtype::Int16 | Dtype::UInt16 => 2,
            Dtype::Int32 | Dtype::UInt32 | Dtype::Float32 => 4,
            Dtype::Int64 | Dtype::UInt64 | Dtype::Float64 => 8,
        }
    }

    /// Decode a big-endian byte run into typed values. `data.len()` must be
    /// a multiple of [`Dtype::size`]; callers validate that first.
    fn decode_values(&self, data: &[u8]) -> TypedValues {
        match self {
            Dtype::Bool => TypedValues::Bool(data.iter().map(|&b| b != 0).collect()),
            Dtype::Int8 => TypedValues::Int8(data.iter().map(|&b| b as i8).collect()),
            Dtype::UInt8 => TypedValues::UInt8(data.to_vec()),
            Dtype::Int16 => {
                TypedValues::Int16(data.chunks_exact(2).map(BigEndian::read_i16).collect())
            }
            Dtype::UInt16 => {
                TypedValues::UInt16(data.chunks_exact(2).map(BigEndian::read_u16).collect())
            }
            Dtype::Int32 => {
                TypedValues::Int32(data.chunks_exact(4).map(BigEndian::read_i32).collect())
            }
            Dtype::UInt32 => {
                TypedValues::UInt32(data.chunks_exact(4).map(BigEndian::read_u32).collect())
            }
            Dtype::Int64 => {
                TypedValues::Int64(data.chunks_exact(8).map(BigEndian::read_i64).collect())
            }
            Dtype::UInt64 => {
                TypedValues::UInt64(data.chunks_exact(8).map(BigEndian::read_u64).collect())
            }
            Dtype::Float32 => {
                TypedValues::Float32(data.chunks_exact(4).map(BigEndian::read_f32).collect())
            }
            Dtype::Float64 => {
                TypedValues::Float64(data.chunks_exact(8).map(BigEndian::read_f64).collect())
            }
        }
    }
}

/// A decode strategy, chosen per branch before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// Dense rows of one primitive, `elems_per_row` elements each.
    Dtype {
        /// Element type.
        dtype: Dtype,
        /// Elements per row (1 for scalar branches).
        elems_per_row: u32,
    },
    /// Variable-length rows: a byte-offset sub-array then flattened inner
    /// elements.
    Jagged {
        /// Inner element type.
        inner: Dtype,
    },
}

impl Interpretation {
    /// Choose the strategy for a branch's type descriptor.
    ///
    /// Fails fast with [`InterpretationError::UnsupportedPrimitive`] (or
    /// [`InterpretationError::ZeroFixedLength`]) before any basket is
    /// fetched.
    pub fn from_descriptor(desc: &TypeDescriptor) -> Result<Self, InterpretationError> {
        let dtype = Dtype::from_tag(desc.primitive_tag)?;
        match desc.shape {
            Shape::Scalar => Ok(Interpretation::Dtype {
                dtype,
                elems_per_row: 1,
            }),
            Shape::Fixed(0) => Err(InterpretationError::ZeroFixedLength),
            Shape::Fixed(n) => Ok(Interpretation::Dtype {
                dtype,
                elems_per_row: n,
            }),
            Shape::Jagged => Ok(Interpretation::Jagged { inner: dtype }),
        }
    }

    /// Element type decoded by this strategy.
    pub fn dtype(&self) -> Dtype {
        match self {
            Interpretation::Dtype { dtype, .. } => *dtype,
            Interpretation::Jagged { inner } => *inner,
        }
    }

    /// An array with zero rows, typed and shaped for this strategy.
    pub fn empty_array(&self) -> Array {
        match self {
            Interpretation::Dtype {
                dtype,
                elems_per_row,
            } => Array::empty(*dtype, *elems_per_row, false),
            Interpretation::Jagged { inner } => Array::empty(*inner, 1, true),
        }
    }

    /// Decode one basket payload into a typed chunk of exactly `rows` rows.
    pub fn decode(&self, payload: &[u8], rows: u64) -> Result<Array, InterpretationError> {
        match self {
            Interpretation::Dtype {
                dtype,
                elems_per_row,
            } => decode_dense(*dtype, *elems_per_row, payload, rows),
            Interpretation::Jagged { inner } => decode_jagged(*inner, payload, rows),
        }
    }
}

fn decode_dense(
    dtype: Dtype,
    elems_per_row: u32,
    payload: &[u8],
    rows: u64,
) -> Result<Array, InterpretationError> {
    let row_bytes = dtype.size() * elems_per_row as usize;
    if payload.len() % row_bytes != 0 {
        return Err(InterpretationError::NonIntegralRows {
            payload_len: payload.len(),
            row_bytes,
        });
    }
    let actual = (payload.len() / row_bytes) as u64;
    if actual != rows {
        return Err(InterpretationError::RowCountMismatch {
            expected: rows,
            actual,
        });
    }
    Ok(Array::flat(elems_per_row, dtype.decode_values(payload)))
}

fn decode_jagged(inner: Dtype, payload: &[u8], rows: u64) -> Result<Array, InterpretationError> {
    let elem_size = inner.size();
    let n_offsets = rows as usize + 1;
    let needed = n_offsets * 4;
    if payload.len() < needed {
        return Err(InterpretationError::OffsetsTruncated {
            payload_len: payload.len(),
            needed,
        });
    }

    let mut byte_offsets = Vec::with_capacity(n_offsets);
    for i in 0..n_offsets {
        byte_offsets.push(BigEndian::read_u32(&payload[i * 4..i * 4 + 4]));
    }
    if byte_offsets[0] != 0 {
        return Err(InterpretationError::MisalignedOffset {
            index: 0,
            offset: byte_offsets[0],
            elem_size,
        });
    }
    for (i, pair) in byte_offsets.windows(2).enumerate() {
        if pair[1] < pair[0] {
            return Err(InterpretationError::NonMonotonicOffsets {
                index: i + 1,
                prev: pair[0],
                next: pair[1],
            });
        }
    }
    for (i, &off) in byte_offsets.iter().enumerate() {
        if off as usize % elem_size != 0 {
            return Err(InterpretationError::MisalignedOffset {
                index: i,
                offset: off,
                elem_size,
            });
        }
    }

    let flat = &payload[needed..];
    let declared = byte_offsets[rows as usize] as usize;
    if flat.len() != declared {
        return Err(InterpretationError::FlatLengthMismatch {
            declared,
            actual: flat.len(),
        });
    }

    let offsets: Vec<u64> = byte_offsets
        .iter()
        .map(|&o| (o as usize / elem_size) as u64)
        .collect();
    Ok(Array::jagged(inner.decode_values(flat), offsets))
}
