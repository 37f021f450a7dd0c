//! # Typed Arrays
//!
//! The output of the decode pipeline: an immutable, range-addressable
//! [`Array`] of one primitive type. Flat arrays hold a fixed number of
//! elements per row; jagged arrays additionally carry a row-boundary offsets
//! array (element units, one more entry than rows).

use crate::interpretation::Dtype;

/// Errors from array slicing and assembly.
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    /// A subrange request fell outside the array.
    #[error("subrange [{start}, {start}+{count}) out of bounds for {rows} rows")]
    SubrangeOutOfBounds {
        /// First requested row.
        start: usize,
        /// Number of requested rows.
        count: usize,
        /// Rows actually present.
        rows: usize,
    },

    /// Concatenation inputs disagree on type or layout.
    #[error("cannot concatenate arrays of differing type or layout")]
    MismatchedLayout,

    /// Concatenation was asked to assemble nothing.
    #[error("cannot concatenate zero arrays")]
    Empty,
}

/// Decoded values of one primitive type, in native byte order.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValues {
    /// Booleans.
    Bool(Vec<bool>),
    /// Signed 8-bit integers.
    Int8(Vec<i8>),
    /// Unsigned 8-bit integers.
    UInt8(Vec<u8>),
    /// Signed 16-bit integers.
    Int16(Vec<i16>),
    /// Unsigned 16-bit integers.
    UInt16(Vec<u16>),
    /// Signed 32-bit integers.
    Int32(Vec<i32>),
    /// Unsigned 32-bit integers.
    UInt32(Vec<u32>),
    /// Signed 64-bit integers.
    Int64(Vec<i64>),
    /// Unsigned 64-bit integers.
    UInt64(Vec<u64>),
    /// 32-bit floats.
    Float32(Vec<f32>),
    /// 64-bit floats.
    Float64(Vec<f64>),
}

macro_rules! with_values {
    ($self:expr, $v:ident => $e:expr) => {
        match $self {
            TypedValues::Bool($v) => $e,
            TypedValues::Int8($v) => $e,
            TypedValues::UInt8($v) => $e,
            TypedValues::Int16($v) => $e,
            TypedValues::UInt16($v) => $e,
            TypedValues::Int32($v) => $e,
            TypedValues::UInt32($v) => $e,
            TypedValues::Int64($v) => $e,
            TypedValues::UInt64($v) => $e,
            TypedValues::Float32($v) => $e,
            TypedValues::Float64($v) => $e,
        }
    };
}

macro_rules! map_values {
    ($self:expr, $v:ident => $e:expr) => {
        match $self {
            TypedValues::Bool($v) => TypedValues::Bool($e),
            TypedValues::Int8($v) => TypedValues::Int8($e),
            TypedValues::UInt8($v) => TypedValues::UInt8($e),
            TypedValues::Int16($v) => TypedValues::Int16($e),
            TypedValues::UInt16($v) => TypedValues::UInt16($e),
            TypedValues::Int32($v) => TypedValues::Int32($e),
            TypedValues::UInt32($v) => TypedValues::UInt32($e),
            TypedValues::Int64($v) => TypedValues::Int64($e),
            TypedValues::UInt64($v) => TypedValues::UInt64($e),
            TypedValues::Float32($v) => TypedValues::Float32($e),
            TypedValues::Float64($v) => TypedValues::Float64($e),
        }
    };
}

impl TypedValues {
    /// Empty storage for one primitive type.
    pub fn empty(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Bool => TypedValues::Bool(Vec::new()),
            Dtype::Int8 => TypedValues::Int8(Vec::new()),
            Dtype::UInt8 => TypedValues::UInt8(Vec::new()),
            Dtype::Int16 => TypedValues::Int16(Vec::new()),
            Dtype::UInt16 => TypedValues::UInt16(Vec::new()),
            Dtype::Int32 => TypedValues::Int32(Vec::new()),
            Dtype::UInt32 => TypedValues::UInt32(Vec::new()),
            Dtype::Int64 => TypedValues::Int64(Vec::new()),
            Dtype::UInt64 => TypedValues::UInt64(Vec::new()),
            Dtype::Float32 => TypedValues::Float32(Vec::new()),
            Dtype::Float64 => TypedValues::Float64(Vec::new()),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of this storage.
    pub fn dtype(&self) -> Dtype {
        match self {
            TypedValues::Bool(_) => Dtype::Bool,
            TypedValues::Int8(_) => Dtype::Int8,
            TypedValues::UInt8(_) => Dtype::UInt8,
            TypedValues::Int16(_) => Dtype::Int16,
            TypedValues::UInt16(_) => Dtype::UInt16,
            TypedValues::Int32(_) => Dtype::Int32,
            TypedValues::UInt32(_) => Dtype::UInt32,
            TypedValues::Int64(_) => Dtype::Int64,
            TypedValues::UInt64(_) => Dtype::UInt64,
            TypedValues::Float32(_) => Dtype::Float32,
            TypedValues::Float64(_) => Dtype::Float64,
        }
    }

    /// Copy out the elements in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        map_values!(self, v => v[start..end].to_vec())
    }

    fn append(&mut self, other: TypedValues) -> Result<(), ArrayError> {
        use TypedValues::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.extend(b),
            (Int8(a), Int8(b)) => a.extend(b),
            (UInt8(a), UInt8(b)) => a.extend(b),
            (Int16(a), Int16(b)) => a.extend(b),
            (UInt16(a), UInt16(b)) => a.extend(b),
            (Int32(a), Int32(b)) => a.extend(b),
            (UInt32(a), UInt32(b)) => a.extend(b),
            (Int64(a), Int64(b)) => a.extend(b),
            (UInt64(a), UInt64(b)) => a.extend(b),
            (Float32(a), Float32(b)) => a.extend(b),
            (Float64(a), Float64(b)) => a.extend(b),
            _ => return Err(ArrayError::MismatchedLayout),
        }
        Ok(())
    }
}

/// Typed, immutable, range-addressable decode result.
///
/// `len()` counts rows. Flat arrays store `elems_per_row` elements for every
/// row; jagged arrays delimit rows with `offsets` (element units, rebased so
/// `offsets[0] == 0`).
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    elems_per_row: u32,
    rows: usize,
    values: TypedValues,
    offsets: Option<Vec<u64>>,
}

impl Array {
    /// Flat array over decoded values. `values.len()` must be a multiple of
    /// `elems_per_row`; callers (the interpretation engine) validate that.
    pub(crate) fn flat(elems_per_row: u32, values: TypedValues) -> Self {
        let rows = values.len() / elems_per_row.max(1) as usize;
        Self {
            elems_per_row,
            rows,
            values,
            offsets: None,
        }
    }

    /// Jagged array over decoded values with rebased row offsets
    /// (`offsets.len() == rows + 1`, `offsets[0] == 0`).
    pub(crate) fn jagged(values: TypedValues, offsets: Vec<u64>) -> Self {
        let rows = offsets.len().saturating_sub(1);
        Self {
            elems_per_row: 1,
            rows,
            values,
            offsets: Some(offsets),
        }
    }

    /// Array with zero rows of the given type and layout.
    pub(crate) fn empty(dtype: Dtype, elems_per_row: u32, jagged: bool) -> Self {
        if jagged {
            Self::jagged(TypedValues::empty(dtype), vec![0])
        } else {
            Self::flat(elems_per_row, TypedValues::empty(dtype))
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether the array has zero rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Element type.
    pub fn dtype(&self) -> Dtype {
        self.values.dtype()
    }

    /// Elements per row (1 unless the branch has a fixed per-row shape).
    pub fn elems_per_row(&self) -> u32 {
        self.elems_per_row
    }

    /// Whether rows have variable length.
    pub fn is_jagged(&self) -> bool {
        self.offsets.is_some()
    }

    /// Row-boundary offsets of a jagged array, in element units.
    pub fn offsets(&self) -> Option<&[u64]> {
        self.offsets.as_deref()
    }

    /// The flattened decoded values.
    pub fn values(&self) -> &TypedValues {
        &self.values
    }

    /// Extract `count` rows starting at row `start`, as an independent array.
    pub fn subrange(&self, start: usize, count: usize) -> Result<Array, ArrayError> {
        let end = start.checked_add(count).filter(|&e| e <= self.rows).ok_or(
            ArrayError::SubrangeOutOfBounds {
                start,
                count,
                rows: self.rows,
            },
        )?;
        match &self.offsets {
            None => {
                let epr = self.elems_per_row as usize;
                let values = self.values.slice(start * epr, end * epr);
                Ok(Array {
                    elems_per_row: self.elems_per_row,
                    rows: count,
                    values,
                    offsets: None,
                })
            }
            Some(offsets) => {
                let base = offsets[start];
                let rebased: Vec<u64> = offsets[start..=end].iter().map(|o| o - base).collect();
                let values = self
                    .values
                    .slice(offsets[start] as usize, offsets[end] as usize);
                Ok(Array::jagged(values, rebased))
            }
        }
    }

    /// Concatenate arrays in the given order into one contiguous array.
    ///
    /// All parts must share the element type and layout. Jagged offsets are
    /// rebased cumulatively.
    pub fn concat(parts: Vec<Array>) -> Result<Array, ArrayError> {
        let mut iter = parts.into_iter();
        let mut out = iter.next().ok_or(ArrayError::Empty)?;
        for part in iter {
            if part.dtype() != out.dtype()
                || part.is_jagged() != out.is_jagged()
                || part.elems_per_row != out.elems_per_row
            {
                return Err(ArrayError::MismatchedLayout);
            }
            out.rows += part.rows;
            if let (Some(offsets), Some(part_offsets)) = (&mut out.offsets, &part.offsets) {
                let base = *offsets.last().unwrap_or(&0);
                offsets.extend(part_offsets.iter().skip(1).map(|o| o + base));
            }
            out.values.append(part.values)?;
        }
        Ok(out)
    }

    /// The rows as booleans, if that is the element type.
    pub fn as_bools(&self) -> Option<&[bool]> {
        match &self.values {
            TypedValues::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `i8`, if that is the element type.
    pub fn as_i8(&self) -> Option<&[i8]> {
        match &self.values {
            TypedValues::Int8(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `u8`, if that is the element type.
    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.values {
            TypedValues::UInt8(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `i16`, if that is the element type.
    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.values {
            TypedValues::Int16(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `u16`, if that is the element type.
    pub fn as_u16(&self) -> Option<&[u16]> {
        match &self.values {
            TypedValues::UInt16(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `i32`, if that is the element type.
    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.values {
            TypedValues::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `u32`, if that is the element type.
    pub fn as_u32(&self) -> Option<&[u32]> {
        match &self.values {
            TypedValues::UInt32(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `i64`, if that is the element type.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.values {
            TypedValues::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `u64`, if that is the element type.
    pub fn as_u64(&self) -> Option<&[u64]> {
        match &self.values {
            TypedValues::UInt64(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `f32`, if that is the element type.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.values {
            TypedValues::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// The flattened values as `f64`, if that is the element type.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.values {
            TypedValues::Float64(v) => Some(v),
            _ => None,
        }
    }
}
