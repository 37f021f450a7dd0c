//! # Slim Branch Descriptors
//!
//! A [`SlimBranch`] is the minimal, value-equal snapshot of a leaf branch
//! needed to read its data without re-parsing container metadata: the file
//! path, the basket entry offsets, each basket's physical record, and the
//! branch's type descriptor.
//!
//! Deriving a slim branch from the same [`Branch`] always yields identical
//! values, so slim branches can be serialized and shared across concurrent
//! or distributed readers.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorError};
use crate::file::{BasketRecord, Branch, BranchData, TypeDescriptor};
use crate::source::ByteSource;

/// Physical record of one basket, as carried by a slim branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlimBasket {
    /// File offset of the basket record (key header included).
    pub seek: u64,
    /// Length of the key header preceding the body.
    pub key_len: u16,
    /// Stored length of the body.
    pub compressed_len: u32,
    /// Logical length of the body once decompressed.
    pub uncompressed_len: u32,
    /// Global index one past the basket's final entry.
    pub last_entry: u64,
}

impl From<&BasketRecord> for SlimBasket {
    fn from(rec: &BasketRecord) -> Self {
        Self {
            seek: rec.seek,
            key_len: rec.key_len,
            compressed_len: rec.compressed_len,
            uncompressed_len: rec.uncompressed_len,
            last_entry: rec.last_entry,
        }
    }
}

/// Everything needed to read one leaf branch without the container metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlimBranch {
    path: String,
    name: String,
    entry_offsets: Vec<u64>,
    baskets: Vec<SlimBasket>,
    descriptor: TypeDescriptor,
}

impl SlimBranch {
    /// Derive the slim snapshot of a leaf branch.
    ///
    /// Returns `None` for struct branches, which carry no data of their own;
    /// derive slim branches from their leaf children instead.
    pub fn from_branch(branch: &Branch, path: &str) -> Option<Self> {
        match branch.data() {
            BranchData::Struct(_) => None,
            BranchData::Leaf(table) => Some(Self {
                path: path.to_string(),
                name: branch.name().to_string(),
                entry_offsets: table.entry_offsets.clone(),
                baskets: table.baskets.iter().map(SlimBasket::from).collect(),
                descriptor: branch.descriptor().clone(),
            }),
        }
    }

    /// Path of the file this branch lives in.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Branch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Basket entry offsets; `entry_offsets[i]` is the first global entry of
    /// basket `i` and the final element is the tree's entry count.
    pub fn entry_offsets(&self) -> &[u64] {
        &self.entry_offsets
    }

    /// Total entries in the branch.
    pub fn entries(&self) -> u64 {
        *self.entry_offsets.last().unwrap_or(&0)
    }

    /// Element type and shape.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Number of baskets.
    pub fn num_baskets(&self) -> usize {
        self.baskets.len()
    }

    /// Physical record of basket `id`.
    pub fn basket(&self, id: usize) -> &SlimBasket {
        &self.baskets[id]
    }

    /// Fetch the full decompressed payload of basket `id`, key header
    /// stripped.
    ///
    /// The payload is read through a possibly-compressed cursor overlay, so
    /// raw bodies pass straight through and compressed ones are decoded as a
    /// whole block and length-checked.
    pub fn payload(
        &self,
        source: &Arc<dyn ByteSource>,
        id: usize,
    ) -> Result<Bytes, CursorError> {
        let basket = &self.baskets[id];
        let cursor = Cursor::new(source.clone());
        let body = cursor.compressed_view(
            basket.seek + basket.key_len as u64,
            basket.compressed_len,
            basket.uncompressed_len,
        );
        body.read(0, basket.uncompressed_len as usize)
    }
}

#[cfg(test)]
impl SlimBranch {
    pub(crate) fn test_new(
        path: &str,
        name: &str,
        entry_offsets: Vec<u64>,
        baskets: Vec<SlimBasket>,
        descriptor: TypeDescriptor,
    ) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            entry_offsets,
            baskets,
            descriptor,
        }
    }
}
