//! # Array Builder
//!
//! The central decode algorithm: given a half-open entry range and one leaf
//! branch's slim descriptor, select the baskets that intersect the range,
//! fetch and decode each one (through the basket cache, optionally on a
//! caller-owned worker pool), trim the edge chunks, and concatenate into one
//! contiguous typed [`Array`].
//!
//! Basket access is a small capability record, [`BasketAccess`], closed
//! over the slim branch, the cache, and the byte source. The builder itself
//! never touches container metadata.
//!
//! The worker pool is an explicit caller resource: pass `Some(&pool)` to fan
//! baskets out, `None` to fetch sequentially on the calling thread. Every
//! spawned task is joined before `build` returns; if any task fails, sibling
//! results are discarded and no partial array is published.

use std::sync::Arc;

use bytes::Bytes;
use rayon::prelude::*;

use crate::array::{Array, ArrayError};
use crate::cache::{BasketCache, BasketKey};
use crate::cursor::CursorError;
use crate::interpretation::{Interpretation, InterpretationError};
use crate::slim::SlimBranch;
use crate::source::ByteSource;

/// Identity and size of one basket, known without touching its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasketKeyInfo {
    /// Length of the key header preceding the payload on disk.
    pub key_len: u16,
    /// Global index one past the basket's final entry.
    pub last_entry: u64,
    /// Decompressed payload length.
    pub uncompressed_len: u32,
}

/// Why a build failed.
#[derive(Debug, thiserror::Error)]
pub enum BuildCause {
    /// The requested range is not within `[0, entries)`.
    #[error("range out of bounds for {entries} entries")]
    InvalidRange {
        /// Total entries in the branch.
        entries: u64,
    },

    /// The branch's entry-offset table violates its layout invariants.
    ///
    /// Offset tables straight from the parser always hold; this arises from
    /// hand-built or tampered serialized descriptors.
    #[error("entry-offset table must start at zero, increase strictly, and cover every basket")]
    MalformedOffsets,

    /// Fetching or decompressing a basket failed.
    #[error(transparent)]
    Fetch(#[from] CursorError),

    /// Decoding a basket payload failed.
    #[error(transparent)]
    Decode(#[from] InterpretationError),

    /// Trimming or concatenating decoded chunks failed.
    #[error(transparent)]
    Assemble(#[from] ArrayError),
}

/// A failed range build, identifying the branch and entry range.
///
/// One basket's failure voids the whole build; no partial array is ever
/// returned.
#[derive(Debug, thiserror::Error)]
#[error("failed to build entries [{start}, {stop}) of branch '{branch}': {cause}")]
pub struct BuildError {
    /// Branch being built.
    pub branch: String,
    /// Requested range start (inclusive).
    pub start: u64,
    /// Requested range stop (exclusive).
    pub stop: u64,
    /// Underlying failure.
    #[source]
    pub cause: BuildCause,
}

/// Capability record granting basket access for one branch: a key lookup and
/// a cache-resolved payload fetch, closed over the slim descriptor, the
/// basket cache, and the byte source.
#[derive(Clone)]
pub struct BasketAccess {
    branch: Arc<SlimBranch>,
    cache: BasketCache,
    source: Arc<dyn ByteSource>,
    path: Arc<str>,
}

impl BasketAccess {
    /// Close a capability over a slim branch, a cache handle, and the byte
    /// source for the branch's file.
    pub fn new(branch: Arc<SlimBranch>, cache: BasketCache, source: Arc<dyn ByteSource>) -> Self {
        let path: Arc<str> = branch.path().into();
        Self {
            branch,
            cache,
            source,
            path,
        }
    }

    /// The slim branch this capability reads.
    pub fn branch(&self) -> &Arc<SlimBranch> {
        &self.branch
    }

    /// Identity and size of basket `id`, from the basket table alone.
    pub fn basket_key(&self, id: usize) -> BasketKeyInfo {
        let basket = self.branch.basket(id);
        BasketKeyInfo {
            key_len: basket.key_len,
            last_entry: basket.last_entry,
            uncompressed_len: basket.uncompressed_len,
        }
    }

    /// Decompressed payload of basket `id`, key header stripped, resolved
    /// through the cache.
    ///
    /// Racing misses may decompress the same basket twice; both arrive at
    /// the same bytes and at most one cache entry survives.
    pub fn payload(&self, id: usize) -> Result<Bytes, CursorError> {
        let key = BasketKey {
            path: self.path.clone(),
            seek: self.branch.basket(id).seek,
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let payload = self.branch.payload(&self.source, id)?;
        self.cache.put(key, payload.clone());
        Ok(payload)
    }
}

/// Find the minimal contiguous basket index range `[lo, hi]` whose entry
/// intervals intersect `[start, stop)`.
///
/// `offsets` is the branch's basket entry-offset table. A zero-length
/// overlap at a boundary never selects a basket. Assumes a well-formed
/// table (`offsets[0] == 0`, strictly increasing) and
/// `start < stop <= offsets.last()`.
pub fn basket_range(offsets: &[u64], start: u64, stop: u64) -> (usize, usize) {
    let lo = offsets.partition_point(|&o| o <= start) - 1;
    let hi = offsets.partition_point(|&o| o < stop) - 1;
    (lo, hi)
}

/// Builds typed arrays for entry ranges of one leaf branch.
pub struct ArrayBuilder {
    access: BasketAccess,
    interpretation: Interpretation,
}

impl ArrayBuilder {
    /// Builder over a basket-access capability and a decode strategy.
    pub fn new(access: BasketAccess, interpretation: Interpretation) -> Self {
        Self {
            access,
            interpretation,
        }
    }

    /// Total entries in the branch.
    pub fn entries(&self) -> u64 {
        self.access.branch.entries()
    }

    /// The decode strategy in use.
    pub fn interpretation(&self) -> &Interpretation {
        &self.interpretation
    }

    /// Build the typed array for `[start, stop)`.
    ///
    /// With `pool`, baskets are fetched and decoded in parallel; results are
    /// always assembled in ascending entry order and the returned array has
    /// exactly `stop - start` rows.
    pub fn build(
        &self,
        start: u64,
        stop: u64,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Array, BuildError> {
        self.build_inner(start, stop, pool).map_err(|cause| BuildError {
            branch: self.access.branch.name().to_string(),
            start,
            stop,
            cause,
        })
    }

    fn build_inner(
        &self,
        start: u64,
        stop: u64,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Array, BuildCause> {
        let entries = self.entries();
        if start > stop || stop > entries {
            return Err(BuildCause::InvalidRange { entries });
        }
        let offsets = self.access.branch.entry_offsets();
        if offsets.first() != Some(&0)
            || offsets.len() != self.access.branch.num_baskets() + 1
            || !offsets.windows(2).all(|w| w[0] < w[1])
        {
            return Err(BuildCause::MalformedOffsets);
        }
        if start == stop {
            return Ok(self.interpretation.empty_array());
        }

        let (lo, hi) = basket_range(offsets, start, stop);
        log::debug!(
            "building [{start}, {stop}) of '{}' from baskets {lo}..={hi}",
            self.access.branch.name()
        );

        let decode_one = |id: usize| -> Result<Array, BuildCause> {
            let payload = self.access.payload(id)?;
            let rows = offsets[id + 1] - offsets[id];
            Ok(self.interpretation.decode(&payload, rows)?)
        };

        if lo == hi {
            // Single-basket fast path: decode, trim, no concatenation.
            let chunk = decode_one(lo)?;
            let local_start = (start - offsets[lo]) as usize;
            let count = (stop - start) as usize;
            if local_start == 0 && count == chunk.len() {
                return Ok(chunk);
            }
            return Ok(chunk.subrange(local_start, count)?);
        }

        let ids: Vec<usize> = (lo..=hi).collect();
        let chunks: Vec<Array> = match pool {
            Some(pool) => pool.install(|| {
                ids.par_iter()
                    .map(|&id| decode_one(id))
                    .collect::<Result<Vec<_>, _>>()
            })?,
            None => ids
                .iter()
                .map(|&id| decode_one(id))
                .collect::<Result<Vec<_>, _>>()?,
        };

        // Trim the edge chunks to the requested window; interior baskets are
        // used whole.
        let mut trimmed = Vec::with_capacity(chunks.len());
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let basket = lo + i;
            let from = if i == 0 { start - offsets[basket] } else { 0 };
            let to = if i == last {
                stop - offsets[basket]
            } else {
                offsets[basket + 1] - offsets[basket]
            };
            if from == 0 && to as usize == chunk.len() {
                trimmed.push(chunk);
            } else {
                trimmed.push(chunk.subrange(from as usize, (to - from) as usize)?);
            }
        }

        let result = Array::concat(trimmed)?;
        debug_assert_eq!(result.len() as u64, stop - start);
        Ok(result)
    }
}
