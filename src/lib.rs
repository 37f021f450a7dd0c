//! # rootvec - Columnar Detector Event Data, Decoded
//!
//! `rootvec` reads self-describing columnar containers of detector event
//! data: named trees of branches, each branch split into independently
//! compressed baskets, decoded on demand into contiguous typed arrays for
//! half-open entry ranges.
//!
//! ## Key Features
//!
//! - **Range-addressed decoding**: Ask for entries `[start, stop)` of one
//!   branch and get back exactly `stop - start` rows, assembled from only
//!   the baskets that intersect the range.
//!
//! - **Per-basket compression**: Each basket body is independently stored
//!   raw or compressed (zlib, lz4, zstd), dispatched by a two-byte codec
//!   tag and length-checked after decoding.
//!
//! - **Slim branch descriptors**: A [`slim::SlimBranch`] is a small,
//!   serializable, value-equal snapshot of everything needed to read one
//!   branch, so work can be planned once and shipped to many readers.
//!
//! - **Shared basket cache**: Decompressed payloads live in a bounded,
//!   byte-weighed cache keyed by `(file path, last entry index)`; eviction
//!   only ever costs a re-read.
//!
//! - **Caller-owned parallelism**: Builds fan baskets out on a worker pool
//!   the caller passes in, or run sequentially when given none. Every task
//!   is joined before a build returns.
//!
//! - **Jagged rows**: Variable-length rows decode through an offsets
//!   sub-array carried in each basket payload, validated for monotonicity
//!   and element alignment.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rootvec::prelude::*;
//!
//! let file = RootFile::open("events.root")?;
//! let tree = file.lookup("events")?;
//!
//! let cache = BasketCache::default();
//! let columns = tree_columns(&file, &tree, &cache)?;
//!
//! for column in &columns {
//!     let data = column.read(0, tree.entries(), None)?;
//!     if let ColumnData::Array(arr) = data {
//!         println!("{}: {} rows of {:?}", column.name(), arr.len(), arr.dtype());
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`source`]: random-access byte sources (local files, in-memory buffers)
//! - [`compression`]: tagged compressed blocks and codec dispatch
//! - [`cursor`]: positioned reads and lazily decompressed views
//! - [`file`]: container header, directory, tree and branch metadata
//! - [`slim`]: minimal serializable branch descriptors
//! - [`cache`]: the bounded decompressed-basket cache
//! - [`interpretation`]: primitive types and payload decode strategies
//! - [`array`]: typed result arrays, flat and jagged
//! - [`builder`]: range builds over basket tables
//! - [`column`]: the column-reader surface for execution engines

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod array;
pub mod builder;
pub mod cache;
pub mod column;
pub mod compression;
pub mod cursor;
pub mod file;
pub mod interpretation;
pub mod slim;
pub mod source;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::array::{Array, ArrayError, TypedValues};
    pub use crate::builder::{ArrayBuilder, BasketAccess, BuildCause, BuildError};
    pub use crate::cache::{BasketCache, BasketKey};
    pub use crate::column::{tree_columns, Column, ColumnData, ColumnError, ColumnReader};
    pub use crate::compression::{Codec, CompressionError};
    pub use crate::cursor::{Cursor, CursorError};
    pub use crate::file::{
        Branch, BranchData, RootFile, Shape, StructuralError, Tree, TypeDescriptor,
    };
    pub use crate::interpretation::{Dtype, Interpretation, InterpretationError};
    pub use crate::slim::{SlimBasket, SlimBranch};
    pub use crate::source::{ByteSource, BytesSource, FileSource, SourceError};
}
