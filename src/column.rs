//! # Column Readers, the Execution-Engine Boundary
//!
//! Adapters consume this surface: one [`ColumnReader`] per leaf branch,
//! grouped into a [`Column`] tree that mirrors nested/struct branches. The
//! adapter supplies entry ranges and an optional worker pool and receives
//! typed [`Array`]s; its own columnar memory format is its business.
//!
//! Interpretations are constructed here, at column creation: an unsupported
//! primitive fails immediately, before any basket is fetched.

use std::sync::Arc;

use crate::array::Array;
use crate::builder::{ArrayBuilder, BasketAccess, BuildError};
use crate::cache::BasketCache;
use crate::file::{Branch, RootFile, Tree};
use crate::interpretation::{Dtype, Interpretation, InterpretationError};
use crate::slim::SlimBranch;
use crate::source::ByteSource;

/// Errors raised while wiring columns for a tree.
#[derive(Debug, thiserror::Error)]
pub enum ColumnError {
    /// The branch's type cannot be decoded. Raised before any I/O.
    #[error("branch '{branch}': {source}")]
    Unsupported {
        /// Offending branch.
        branch: String,
        /// Why the type is unsupported.
        #[source]
        source: InterpretationError,
    },
}

/// Reads entry ranges of one leaf branch as typed arrays.
pub struct ColumnReader {
    branch: Arc<SlimBranch>,
    builder: ArrayBuilder,
}

impl ColumnReader {
    /// Wire a reader for a slim branch. Fails fast if the branch's type has
    /// no decode strategy.
    pub fn new(
        branch: Arc<SlimBranch>,
        cache: BasketCache,
        source: Arc<dyn ByteSource>,
    ) -> Result<Self, ColumnError> {
        let interpretation = Interpretation::from_descriptor(branch.descriptor()).map_err(
            |source| ColumnError::Unsupported {
                branch: branch.name().to_string(),
                source,
            },
        )?;
        let access = BasketAccess::new(branch.clone(), cache, source);
        Ok(Self {
            branch,
            builder: ArrayBuilder::new(access, interpretation),
        })
    }

    /// Branch name.
    pub fn name(&self) -> &str {
        self.branch.name()
    }

    /// The slim descriptor this reader was wired from.
    pub fn branch(&self) -> &Arc<SlimBranch> {
        &self.branch
    }

    /// Total entries in the column.
    pub fn entries(&self) -> u64 {
        self.branch.entries()
    }

    /// Element type produced by this column.
    pub fn dtype(&self) -> Dtype {
        self.builder.interpretation().dtype()
    }

    /// Whether rows have variable length.
    pub fn is_jagged(&self) -> bool {
        matches!(
            self.builder.interpretation(),
            Interpretation::Jagged { .. }
        )
    }

    /// Build the typed array for `[start, stop)`, optionally fanning basket
    /// work out on `pool`.
    pub fn read(
        &self,
        start: u64,
        stop: u64,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Array, BuildError> {
        self.builder.build(start, stop, pool)
    }
}

impl std::fmt::Debug for ColumnReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnReader")
            .field("name", &self.name())
            .field("entries", &self.entries())
            .field("dtype", &self.dtype())
            .finish_non_exhaustive()
    }
}

/// A column of a tree: either one leaf reader or a named record of child
/// columns (the struct shape the adapter needs to reassemble nested rows).
#[derive(Debug)]
pub enum Column {
    /// Leaf column.
    Leaf(ColumnReader),
    /// Nested/struct column; children decode independently.
    Record {
        /// Struct branch name.
        name: String,
        /// Child columns in file order.
        children: Vec<Column>,
    },
}

/// Decoded data for one column: an array per leaf, shaped like the branch
/// nesting (record-of-arrays for struct columns).
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// A leaf's typed array.
    Array(Array),
    /// A struct column's children, by name.
    Record(Vec<(String, ColumnData)>),
}

impl Column {
    /// Wire columns for a branch, recursing through struct branches.
    pub fn from_branch(
        branch: &Branch,
        path: &str,
        cache: &BasketCache,
        source: &Arc<dyn ByteSource>,
    ) -> Result<Self, ColumnError> {
        match SlimBranch::from_branch(branch, path) {
            Some(slim) => Ok(Column::Leaf(ColumnReader::new(
                Arc::new(slim),
                cache.clone(),
                source.clone(),
            )?)),
            None => {
                let children = branch
                    .children()
                    .iter()
                    .map(|child| Column::from_branch(child, path, cache, source))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Column::Record {
                    name: branch.name().to_string(),
                    children,
                })
            }
        }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        match self {
            Column::Leaf(reader) => reader.name(),
            Column::Record { name, .. } => name,
        }
    }

    /// Read `[start, stop)` across this column, leaf by leaf.
    pub fn read(
        &self,
        start: u64,
        stop: u64,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<ColumnData, BuildError> {
        match self {
            Column::Leaf(reader) => Ok(ColumnData::Array(reader.read(start, stop, pool)?)),
            Column::Record { children, .. } => {
                let mut fields = Vec::with_capacity(children.len());
                for child in children {
                    fields.push((child.name().to_string(), child.read(start, stop, pool)?));
                }
                Ok(ColumnData::Record(fields))
            }
        }
    }
}

/// Wire columns for every top-level branch of a tree.
///
/// The returned columns share `cache` and read through the container's byte
/// source; failures here are type-mapping failures, raised before any basket
/// I/O.
pub fn tree_columns(
    file: &RootFile,
    tree: &Tree,
    cache: &BasketCache,
) -> Result<Vec<Column>, ColumnError> {
    tree.branches()
        .iter()
        .map(|branch| Column::from_branch(branch, file.path(), cache, file.source()))
        .collect()
}
