//! # Container Metadata Proxy
//!
//! Parses the structural metadata of one physical file: the container header
//! and named-object directory, tree records (entry count plus branch list),
//! recursive branch records, and per-leaf basket tables.
//!
//! All fields are big-endian. Every serialized record begins with a version
//! indicator; malformed or unsupported records fail the parse with a
//! [`StructuralError`]; the proxy never proceeds on guessed defaults.
//!
//! ## Layout
//!
//! ```text
//! header     := b"root" version:u16 dir_seek:u64
//! directory  := count:u32 { name kind:u16 seek:u64 }*
//! tree       := version:u16 name entries:u64 nbranches:u32 branch*
//! branch     := version:u16 name prim_tag:u8 shape_kind:u8 [fixed_len:u32]
//!               nchildren:u32 ( branch* | basket_table )
//! basket_tbl := k:u32 entry_offsets:(k+1)*u64 basket_record*
//! name       := len:u16 utf8[len]
//! ```

use std::path::Path;
use std::string::FromUtf8Error;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorError};
use crate::source::{ByteSource, FileSource, SourceError};

/// Magic bytes at offset 0 of every container file.
pub const MAGIC: [u8; 4] = *b"root";

/// Container format version this crate reads.
pub const FORMAT_VERSION: u16 = 1;

/// Directory object kind for a tree record.
pub const KIND_TREE: u16 = 1;

// Counts come straight from the file, so preallocation is capped; a bogus
// count cannot demand a huge buffer before its reads fail.
const PREALLOC_LIMIT: usize = 1024;

/// Malformed or unsupported structural metadata.
#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    /// The file does not start with the container magic.
    #[error("bad magic {found:?}, expected {MAGIC:?}")]
    BadMagic {
        /// Bytes actually found at offset 0.
        found: [u8; 4],
    },

    /// The container or record version is not one this crate reads.
    #[error("unsupported {record} version {found}")]
    UnsupportedVersion {
        /// Which record carried the version field.
        record: &'static str,
        /// Version found in the file.
        found: u16,
    },

    /// No tree with the requested name exists in the directory.
    #[error("no tree named '{name}' in directory")]
    TreeNotFound {
        /// Requested tree name.
        name: String,
    },

    /// A serialized name is not valid UTF-8.
    #[error("invalid name encoding: {0}")]
    InvalidName(#[from] FromUtf8Error),

    /// A branch record carries an unknown shape kind.
    #[error("branch '{branch}' has unknown shape kind {found}")]
    InvalidShapeKind {
        /// Branch whose record is malformed.
        branch: String,
        /// Shape kind byte found.
        found: u8,
    },

    /// A basket table violates its layout invariants.
    #[error("branch '{branch}' has an invalid basket table: {reason}")]
    InvalidBasketTable {
        /// Branch whose table is malformed.
        branch: String,
        /// What was violated.
        reason: String,
    },

    /// Metadata could not be read (truncated file or I/O failure).
    #[error("unreadable metadata: {0}")]
    Read(#[from] CursorError),

    /// The file could not be opened.
    #[error("cannot open container: {0}")]
    Open(#[from] SourceError),
}

/// Element type and per-row shape of a leaf branch.
///
/// The primitive is kept as its raw on-disk tag here; mapping it to a decode
/// strategy (and rejecting unknown tags) happens at interpretation
/// construction, before any basket I/O.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// On-disk primitive tag.
    pub primitive_tag: u8,
    /// Per-row shape.
    pub shape: Shape,
}

/// Per-row shape of a leaf branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    /// One element per row.
    Scalar,
    /// A fixed number of elements per row.
    Fixed(u32),
    /// A variable number of elements per row, delimited by an offsets
    /// sub-array in each basket payload.
    Jagged,
}

/// Physical location of one basket on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketRecord {
    /// File offset of the basket record (key header included).
    pub seek: u64,
    /// Length of the key header preceding the body.
    pub key_len: u16,
    /// Stored length of the body.
    pub compressed_len: u32,
    /// Logical length of the body once decompressed.
    pub uncompressed_len: u32,
    /// Global index one past the basket's final entry, known without
    /// touching the basket body.
    pub last_entry: u64,
}

/// Basket layout of a leaf branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasketTable {
    /// `entry_offsets[i]` is the first global entry of basket `i`; the final
    /// element equals the tree's entry count. Strictly increasing.
    pub entry_offsets: Vec<u64>,
    /// Physical record per basket, parallel to `entry_offsets` windows.
    pub baskets: Vec<BasketRecord>,
}

/// A branch either groups child branches or carries leaf data, never both
/// and never neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchData {
    /// Nested/struct branch: children carry the data.
    Struct(Vec<Branch>),
    /// Leaf branch: one basket table.
    Leaf(BasketTable),
}

/// One column's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    name: String,
    descriptor: TypeDescriptor,
    data: BranchData,
}

impl Branch {
    /// Branch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type and shape. Only meaningful for leaf branches.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Children or leaf data.
    pub fn data(&self) -> &BranchData {
        &self.data
    }

    /// Whether this branch carries its own basket data.
    pub fn is_leaf(&self) -> bool {
        matches!(self.data, BranchData::Leaf(_))
    }

    /// The basket table, if this is a leaf branch.
    pub fn basket_table(&self) -> Option<&BasketTable> {
        match &self.data {
            BranchData::Leaf(table) => Some(table),
            BranchData::Struct(_) => None,
        }
    }

    /// Child branches (empty for leaves).
    pub fn children(&self) -> &[Branch] {
        match &self.data {
            BranchData::Struct(children) => children,
            BranchData::Leaf(_) => &[],
        }
    }
}

#[cfg(test)]
impl Branch {
    pub(crate) fn test_leaf(name: &str, descriptor: TypeDescriptor, table: BasketTable) -> Self {
        Self {
            name: name.to_string(),
            descriptor,
            data: BranchData::Leaf(table),
        }
    }

    pub(crate) fn test_struct(name: &str, children: Vec<Branch>) -> Self {
        Self {
            name: name.to_string(),
            descriptor: TypeDescriptor {
                primitive_tag: 0,
                shape: Shape::Scalar,
            },
            data: BranchData::Struct(children),
        }
    }
}

/// Named, immutable collection of branches with a total entry count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    name: String,
    entries: u64,
    branches: Vec<Branch>,
}

impl Tree {
    /// Tree name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total entry count N; valid entry ranges are half-open within `[0, N)`.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Top-level branches in file order.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Find a branch by name, searching nested branches depth-first.
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        fn find<'a>(branches: &'a [Branch], name: &str) -> Option<&'a Branch> {
            for branch in branches {
                if branch.name() == name {
                    return Some(branch);
                }
                if let Some(hit) = find(branch.children(), name) {
                    return Some(hit);
                }
            }
            None
        }
        find(&self.branches, name)
    }

    /// All leaf branches, depth-first.
    pub fn leaves(&self) -> Vec<&Branch> {
        fn collect<'a>(branches: &'a [Branch], out: &mut Vec<&'a Branch>) {
            for branch in branches {
                match branch.data() {
                    BranchData::Leaf(_) => out.push(branch),
                    BranchData::Struct(children) => collect(children, out),
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.branches, &mut out);
        out
    }
}

#[derive(Debug, Clone)]
struct DirEntry {
    name: String,
    kind: u16,
    seek: u64,
}

/// One physical container file: header, directory, and on-demand tree
/// parsing.
pub struct RootFile {
    source: Arc<dyn ByteSource>,
    path: Arc<str>,
    directory: Vec<DirEntry>,
}

impl RootFile {
    /// Open a container from local disk and parse its header and directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StructuralError> {
        let path_str: Arc<str> = path.as_ref().to_string_lossy().into_owned().into();
        let source = FileSource::open(path)?;
        Self::from_source(source, path_str)
    }

    /// Open a container over an arbitrary byte source. `path` identifies the
    /// file for caching and error reporting.
    pub fn from_source(
        source: Arc<dyn ByteSource>,
        path: impl Into<Arc<str>>,
    ) -> Result<Self, StructuralError> {
        let path = path.into();
        let mut cursor = Cursor::new(source.clone());

        let magic = cursor.read_bytes(4)?;
        if magic.as_ref() != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&magic);
            return Err(StructuralError::BadMagic { found });
        }
        let version = cursor.read_u16()?;
        if version != FORMAT_VERSION {
            return Err(StructuralError::UnsupportedVersion {
                record: "container",
                found: version,
            });
        }
        let dir_seek = cursor.read_u64()?;

        cursor.seek(dir_seek);
        let count = cursor.read_u32()?;
        let mut directory = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
        for _ in 0..count {
            let name = read_name(&mut cursor)?;
            let kind = cursor.read_u16()?;
            let seek = cursor.read_u64()?;
            directory.push(DirEntry { name, kind, seek });
        }
        log::debug!("opened container '{}': {} directory entries", path, count);

        Ok(Self {
            source,
            path,
            directory,
        })
    }

    /// Path (or identifier) this container was opened from.
    pub fn path(&self) -> &Arc<str> {
        &self.path
    }

    /// The byte source backing this container.
    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Names of all trees in the directory, in file order.
    pub fn tree_names(&self) -> Vec<&str> {
        self.directory
            .iter()
            .filter(|e| e.kind == KIND_TREE)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Locate and parse the tree stored under `name`.
    pub fn lookup(&self, name: &str) -> Result<Tree, StructuralError> {
        let entry = self
            .directory
            .iter()
            .find(|e| e.kind == KIND_TREE && e.name == name)
            .ok_or_else(|| StructuralError::TreeNotFound {
                name: name.to_string(),
            })?;

        let mut cursor = Cursor::new(self.source.clone());
        cursor.seek(entry.seek);
        parse_tree(&mut cursor)
    }
}

impl std::fmt::Debug for RootFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootFile")
            .field("path", &self.path)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

fn read_name(cursor: &mut Cursor) -> Result<String, StructuralError> {
    let len = cursor.read_u16()? as usize;
    let bytes = cursor.read_bytes(len)?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn parse_tree(cursor: &mut Cursor) -> Result<Tree, StructuralError> {
    let version = cursor.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(StructuralError::UnsupportedVersion {
            record: "tree",
            found: version,
        });
    }
    let name = read_name(cursor)?;
    let entries = cursor.read_u64()?;
    let nbranches = cursor.read_u32()?;
    let mut branches = Vec::with_capacity((nbranches as usize).min(PREALLOC_LIMIT));
    for _ in 0..nbranches {
        branches.push(parse_branch(cursor, entries)?);
    }
    log::debug!(
        "parsed tree '{}': {} entries, {} top-level branches",
        name,
        entries,
        nbranches
    );
    Ok(Tree {
        name,
        entries,
        branches,
    })
}

fn parse_branch(cursor: &mut Cursor, entries: u64) -> Result<Branch, StructuralError> {
    let version = cursor.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(StructuralError::UnsupportedVersion {
            record: "branch",
            found: version,
        });
    }
    let name = read_name(cursor)?;
    let primitive_tag = cursor.read_u8()?;
    let shape_kind = cursor.read_u8()?;
    let shape = match shape_kind {
        0 => Shape::Scalar,
        1 => Shape::Fixed(cursor.read_u32()?),
        2 => Shape::Jagged,
        found => {
            return Err(StructuralError::InvalidShapeKind {
                branch: name,
                found,
            })
        }
    };
    let descriptor = TypeDescriptor {
        primitive_tag,
        shape,
    };

    let nchildren = cursor.read_u32()?;
    let data = if nchildren > 0 {
        let mut children = Vec::with_capacity((nchildren as usize).min(PREALLOC_LIMIT));
        for _ in 0..nchildren {
            children.push(parse_branch(cursor, entries)?);
        }
        BranchData::Struct(children)
    } else {
        BranchData::Leaf(parse_basket_table(cursor, &name, entries)?)
    };

    Ok(Branch {
        name,
        descriptor,
        data,
    })
}

fn parse_basket_table(
    cursor: &mut Cursor,
    branch: &str,
    entries: u64,
) -> Result<BasketTable, StructuralError> {
    let invalid = |reason: String| StructuralError::InvalidBasketTable {
        branch: branch.to_string(),
        reason,
    };

    let k = cursor.read_u32()? as usize;
    let mut entry_offsets = Vec::with_capacity((k + 1).min(PREALLOC_LIMIT));
    for _ in 0..=k {
        entry_offsets.push(cursor.read_u64()?);
    }
    if entry_offsets[0] != 0 {
        return Err(invalid(format!(
            "first entry offset is {}, expected 0",
            entry_offsets[0]
        )));
    }
    if !entry_offsets.windows(2).all(|w| w[0] < w[1]) && k > 0 {
        return Err(invalid("entry offsets not strictly increasing".to_string()));
    }
    if entry_offsets[k] != entries {
        return Err(invalid(format!(
            "final entry offset {} does not match tree entry count {}",
            entry_offsets[k], entries
        )));
    }

    let mut baskets = Vec::with_capacity(k.min(PREALLOC_LIMIT));
    for i in 0..k {
        let seek = cursor.read_u64()?;
        let key_len = cursor.read_u16()?;
        let compressed_len = cursor.read_u32()?;
        let uncompressed_len = cursor.read_u32()?;
        let last_entry = cursor.read_u64()?;
        if last_entry != entry_offsets[i + 1] {
            return Err(invalid(format!(
                "basket {} records last entry {} but the offset table says {}",
                i,
                last_entry,
                entry_offsets[i + 1]
            )));
        }
        baskets.push(BasketRecord {
            seek,
            key_len,
            compressed_len,
            uncompressed_len,
            last_entry,
        });
    }
    Ok(BasketTable {
        entry_offsets,
        baskets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BytesSource;
    use byteorder::{BigEndian, WriteBytesExt};

    fn put_name(buf: &mut Vec<u8>, name: &str) {
        buf.write_u16::<BigEndian>(name.len() as u16).unwrap();
        buf.extend_from_slice(name.as_bytes());
    }

    /// Hand-rolled container with one scalar-f64 leaf under a struct branch.
    fn tiny_container() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        let dir_seek_pos = buf.len();
        buf.write_u64::<BigEndian>(0).unwrap(); // patched below

        // Tree record.
        let tree_seek = buf.len() as u64;
        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        put_name(&mut buf, "events");
        buf.write_u64::<BigEndian>(10).unwrap(); // entries
        buf.write_u32::<BigEndian>(1).unwrap(); // one top-level branch

        // Struct branch "muon" with one leaf child "pt".
        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        put_name(&mut buf, "muon");
        buf.push(0); // primitive tag (unused for structs)
        buf.push(0); // scalar shape kind
        buf.write_u32::<BigEndian>(1).unwrap(); // one child

        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        put_name(&mut buf, "pt");
        buf.push(11); // f64 tag
        buf.push(0); // scalar
        buf.write_u32::<BigEndian>(0).unwrap(); // leaf
        buf.write_u32::<BigEndian>(2).unwrap(); // two baskets
        for off in [0u64, 4, 10] {
            buf.write_u64::<BigEndian>(off).unwrap();
        }
        for (seek, last) in [(1000u64, 4u64), (2000, 10)] {
            buf.write_u64::<BigEndian>(seek).unwrap();
            buf.write_u16::<BigEndian>(12).unwrap();
            buf.write_u32::<BigEndian>(32).unwrap();
            buf.write_u32::<BigEndian>(32).unwrap();
            buf.write_u64::<BigEndian>(last).unwrap();
        }

        // Directory.
        let dir_seek = buf.len() as u64;
        buf.write_u32::<BigEndian>(1).unwrap();
        put_name(&mut buf, "events");
        buf.write_u16::<BigEndian>(KIND_TREE).unwrap();
        buf.write_u64::<BigEndian>(tree_seek).unwrap();

        buf[dir_seek_pos..dir_seek_pos + 8].copy_from_slice(&dir_seek.to_be_bytes());
        buf
    }

    #[test]
    fn parses_nested_tree() {
        let file =
            RootFile::from_source(BytesSource::new(tiny_container()), "mem://tiny").unwrap();
        assert_eq!(file.tree_names(), vec!["events"]);

        let tree = file.lookup("events").unwrap();
        assert_eq!(tree.entries(), 10);
        assert_eq!(tree.branches().len(), 1);

        let muon = &tree.branches()[0];
        assert!(!muon.is_leaf());
        assert_eq!(muon.children().len(), 1);

        let pt = tree.branch("pt").unwrap();
        assert!(pt.is_leaf());
        assert_eq!(pt.descriptor().primitive_tag, 11);
        assert_eq!(pt.descriptor().shape, Shape::Scalar);
        let table = pt.basket_table().unwrap();
        assert_eq!(table.entry_offsets, vec![0, 4, 10]);
        assert_eq!(table.baskets[1].seek, 2000);
        assert_eq!(table.baskets[1].last_entry, 10);
        assert_eq!(tree.leaves().len(), 1);
    }

    #[test]
    fn bad_magic_is_structural() {
        let mut data = tiny_container();
        data[0] = b'X';
        let err = RootFile::from_source(BytesSource::new(data), "mem://bad").unwrap_err();
        assert!(matches!(err, StructuralError::BadMagic { .. }));
    }

    #[test]
    fn unsupported_version_is_structural() {
        let mut data = tiny_container();
        data[4..6].copy_from_slice(&99u16.to_be_bytes());
        let err = RootFile::from_source(BytesSource::new(data), "mem://v99").unwrap_err();
        assert!(matches!(
            err,
            StructuralError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn truncated_container_is_structural() {
        let data = tiny_container();
        let err =
            RootFile::from_source(BytesSource::new(data[..8].to_vec()), "mem://short").unwrap_err();
        assert!(matches!(err, StructuralError::Read(_)));
    }

    #[test]
    fn missing_tree_is_reported() {
        let file =
            RootFile::from_source(BytesSource::new(tiny_container()), "mem://tiny").unwrap();
        let err = file.lookup("nope").unwrap_err();
        assert!(matches!(err, StructuralError::TreeNotFound { name } if name == "nope"));
    }

    #[test]
    fn debug_output_names_the_container() {
        let file =
            RootFile::from_source(BytesSource::new(tiny_container()), "mem://tiny").unwrap();
        let rendered = format!("{file:?}");
        assert!(rendered.contains("mem://tiny"));
        assert!(rendered.contains("events"));
    }

    #[test]
    fn huge_basket_count_fails_without_exhausting_memory() {
        // A leaf whose basket-count field claims u32::MAX baskets in a file
        // that ends shortly after it. The parse must fail on truncation, not
        // attempt a multi-gigabyte preallocation.
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        let dir_seek_pos = buf.len();
        buf.write_u64::<BigEndian>(0).unwrap();

        let tree_seek = buf.len() as u64;
        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        put_name(&mut buf, "events");
        buf.write_u64::<BigEndian>(10).unwrap();
        buf.write_u32::<BigEndian>(1).unwrap();

        buf.write_u16::<BigEndian>(FORMAT_VERSION).unwrap();
        put_name(&mut buf, "pt");
        buf.push(11);
        buf.push(0);
        buf.write_u32::<BigEndian>(0).unwrap(); // leaf
        buf.write_u32::<BigEndian>(u32::MAX).unwrap(); // bogus basket count

        let dir_seek = buf.len() as u64;
        buf.write_u32::<BigEndian>(1).unwrap();
        put_name(&mut buf, "events");
        buf.write_u16::<BigEndian>(KIND_TREE).unwrap();
        buf.write_u64::<BigEndian>(tree_seek).unwrap();
        buf[dir_seek_pos..dir_seek_pos + 8].copy_from_slice(&dir_seek.to_be_bytes());

        let file = RootFile::from_source(BytesSource::new(buf), "mem://huge").unwrap();
        let err = file.lookup("events").unwrap_err();
        assert!(matches!(err, StructuralError::Read(_)));
    }

    #[test]
    fn non_increasing_offsets_are_rejected() {
        // Corrupt the middle entry offset (4 -> 0) so the table decreases.
        let mut data = tiny_container();
        let needle = 4u64.to_be_bytes();
        let pos = data
            .windows(8)
            .position(|w| w == needle)
            .expect("offset present");
        data[pos..pos + 8].copy_from_slice(&0u64.to_be_bytes());

        let file = RootFile::from_source(BytesSource::new(data), "mem://dec").unwrap();
        let err = file.lookup("events").unwrap_err();
        assert!(matches!(err, StructuralError::InvalidBasketTable { .. }));
    }
}
