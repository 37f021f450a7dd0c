//! Container-writing helpers shared by the integration tests.
//!
//! The crate only reads the format, so the tests carry their own minimal
//! writer: specs describe trees, branches, and per-basket payloads, and
//! `write_container` lays them out byte for byte as the parser expects.

#![allow(dead_code)]

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;

/// Key header length used for every basket the writer emits: 2-byte marker,
/// 2-byte key length, 4-byte stored length, 4-byte decompressed length.
pub const KEY_LEN: u16 = 12;

/// How a basket body is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Body is the payload verbatim.
    None,
    /// zlib block.
    Zlib,
    /// LZ4 block.
    Lz4,
    /// Zstandard block.
    Zstd,
}

/// One basket's logical payload and how to store it.
pub struct BasketSpec {
    pub payload: Vec<u8>,
    pub rows: u64,
    pub compression: Compression,
    /// When set, the basket record and key header claim this decompressed
    /// length instead of the true one. Used to fabricate corrupt files.
    pub declared_uncompressed: Option<u32>,
}

impl BasketSpec {
    pub fn raw(payload: Vec<u8>, rows: u64) -> Self {
        Self {
            payload,
            rows,
            compression: Compression::None,
            declared_uncompressed: None,
        }
    }

    pub fn compressed(compression: Compression, payload: Vec<u8>, rows: u64) -> Self {
        Self {
            payload,
            rows,
            compression,
            declared_uncompressed: None,
        }
    }
}

/// Per-row shape of a leaf branch spec.
#[derive(Clone, Copy)]
pub enum ShapeSpec {
    Scalar,
    Fixed(u32),
    Jagged,
}

/// A branch to write: a leaf with baskets, or a struct with children.
pub enum BranchSpec {
    Leaf {
        name: String,
        primitive_tag: u8,
        shape: ShapeSpec,
        baskets: Vec<BasketSpec>,
    },
    Struct {
        name: String,
        children: Vec<BranchSpec>,
    },
}

impl BranchSpec {
    pub fn leaf(name: &str, primitive_tag: u8, shape: ShapeSpec, baskets: Vec<BasketSpec>) -> Self {
        BranchSpec::Leaf {
            name: name.to_string(),
            primitive_tag,
            shape,
            baskets,
        }
    }

    pub fn group(name: &str, children: Vec<BranchSpec>) -> Self {
        BranchSpec::Struct {
            name: name.to_string(),
            children,
        }
    }
}

/// A tree to write, with its top-level branches.
pub struct TreeSpec {
    pub name: String,
    pub branches: Vec<BranchSpec>,
}

impl TreeSpec {
    pub fn new(name: &str, branches: Vec<BranchSpec>) -> Self {
        Self {
            name: name.to_string(),
            branches,
        }
    }
}

enum Resolved {
    Leaf {
        name: String,
        primitive_tag: u8,
        shape: ShapeSpec,
        entry_offsets: Vec<u64>,
        // (seek, key_len, compressed_len, uncompressed_len, last_entry)
        records: Vec<(u64, u16, u32, u32, u64)>,
    },
    Struct {
        name: String,
        children: Vec<Resolved>,
    },
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    buf.write_u16::<BigEndian>(name.len() as u16).unwrap();
    buf.extend_from_slice(name.as_bytes());
}

fn encode_body(spec: &BasketSpec) -> Vec<u8> {
    let (tag, stream) = match spec.compression {
        Compression::None => return spec.payload.clone(),
        Compression::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&spec.payload).unwrap();
            (*b"ZL", enc.finish().unwrap())
        }
        Compression::Lz4 => (*b"L4", lz4_flex::compress(&spec.payload)),
        Compression::Zstd => (*b"ZS", zstd::encode_all(spec.payload.as_slice(), 0).unwrap()),
    };
    let mut body = Vec::with_capacity(10 + stream.len());
    body.extend_from_slice(&tag);
    body.write_u32::<BigEndian>(stream.len() as u32).unwrap();
    body.write_u32::<BigEndian>(spec.payload.len() as u32)
        .unwrap();
    body.extend_from_slice(&stream);
    body
}

fn write_baskets(buf: &mut Vec<u8>, spec: &BranchSpec) -> Resolved {
    match spec {
        BranchSpec::Struct { name, children } => Resolved::Struct {
            name: name.clone(),
            children: children.iter().map(|c| write_baskets(buf, c)).collect(),
        },
        BranchSpec::Leaf {
            name,
            primitive_tag,
            shape,
            baskets,
        } => {
            let mut entry_offsets = vec![0u64];
            let mut records = Vec::with_capacity(baskets.len());
            for basket in baskets {
                let body = encode_body(basket);
                let compressed_len = body.len() as u32;
                let uncompressed_len = basket
                    .declared_uncompressed
                    .unwrap_or(basket.payload.len() as u32);
                let seek = buf.len() as u64;

                buf.extend_from_slice(b"BK");
                buf.write_u16::<BigEndian>(KEY_LEN).unwrap();
                buf.write_u32::<BigEndian>(compressed_len).unwrap();
                buf.write_u32::<BigEndian>(uncompressed_len).unwrap();
                buf.extend_from_slice(&body);

                let last = entry_offsets.last().unwrap() + basket.rows;
                entry_offsets.push(last);
                records.push((seek, KEY_LEN, compressed_len, uncompressed_len, last));
            }
            Resolved::Leaf {
                name: name.clone(),
                primitive_tag: *primitive_tag,
                shape: *shape,
                entry_offsets,
                records,
            }
        }
    }
}

fn first_leaf_entries(branches: &[Resolved]) -> u64 {
    for branch in branches {
        match branch {
            Resolved::Leaf { entry_offsets, .. } => {
                return *entry_offsets.last().unwrap();
            }
            Resolved::Struct { children, .. } => {
                let n = first_leaf_entries(children);
                if n > 0 {
                    return n;
                }
            }
        }
    }
    0
}

fn write_branch(buf: &mut Vec<u8>, branch: &Resolved) {
    buf.write_u16::<BigEndian>(1).unwrap(); // record version
    match branch {
        Resolved::Struct { name, children } => {
            put_name(buf, name);
            buf.push(0); // primitive tag, unused for structs
            buf.push(0); // scalar shape kind
            buf.write_u32::<BigEndian>(children.len() as u32).unwrap();
            for child in children {
                write_branch(buf, child);
            }
        }
        Resolved::Leaf {
            name,
            primitive_tag,
            shape,
            entry_offsets,
            records,
        } => {
            put_name(buf, name);
            buf.push(*primitive_tag);
            match shape {
                ShapeSpec::Scalar => buf.push(0),
                ShapeSpec::Fixed(n) => {
                    buf.push(1);
                    buf.write_u32::<BigEndian>(*n).unwrap();
                }
                ShapeSpec::Jagged => buf.push(2),
            }
            buf.write_u32::<BigEndian>(0).unwrap(); // no children

            buf.write_u32::<BigEndian>(records.len() as u32).unwrap();
            for off in entry_offsets {
                buf.write_u64::<BigEndian>(*off).unwrap();
            }
            for (seek, key_len, compressed_len, uncompressed_len, last) in records {
                buf.write_u64::<BigEndian>(*seek).unwrap();
                buf.write_u16::<BigEndian>(*key_len).unwrap();
                buf.write_u32::<BigEndian>(*compressed_len).unwrap();
                buf.write_u32::<BigEndian>(*uncompressed_len).unwrap();
                buf.write_u64::<BigEndian>(*last).unwrap();
            }
        }
    }
}

/// Serialize a full container: header, basket bodies, tree records, and the
/// trailing directory, with the header's directory seek patched in.
pub fn write_container(trees: &[TreeSpec]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"root");
    buf.write_u16::<BigEndian>(1).unwrap();
    let dir_seek_pos = buf.len();
    buf.write_u64::<BigEndian>(0).unwrap(); // patched below

    let mut directory = Vec::with_capacity(trees.len());
    for tree in trees {
        let resolved: Vec<Resolved> = tree
            .branches
            .iter()
            .map(|b| write_baskets(&mut buf, b))
            .collect();
        let entries = first_leaf_entries(&resolved);

        let tree_seek = buf.len() as u64;
        buf.write_u16::<BigEndian>(1).unwrap(); // record version
        put_name(&mut buf, &tree.name);
        buf.write_u64::<BigEndian>(entries).unwrap();
        buf.write_u32::<BigEndian>(resolved.len() as u32).unwrap();
        for branch in &resolved {
            write_branch(&mut buf, branch);
        }
        directory.push((tree.name.clone(), tree_seek));
    }

    let dir_seek = buf.len() as u64;
    buf.write_u32::<BigEndian>(directory.len() as u32).unwrap();
    for (name, seek) in &directory {
        put_name(&mut buf, name);
        buf.write_u16::<BigEndian>(1).unwrap(); // tree kind
        buf.write_u64::<BigEndian>(*seek).unwrap();
    }
    buf[dir_seek_pos..dir_seek_pos + 8].copy_from_slice(&dir_seek.to_be_bytes());
    buf
}

/// Big-endian element encoders for basket payloads.
pub fn be_f64s(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn be_f32s(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn be_i32s(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn be_u16s(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// Jagged basket payload: a `(rows + 1)`-long table of byte offsets into the
/// flattened element region, followed by the region itself.
pub fn jagged_payload(row_bytes: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut offset = 0u32;
    buf.write_u32::<BigEndian>(0).unwrap();
    for row in row_bytes {
        offset += row.len() as u32;
        buf.write_u32::<BigEndian>(offset).unwrap();
    }
    for row in row_bytes {
        buf.extend_from_slice(row);
    }
    buf
}

/// Jagged payload of big-endian f64 rows.
pub fn jagged_f64(rows: &[Vec<f64>]) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = rows.iter().map(|r| be_f64s(r)).collect();
    jagged_payload(&encoded)
}
