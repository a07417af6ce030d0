//! Key → bucket hashing and collision-tree navigation.
//!
//! Keys hash to a bucket index plus a one-byte secondary hash. Records that
//! share a bucket form a binary search tree ordered first by the secondary
//! hash (greater goes left), then by key length, then by key bytes.

use std::cmp::Ordering;

use crate::error::{HdbError, Result};
use crate::format::reader::{BucketEntry, HashDbFile};
use crate::format::record::{decode_at, Content, DataRecord, Decoded, Record};
use crate::format::types::read_le;

/// Bucket index and secondary hash byte for `key`.
pub fn bucket_position(key: &[u8], bucket_count: u64) -> (u64, u8) {
    let mut idx: u64 = 19_780_211;
    let mut hash: u32 = 751;
    for (i, &b) in key.iter().enumerate() {
        idx = idx.wrapping_mul(37).wrapping_add(b as u64);
        hash = hash.wrapping_mul(31) ^ key[key.len() - 1 - i] as u32;
    }
    (idx % bucket_count, hash as u8)
}

/// Which way to go from a tree node while searching for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descend {
    Left,
    Right,
    Found,
}

pub fn descend(hash: u8, key: &[u8], node_hash: u8, node_key: &[u8]) -> Descend {
    let order = hash
        .cmp(&node_hash)
        .then_with(|| key.len().cmp(&node_key.len()))
        .then_with(|| key.cmp(node_key));
    match order {
        Ordering::Greater => Descend::Left,
        Ordering::Less => Descend::Right,
        Ordering::Equal => Descend::Found,
    }
}

/// Outcome of a key lookup.
#[derive(Debug, Clone)]
pub struct Lookup<'a> {
    pub bucket_index: u64,
    pub hash: u8,
    /// Tree nodes visited, including the match.
    pub visited: u64,
    pub record: Option<DataRecord<'a>>,
}

impl HashDbFile {
    /// Read a single bucket directory slot.
    pub fn bucket_entry(&self, index: u64) -> Option<BucketEntry> {
        let meta = self.metadata();
        if index >= meta.bucket_count {
            return None;
        }
        let geometry = self.geometry();
        let width = geometry.pointer_width.bytes();
        let at = meta.bucket_directory_offset as usize + index as usize * width;
        let stored = read_le(self.data(), at, width)?;
        Some(BucketEntry {
            index,
            stored,
            offset: geometry.shift(stored),
        })
    }

    /// Find the record holding `key` by walking its bucket's tree.
    pub fn lookup(&self, key: &[u8]) -> Result<Lookup<'_>> {
        let meta = self.metadata();
        let geometry = self.geometry();
        let (bucket_index, hash) = bucket_position(key, meta.bucket_count);
        let mut result = Lookup {
            bucket_index,
            hash,
            visited: 0,
            record: None,
        };

        let mut offset = self.bucket_entry(bucket_index).and_then(|e| e.offset).unwrap_or(0);
        // a tree can never hold more nodes than the file has record prefixes
        let max_steps = meta.file_len / geometry.data_prefix_size() as u64 + 1;

        while offset != 0 && result.visited < max_steps {
            result.visited += 1;
            let rec = match decode_at(self.data(), offset, &geometry, Content::Load)? {
                Decoded::Record(Record::Data(rec)) => rec,
                _ => return Err(HdbError::NotADataRecord(offset)),
            };
            let node_key = rec.key.unwrap_or_default();
            match descend(hash, key, rec.hash, node_key) {
                Descend::Left => offset = rec.left,
                Descend::Right => offset = rec.right,
                Descend::Found => {
                    result.record = Some(rec);
                    break;
                }
            }
        }
        Ok(result)
    }
}
