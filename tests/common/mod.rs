//! Hand-assembled database images for integration tests.
//!
//! `RawDb` lays records out byte by byte so tests can build files the
//! writer never would: orphans, garbage, free blocks, unaligned records.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use hdbkit::format::header::DatabaseMetadata;
use hdbkit::format::lookup::bucket_position;
use hdbkit::format::record::{encode_data_record, encode_free_record, padding_for};
use hdbkit::format::types::{DbFlags, DbOptions, Geometry, PointerWidth, DB_TYPE_HASH, HEADER_SIZE};
use hdbkit::format::varint;

pub struct RawDb {
    pub options: DbOptions,
    pub geometry: Geometry,
    pub bucket_count: u64,
    /// Written into the header; the checker ignores it.
    pub record_count: u64,
    buckets: Vec<u64>,
    /// Offset of `body[0]`.
    pub first_record: u64,
    body: Vec<u8>,
}

impl RawDb {
    pub fn new(bucket_count: u64, alignment_power: u8, options: u8) -> Self {
        let options = DbOptions(options);
        let geometry = Geometry::new(PointerWidth::from_options(options), alignment_power);
        // one empty free-block pool slot after the directory
        let pool_end = HEADER_SIZE as u64 + bucket_count * geometry.pointer_width.bytes() as u64 + 2;
        Self {
            options,
            geometry,
            bucket_count,
            record_count: 0,
            buckets: vec![0; bucket_count as usize],
            first_record: geometry.align_up(pool_end),
            body: Vec::new(),
        }
    }

    /// Offset the next appended bytes will land at.
    pub fn end(&self) -> u64 {
        self.first_record + self.body.len() as u64
    }

    /// Append an aligned data record and return its offset.
    pub fn data(&mut self, key: &[u8], value: &[u8], left: u64, right: u64) -> u64 {
        let unpadded = self.geometry.data_prefix_size() as u64
            + varint::encoded_len(key.len() as u64) as u64
            + varint::encoded_len(value.len() as u64) as u64
            + key.len() as u64
            + value.len() as u64;
        let pad = padding_for(&self.geometry, unpadded);
        self.data_with_padding(key, value, left, right, pad)
    }

    /// Append a data record with explicit padding, wherever the end is.
    pub fn data_with_padding(&mut self, key: &[u8], value: &[u8], left: u64, right: u64, pad: u16) -> u64 {
        let offset = self.end();
        let (_, hash) = bucket_position(key, self.bucket_count);
        let bytes = encode_data_record(&self.geometry, hash, left, right, key, value, pad).unwrap();
        self.body.extend_from_slice(&bytes);
        offset
    }

    pub fn free(&mut self, total_length: u64) -> u64 {
        let offset = self.end();
        self.body.extend_from_slice(&encode_free_record(total_length));
        offset
    }

    pub fn garbage(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.end();
        self.body.extend_from_slice(bytes);
        offset
    }

    /// Zero-fill up to the next alignment boundary.
    pub fn align(&mut self) {
        let target = self.geometry.align_up(self.end());
        self.body.resize((target - self.first_record) as usize, 0);
    }

    pub fn set_bucket(&mut self, index: u64, offset: u64) {
        self.buckets[index as usize] = self.geometry.unshift(offset).unwrap();
    }

    /// Store a raw value in a bucket slot, bypassing the shift.
    pub fn set_bucket_raw(&mut self, index: u64, stored: u64) {
        self.buckets[index as usize] = stored;
    }

    /// Point `key`'s home bucket at `offset`.
    pub fn link_bucket(&mut self, key: &[u8], offset: u64) {
        let (index, _) = bucket_position(key, self.bucket_count);
        self.set_bucket(index, offset);
    }

    pub fn bytes(&self) -> Vec<u8> {
        let file_len = self.end();
        let meta = DatabaseMetadata {
            db_type: DB_TYPE_HASH,
            flags: DbFlags(0),
            alignment_power: self.geometry.alignment_power,
            free_block_power: 0,
            options: self.options,
            pointer_width: self.geometry.pointer_width,
            bucket_count: self.bucket_count,
            bucket_directory_offset: HEADER_SIZE as u64,
            record_count_hint: self.record_count,
            recorded_file_size: file_len,
            record_section_offset: self.first_record,
            file_len,
        };
        let mut out = Vec::with_capacity(file_len as usize);
        meta.write_to(&mut out).unwrap();
        for stored in &self.buckets {
            out.extend_from_slice(&self.geometry.pointer_width.encode(*stored));
        }
        out.resize(self.first_record as usize, 0);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.bytes()).unwrap();
        path
    }
}
