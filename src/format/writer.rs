//! Destination writer for the hash database format.
//!
//! Implements the small engine surface the resharding pipeline needs:
//! create a database with a given [`Tuning`], insert-if-absent, close. New
//! records are appended at the end of the file and linked into their
//! bucket's collision tree, so the result is laid out exactly like a file
//! produced by the engine's own bulk load.
//!
//! ## Layout of a fresh file
//!
//! ```text
//! [header 256 bytes]
//! [bucket directory: bucket_count x pointer_width, zeroed]
//! [free-block pool: 2^free_block_power x 2 bytes, zeroed]
//! [padding to the alignment]
//! [records...]
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{HdbError, Result};
use crate::format::header::{DatabaseMetadata, Tuning};
use crate::format::lookup::{bucket_position, descend, Descend};
use crate::format::record::{decode_data_header, encode_data_record, padding_for, DataHeader};
use crate::format::types::*;
use crate::format::varint;

/// Anything that accepts key/value pairs without overwriting.
pub trait RecordSink {
    /// Store `key` → `value` unless `key` is already present.
    ///
    /// Returns `false` when the write was declined because the key exists.
    fn put_if_absent(&mut self, key: &[u8], value: &[u8]) -> Result<bool>;
}

/// Single-writer handle on a hash database file.
pub struct HashDbWriter {
    file: File,
    path: PathBuf,
    meta: DatabaseMetadata,
    geometry: Geometry,
    /// Option bits written into the header on close.
    options_on_close: DbOptions,
    /// Append position, always aligned.
    end: u64,
    closed: bool,
}

impl HashDbWriter {
    /// Create (or truncate) a database at `path` laid out with `tuning`.
    pub fn create(path: &Path, tuning: Tuning) -> Result<Self> {
        validate_tuning(&tuning)?;
        let geometry = tuning.geometry();
        let directory_end = HEADER_SIZE as u64 + tuning.bucket_count * geometry.pointer_width.bytes() as u64;
        let pool_end = directory_end + (1u64 << tuning.free_block_power) * FREE_POOL_SLOT_SIZE;
        let first_record = geometry.align_up(pool_end);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        // zero-filled directory and pool
        file.set_len(first_record)?;

        let meta = DatabaseMetadata {
            db_type: DB_TYPE_HASH,
            flags: DbFlags(DbFlags::OPEN),
            alignment_power: tuning.alignment_power,
            free_block_power: tuning.free_block_power,
            options: tuning.options,
            pointer_width: geometry.pointer_width,
            bucket_count: tuning.bucket_count,
            bucket_directory_offset: HEADER_SIZE as u64,
            record_count_hint: 0,
            recorded_file_size: first_record,
            record_section_offset: first_record,
            file_len: first_record,
        };

        let mut writer = Self {
            file,
            path: path.to_path_buf(),
            meta,
            geometry,
            options_on_close: tuning.options,
            end: first_record,
            closed: false,
        };
        writer.write_header()?;
        tracing::debug!(
            "created {:?}: {} buckets, alignment {}, first record at {}",
            writer.path,
            tuning.bucket_count,
            geometry.alignment(),
            first_record
        );
        Ok(writer)
    }

    /// Reopen an existing database for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let mut meta = DatabaseMetadata::read(path)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let geometry = meta.geometry();
        let end = geometry.align_up(meta.file_len);
        if end != meta.file_len {
            file.set_len(end)?;
        }
        let options_on_close = meta.options;
        meta.flags = DbFlags(meta.flags.0 | DbFlags::OPEN);

        let mut writer = Self {
            file,
            path: path.to_path_buf(),
            meta,
            geometry,
            options_on_close,
            end,
            closed: false,
        };
        writer.write_header()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &DatabaseMetadata {
        &self.meta
    }

    /// Records written so far, including any present when opened.
    pub fn record_count(&self) -> u64 {
        self.meta.record_count_hint
    }

    /// Clear the deflate option for the duration of a bulk load. The
    /// original options are written back by [`HashDbWriter::close`].
    pub fn suspend_compression(&mut self) -> Result<()> {
        self.meta.options = self.meta.options.without(DbOptions::DEFLATE);
        tracing::debug!("{:?}: options set to {:#04x} for bulk load", self.path, self.meta.options.bits());
        self.write_header()
    }

    /// Finalize the header and close the file.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.meta.options = self.options_on_close;
        self.meta.flags = DbFlags(self.meta.flags.0 & !DbFlags::OPEN);
        self.meta.recorded_file_size = self.end;
        self.meta.file_len = self.end;
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.meta.write_to(&mut buf)?;
        self.write_at(0, &buf)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, pos: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read_pointer(&mut self, pos: u64) -> Result<u64> {
        let width = self.geometry.pointer_width.bytes();
        let mut buf = [0u8; 8];
        self.read_at(pos, &mut buf[..width])?;
        let stored = u64::from_le_bytes(buf);
        self.geometry.shift(stored).ok_or(HdbError::NotADataRecord(pos))
    }

    /// Header and key of the data record at `offset`.
    fn read_node(&mut self, offset: u64) -> Result<(DataHeader, Vec<u8>)> {
        if offset >= self.end {
            return Err(HdbError::NotADataRecord(offset));
        }
        let max_header = self.geometry.data_prefix_size() + 2 * varint::MAX_VARINT_LEN;
        let available = (self.end - offset).min(max_header as u64) as usize;
        let mut buf = vec![0u8; available];
        self.read_at(offset, &mut buf)?;

        let header = decode_data_header(&buf, offset, &self.geometry)?.ok_or(HdbError::NotADataRecord(offset))?;
        if header.total_length().map_or(true, |t| offset + t > self.end) {
            return Err(HdbError::Truncated {
                offset: offset + header.header_len,
                field: "key/value",
            });
        }
        let mut key = vec![0u8; header.key_size as usize];
        self.read_at(offset + header.header_len, &mut key)?;
        Ok((header, key))
    }
}

impl RecordSink for HashDbWriter {
    fn put_if_absent(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let width = self.geometry.pointer_width.bytes() as u64;
        let (bucket_index, hash) = bucket_position(key, self.meta.bucket_count);

        // file position of the slot that will point at the new record
        let mut link = self.meta.bucket_directory_offset + bucket_index * width;
        let mut offset = self.read_pointer(link)?;

        while offset != 0 {
            let (node, node_key) = self.read_node(offset)?;
            match descend(hash, key, node.hash, &node_key) {
                Descend::Left => {
                    link = offset + 2;
                    offset = node.left;
                }
                Descend::Right => {
                    link = offset + 2 + width;
                    offset = node.right;
                }
                Descend::Found => return Ok(false),
            }
        }

        let record_offset = self.end;
        let stored = self.geometry.unshift(record_offset).ok_or(HdbError::OffsetOverflow {
            offset: record_offset,
            width: width as usize,
            alignment_power: self.geometry.alignment_power,
        })?;

        let unpadded = self.geometry.data_prefix_size() as u64
            + varint::encoded_len(key.len() as u64) as u64
            + varint::encoded_len(value.len() as u64) as u64
            + key.len() as u64
            + value.len() as u64;
        let pad = padding_for(&self.geometry, unpadded);
        let bytes = encode_data_record(&self.geometry, hash, 0, 0, key, value, pad)?;

        self.write_at(record_offset, &bytes)?;
        let pointer = self.geometry.pointer_width.encode(stored);
        self.write_at(link, &pointer)?;

        self.end += bytes.len() as u64;
        self.meta.record_count_hint += 1;
        Ok(true)
    }
}

impl Drop for HashDbWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("failed to finalize {:?}: {}", self.path, e);
        }
    }
}

fn validate_tuning(tuning: &Tuning) -> Result<()> {
    if tuning.bucket_count == 0 {
        return Err(HdbError::UnreadableHeader("bucket count must be > 0".into()));
    }
    if tuning.alignment_power > MAX_ALIGNMENT_POWER {
        return Err(HdbError::UnreadableHeader(format!(
            "alignment power {} exceeds {}",
            tuning.alignment_power, MAX_ALIGNMENT_POWER
        )));
    }
    if tuning.free_block_power > MAX_FREE_BLOCK_POWER {
        return Err(HdbError::UnreadableHeader(format!(
            "free block pool power {} exceeds {}",
            tuning.free_block_power, MAX_FREE_BLOCK_POWER
        )));
    }
    Ok(())
}
