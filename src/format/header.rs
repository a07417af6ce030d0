//! Database header parsing and serialization.
//!
//! The header carries the geometry every other component needs: bucket
//! count, alignment power, pointer width (via the "large" option bit), and
//! where the record section starts.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HdbError, Result};
use crate::format::types::*;

/// Header fields of a hash database file. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseMetadata {
    pub db_type: u8,
    pub flags: DbFlags,
    pub alignment_power: u8,
    pub free_block_power: u8,
    pub options: DbOptions,
    pub pointer_width: PointerWidth,
    pub bucket_count: u64,
    /// Always [`HEADER_SIZE`].
    pub bucket_directory_offset: u64,
    /// Record count as stored by the engine. Advisory only.
    pub record_count_hint: u64,
    /// File size as stored by the engine.
    pub recorded_file_size: u64,
    /// Offset of the first record.
    pub record_section_offset: u64,
    /// Actual length of the file on disk.
    pub file_len: u64,
}

/// Structural parameters shared by a source database and its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    pub bucket_count: u64,
    pub alignment_power: u8,
    pub free_block_power: u8,
    pub options: DbOptions,
}

impl Default for Tuning {
    fn default() -> Self {
        // engine defaults: 131071 buckets, 16-byte alignment, 1024 free slots
        Self {
            bucket_count: 131_071,
            alignment_power: 4,
            free_block_power: 10,
            options: DbOptions(0),
        }
    }
}

impl Tuning {
    pub fn geometry(&self) -> Geometry {
        Geometry::new(PointerWidth::from_options(self.options), self.alignment_power)
    }
}

fn unreadable(msg: impl Into<String>) -> HdbError {
    HdbError::UnreadableHeader(msg.into())
}

impl DatabaseMetadata {
    /// Read and validate the header of the file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut header = Vec::with_capacity(HEADER_SIZE);
        (&file).take(HEADER_SIZE as u64).read_to_end(&mut header)?;
        Self::from_bytes(&header, file_len)
    }

    /// Parse the header from the first bytes of a file of `file_len` bytes.
    pub fn from_bytes(bytes: &[u8], file_len: u64) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(unreadable(format!(
                "file holds {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if !bytes.starts_with(MAGIC_PREFIX) {
            return Err(unreadable("missing database magic"));
        }

        let db_type = bytes[DB_TYPE_OFFSET];
        if db_type != DB_TYPE_HASH {
            return Err(unreadable(format!("not a hash database (type {db_type})")));
        }

        let alignment_power = bytes[ALIGNMENT_POWER_OFFSET];
        if alignment_power > MAX_ALIGNMENT_POWER {
            return Err(unreadable(format!("alignment power {alignment_power} exceeds {MAX_ALIGNMENT_POWER}")));
        }
        let free_block_power = bytes[FREE_BLOCK_POWER_OFFSET];
        if free_block_power > MAX_FREE_BLOCK_POWER {
            return Err(unreadable(format!(
                "free block pool power {free_block_power} exceeds {MAX_FREE_BLOCK_POWER}"
            )));
        }

        let options = DbOptions(bytes[OPTIONS_OFFSET]);
        let pointer_width = PointerWidth::from_options(options);
        let field = |offset: usize| read_le(bytes, offset, 8).unwrap_or_default();
        let bucket_count = field(BUCKET_COUNT_OFFSET);
        let record_count_hint = field(RECORD_COUNT_OFFSET);
        let recorded_file_size = field(FILE_SIZE_OFFSET);
        let record_section_offset = field(FIRST_RECORD_OFFSET);

        if bucket_count == 0 {
            return Err(unreadable("bucket count is zero"));
        }
        let directory_end = bucket_count
            .checked_mul(pointer_width.bytes() as u64)
            .and_then(|len| len.checked_add(HEADER_SIZE as u64))
            .ok_or_else(|| unreadable(format!("bucket count {bucket_count} overflows the address space")))?;
        if directory_end > record_section_offset {
            return Err(unreadable(format!(
                "bucket directory ends at {directory_end}, past the first record at {record_section_offset}"
            )));
        }
        if record_section_offset > file_len {
            return Err(unreadable(format!(
                "first record at {record_section_offset} lies past the end of the {file_len}-byte file"
            )));
        }
        if recorded_file_size != file_len {
            tracing::warn!(
                "header records a file size of {} bytes, file is {} bytes",
                recorded_file_size,
                file_len
            );
        }

        Ok(Self {
            db_type,
            flags: DbFlags(bytes[FLAGS_OFFSET]),
            alignment_power,
            free_block_power,
            options,
            pointer_width,
            bucket_count,
            bucket_directory_offset: HEADER_SIZE as u64,
            record_count_hint,
            recorded_file_size,
            record_section_offset,
            file_len,
        })
    }

    /// Write the 256-byte header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[..MAGIC_TEXT.len()].copy_from_slice(MAGIC_TEXT);
        header[DB_TYPE_OFFSET] = self.db_type;
        header[FLAGS_OFFSET] = self.flags.0;
        header[ALIGNMENT_POWER_OFFSET] = self.alignment_power;
        header[FREE_BLOCK_POWER_OFFSET] = self.free_block_power;
        header[OPTIONS_OFFSET] = self.options.bits();
        header[BUCKET_COUNT_OFFSET..BUCKET_COUNT_OFFSET + 8].copy_from_slice(&self.bucket_count.to_le_bytes());
        header[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 8].copy_from_slice(&self.record_count_hint.to_le_bytes());
        header[FILE_SIZE_OFFSET..FILE_SIZE_OFFSET + 8].copy_from_slice(&self.recorded_file_size.to_le_bytes());
        header[FIRST_RECORD_OFFSET..FIRST_RECORD_OFFSET + 8]
            .copy_from_slice(&self.record_section_offset.to_le_bytes());
        writer.write_all(&header)?;
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.pointer_width, self.alignment_power)
    }

    pub fn alignment(&self) -> u64 {
        1u64 << self.alignment_power
    }

    /// Bytes occupied by the bucket directory.
    pub fn bucket_directory_len(&self) -> u64 {
        self.bucket_count * self.pointer_width.bytes() as u64
    }

    /// Offset of the free-block pool, right after the bucket directory.
    pub fn free_pool_offset(&self) -> u64 {
        self.bucket_directory_offset + self.bucket_directory_len()
    }

    pub fn tuning(&self) -> Tuning {
        Tuning {
            bucket_count: self.bucket_count,
            alignment_power: self.alignment_power,
            free_block_power: self.free_block_power,
            options: self.options,
        }
    }
}
