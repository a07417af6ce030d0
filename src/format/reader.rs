//! Read-only access to a hash database file.
//!
//! `HashDbFile` maps the whole file and hands out streaming iterators over
//! the bucket directory and the record section. Nothing is materialized:
//! each bucket entry and each record is decoded on demand from the mapping.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use serde::Serialize;

use crate::error::{HdbError, Result};
use crate::format::header::DatabaseMetadata;
use crate::format::record::{decode_at, Content, Decoded, Record, ResyncPolicy};
use crate::format::types::*;
use crate::format::varint;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// An open, read-only hash database.
pub struct HashDbFile {
    backing: Backing,
    meta: DatabaseMetadata,
}

impl HashDbFile {
    /// Open and map the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = DatabaseMetadata::read(path)?;
        let file = File::open(path)?;
        advise_sequential(&file);
        let mmap = unsafe { Mmap::map(&file) }?;
        if mmap.len() as u64 != meta.file_len {
            return Err(HdbError::UnreadableHeader(format!(
                "file changed size while opening ({} -> {} bytes)",
                meta.file_len,
                mmap.len()
            )));
        }
        Ok(Self {
            backing: Backing::Mapped(mmap),
            meta,
        })
    }

    /// Wrap an in-memory image of a database file (for testing / embedding).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let meta = DatabaseMetadata::from_bytes(&bytes, bytes.len() as u64)?;
        Ok(Self {
            backing: Backing::Owned(bytes),
            meta,
        })
    }

    pub fn metadata(&self) -> &DatabaseMetadata {
        &self.meta
    }

    pub fn geometry(&self) -> Geometry {
        self.meta.geometry()
    }

    /// Raw file bytes.
    pub fn data(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }

    pub fn len(&self) -> u64 {
        self.data().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Stream every bucket directory entry, empty ones included.
    pub fn bucket_entries(&self) -> BucketEntries<'_> {
        BucketEntries {
            data: self.data(),
            geometry: self.geometry(),
            next_index: 0,
            count: self.meta.bucket_count,
            base: self.meta.bucket_directory_offset as usize,
        }
    }

    /// `(bucket_index, byte_offset)` for every non-empty bucket whose offset
    /// can be represented.
    pub fn bucket_offsets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.bucket_entries()
            .filter(|e| !e.is_empty())
            .filter_map(|e| e.offset.map(|o| (e.index, o)))
    }

    /// Scan the record section from its first record.
    pub fn records(&self, resync: ResyncPolicy, content: Content) -> RecordScanner<'_> {
        self.records_from(self.meta.record_section_offset, resync, content)
    }

    /// Scan records starting at an arbitrary offset.
    pub fn records_from(&self, offset: u64, resync: ResyncPolicy, content: Content) -> RecordScanner<'_> {
        RecordScanner {
            data: self.data(),
            geometry: self.geometry(),
            pos: offset,
            resync,
            content,
            in_desync: false,
            truncated_at: None,
            stats: ScanStats::default(),
        }
    }

    /// Decode the record at `offset` without any resync.
    pub fn record_at(&self, offset: u64, content: Content) -> Result<Option<Record<'_>>> {
        match decode_at(self.data(), offset, &self.geometry(), content)? {
            Decoded::Record(rec) => Ok(Some(rec)),
            Decoded::Desync => Ok(None),
        }
    }

    /// Raw `(position, size)` pairs of the free-block pool, up to the first
    /// empty slot or the first record, whichever comes first.
    pub fn free_pool(&self) -> Vec<FreePoolEntry> {
        let data = self.data();
        let end = self.meta.record_section_offset as usize;
        let slots = 1usize << self.meta.free_block_power;
        let mut pos = self.meta.free_pool_offset() as usize;
        let mut entries = Vec::new();

        while entries.len() < slots && pos < end {
            let Ok((position, used)) = varint::decode(&data[pos..end]) else { break };
            let Ok((size, used2)) = varint::decode(&data[pos + used..end]) else { break };
            if position == 0 && size == 0 {
                break;
            }
            entries.push(FreePoolEntry { position, size });
            pos += used + used2;
        }
        entries
    }
}

#[cfg(target_os = "linux")]
fn advise_sequential(file: &File) {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
    if rc != 0 {
        tracing::debug!("posix_fadvise returned {}", rc);
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_sequential(_file: &File) {}

// ── Bucket directory ───────────────────────────────────────────────

/// One slot of the bucket directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketEntry {
    pub index: u64,
    /// Value as stored (shifted right by the alignment power).
    pub stored: u64,
    /// Byte offset, `None` when shifting the stored value overflows u64.
    pub offset: Option<u64>,
}

impl BucketEntry {
    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }
}

pub struct BucketEntries<'a> {
    data: &'a [u8],
    geometry: Geometry,
    next_index: u64,
    count: u64,
    base: usize,
}

impl Iterator for BucketEntries<'_> {
    type Item = BucketEntry;

    fn next(&mut self) -> Option<BucketEntry> {
        if self.next_index >= self.count {
            return None;
        }
        let width = self.geometry.pointer_width.bytes();
        let at = self.base + self.next_index as usize * width;
        // header validation guarantees the directory lies inside the file
        let stored = read_le(self.data, at, width)?;
        let entry = BucketEntry {
            index: self.next_index,
            stored,
            offset: self.geometry.shift(stored),
        };
        self.next_index += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.count - self.next_index) as usize;
        (left, Some(left))
    }
}

// ── Record section ─────────────────────────────────────────────────

/// Counters kept while scanning the record section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub data_records: u64,
    pub free_records: u64,
    /// Number of desynchronized stretches recovered from.
    pub resyncs: u64,
    /// Bytes skipped while resynchronizing.
    pub skipped_bytes: u64,
}

/// Streaming iterator over the record section.
///
/// Yields records in file order. On a desynchronization it applies its
/// [`ResyncPolicy`] and keeps going; a truncated record yields one error and
/// ends the scan.
pub struct RecordScanner<'a> {
    data: &'a [u8],
    geometry: Geometry,
    pos: u64,
    resync: ResyncPolicy,
    content: Content,
    in_desync: bool,
    truncated_at: Option<u64>,
    stats: ScanStats,
}

impl<'a> RecordScanner<'a> {
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Offset of the record that could not be fully read, if any.
    pub fn truncated_at(&self) -> Option<u64> {
        self.truncated_at
    }

    pub fn resync_policy(&self) -> ResyncPolicy {
        self.resync
    }
}

impl<'a> Iterator for RecordScanner<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.data.len() as u64;
        while self.truncated_at.is_none() && self.pos < end {
            match decode_at(self.data, self.pos, &self.geometry, self.content) {
                Ok(Decoded::Record(rec)) => {
                    self.in_desync = false;
                    self.pos = rec.end();
                    match rec {
                        Record::Data(_) => self.stats.data_records += 1,
                        Record::Free(_) => self.stats.free_records += 1,
                    }
                    return Some(Ok(rec));
                }
                Ok(Decoded::Desync) => {
                    if !self.in_desync {
                        tracing::debug!("no record found at offset {}, resyncing {:?}", self.pos, self.resync);
                        self.stats.resyncs += 1;
                        self.in_desync = true;
                    }
                    let next = self.resync.next_candidate(self.pos, &self.geometry).min(end);
                    self.stats.skipped_bytes += next - self.pos;
                    self.pos = next;
                }
                Err(e) => {
                    self.truncated_at = Some(self.pos);
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// One raw slot of the free-block pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreePoolEntry {
    pub position: u64,
    pub size: u64,
}

/// Result of probing a list of offsets for data-record magic bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    pub probed: u64,
    pub data_magic: u64,
    pub other: u64,
}

/// Count how many `offsets` land on a data-record magic byte. Offsets past
/// the end of the file count as misses.
pub fn probe_offsets(db: &HashDbFile, offsets: impl IntoIterator<Item = u64>) -> ProbeStats {
    let data = db.data();
    let mut stats = ProbeStats::default();
    for offset in offsets {
        stats.probed += 1;
        let hit = usize::try_from(offset)
            .ok()
            .and_then(|o| data.get(o))
            .is_some_and(|&b| b == MAGIC_DATA_RECORD);
        if hit {
            stats.data_magic += 1;
        } else {
            stats.other += 1;
        }
    }
    stats
}

/// Totals gathered by a plain pass over every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordTotals {
    pub data_records: u64,
    pub free_records: u64,
    pub key_bytes: u64,
    pub value_bytes: u64,
    pub free_bytes: u64,
    pub resyncs: u64,
    pub skipped_bytes: u64,
    pub truncated_at: Option<u64>,
}

/// Walk every record and total up counts and byte sizes.
pub fn record_totals(db: &HashDbFile, resync: ResyncPolicy) -> RecordTotals {
    let mut totals = RecordTotals::default();
    let mut scanner = db.records(resync, Content::Skip);
    for item in scanner.by_ref() {
        match item {
            Ok(Record::Data(rec)) => {
                totals.data_records += 1;
                totals.key_bytes += rec.key_size;
                totals.value_bytes += rec.value_size;
            }
            Ok(Record::Free(rec)) => {
                totals.free_records += 1;
                totals.free_bytes += rec.total_length;
            }
            Err(e) => tracing::warn!("record scan stopped: {}", e),
        }
    }
    let stats = scanner.stats();
    totals.resyncs = stats.resyncs;
    totals.skipped_bytes = stats.skipped_bytes;
    totals.truncated_at = scanner.truncated_at();
    totals
}
