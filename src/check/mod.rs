//! Bucket/record reachability checker.
//!
//! Two streaming passes over a database:
//!
//! ```text
//! pass 1: bucket directory  -> every non-empty entry becomes a pending pointer
//! pass 2: record section    -> each data record adds its child pointers,
//!                              then resolves the pointer to its own offset
//!                              (or becomes a pending orphan)
//! ```
//!
//! Pointers left unresolved at the end are dangling; records never pointed
//! at are orphans. Both sets are ordered by offset, and only discrepancies
//! stay in memory once a file is mostly consistent.

pub mod report;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::format::{Content, HashDbFile, Record, ResyncPolicy};
use crate::progress::{NoProgress, ProgressSink};

pub use report::{dump_findings, write_findings};

/// Origin recorded for pointers found inside records, and for records.
pub const RECORD_ORIGIN: i64 = -1;

/// Options for a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    pub resync: ResyncPolicy,
    /// Bucket entries between progress updates in pass 1; 0 disables them.
    pub bucket_progress_interval: u64,
    /// Records between progress updates in pass 2; 0 disables them.
    pub record_progress_interval: u64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            resync: ResyncPolicy::ByteByByte,
            bucket_progress_interval: 1_000_000,
            record_progress_interval: 10_000,
        }
    }
}

/// One unresolved entry: where it came from and the offset involved.
///
/// `origin` is a bucket index for pointers read from the bucket directory,
/// [`RECORD_ORIGIN`] otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Finding {
    pub origin: i64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    pub buckets_scanned: u64,
    pub non_empty_buckets: u64,
    pub child_pointers: u64,
    pub duplicate_offsets: u64,
    /// Pointers at or past the end of the file. Still reported as dangling.
    pub out_of_range_pointers: u64,
    /// Bucket entries whose shifted value does not fit 64 bits. Not tracked.
    pub overflowed_pointers: u64,
    pub data_records: u64,
    pub free_records: u64,
    pub resyncs: u64,
    pub skipped_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub resync: ResyncPolicy,
    /// Pointers with no record at their target, ascending by offset.
    pub dangling: Vec<Finding>,
    /// Records no pointer reaches, ascending by offset.
    pub orphans: Vec<Finding>,
    pub stats: CheckStats,
    /// Set when the record scan stopped on a record running past EOF.
    pub truncated_at: Option<u64>,
}

impl CheckReport {
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.orphans.is_empty() && self.truncated_at.is_none()
    }
}

/// Run both passes over `db` without progress output.
pub fn check(db: &HashDbFile, options: CheckOptions) -> CheckReport {
    check_with_progress(db, options, &mut NoProgress)
}

/// Run both passes over `db`, reporting bucket index against the bucket
/// count in pass 1 and byte offset against the file length in pass 2.
pub fn check_with_progress(db: &HashDbFile, options: CheckOptions, progress: &mut dyn ProgressSink) -> CheckReport {
    let mut checker = OffsetChecker::new(db, options);
    checker.scan_buckets(progress);
    checker.scan_records(progress);
    checker.finish()
}

/// Incremental state of a check. [`check`] drives it end to end.
pub struct OffsetChecker<'a> {
    db: &'a HashDbFile,
    options: CheckOptions,
    /// Pending pointers: offset -> origin.
    offsets: BTreeMap<u64, i64>,
    /// Records not yet pointed at: offset -> origin.
    records: BTreeMap<u64, i64>,
    stats: CheckStats,
    truncated_at: Option<u64>,
}

impl<'a> OffsetChecker<'a> {
    pub fn new(db: &'a HashDbFile, options: CheckOptions) -> Self {
        Self {
            db,
            options,
            offsets: BTreeMap::new(),
            records: BTreeMap::new(),
            stats: CheckStats::default(),
            truncated_at: None,
        }
    }

    /// Pass 1: collect every non-empty bucket entry.
    pub fn scan_buckets(&mut self, progress: &mut dyn ProgressSink) {
        let total = self.db.metadata().bucket_count;
        let every = self.options.bucket_progress_interval;
        tracing::info!("scanning {} bucket entries", total);
        for entry in self.db.bucket_entries() {
            if every > 0 && entry.index % every == 0 {
                progress.update(entry.index, total);
            }
            self.stats.buckets_scanned += 1;
            if entry.is_empty() {
                continue;
            }
            self.stats.non_empty_buckets += 1;
            match entry.offset {
                Some(offset) => self.add_pointer(offset, entry.index as i64),
                None => {
                    tracing::warn!(
                        "bucket {} holds {:#x}, which overflows 64 bits once shifted",
                        entry.index,
                        entry.stored
                    );
                    self.stats.overflowed_pointers += 1;
                }
            }
        }
        progress.update(total, total);
        tracing::info!(
            "{} of {} buckets in use, {} pending offsets",
            self.stats.non_empty_buckets,
            self.stats.buckets_scanned,
            self.offsets.len()
        );
    }

    /// Pass 2: walk the record section and resolve pointers.
    pub fn scan_records(&mut self, progress: &mut dyn ProgressSink) {
        let db = self.db;
        let every = self.options.record_progress_interval;
        tracing::info!(
            "scanning records from offset {} ({:?} resync)",
            db.metadata().record_section_offset,
            self.options.resync
        );

        let mut scanner = db.records(self.options.resync, Content::Skip);
        let mut seen = 0u64;
        while let Some(item) = scanner.next() {
            seen += 1;
            if every > 0 && seen % every == 0 {
                progress.update(scanner.position(), db.len());
            }
            match item {
                Ok(Record::Data(rec)) => {
                    self.stats.data_records += 1;
                    for child in [rec.left, rec.right] {
                        if child != 0 {
                            self.stats.child_pointers += 1;
                            self.add_pointer(child, RECORD_ORIGIN);
                        }
                    }
                    if self.offsets.remove(&rec.offset).is_none() {
                        self.records.insert(rec.offset, RECORD_ORIGIN);
                    }
                }
                Ok(Record::Free(_)) => self.stats.free_records += 1,
                Err(e) => tracing::warn!("record scan stopped: {}", e),
            }
        }

        let scan = scanner.stats();
        self.stats.resyncs = scan.resyncs;
        self.stats.skipped_bytes = scan.skipped_bytes;
        self.truncated_at = scanner.truncated_at();
        progress.update(db.len(), db.len());
        tracing::info!(
            "{} data records, {} free records, {} resyncs",
            self.stats.data_records,
            self.stats.free_records,
            self.stats.resyncs
        );
    }

    /// Pending pointer and record counts so far.
    pub fn pending(&self) -> (usize, usize) {
        (self.offsets.len(), self.records.len())
    }

    pub fn finish(self) -> CheckReport {
        let collect = |set: BTreeMap<u64, i64>| -> Vec<Finding> {
            set.into_iter()
                .map(|(offset, origin)| Finding { origin, offset })
                .collect()
        };
        CheckReport {
            resync: self.options.resync,
            dangling: collect(self.offsets),
            orphans: collect(self.records),
            stats: self.stats,
            truncated_at: self.truncated_at,
        }
    }

    fn add_pointer(&mut self, offset: u64, origin: i64) {
        if offset >= self.db.len() {
            tracing::warn!("offset {} from origin {} lies past the end of the file", offset, origin);
            self.stats.out_of_range_pointers += 1;
        }
        // a child may point back at a record already seen
        if self.records.remove(&offset).is_some() {
            return;
        }
        match self.offsets.get(&offset) {
            Some(&first) => {
                tracing::warn!(
                    "duplicate offset {} from origin {} (first seen from origin {})",
                    offset,
                    origin,
                    first
                );
                self.stats.duplicate_offsets += 1;
            }
            None => {
                self.offsets.insert(offset, origin);
            }
        }
    }
}
