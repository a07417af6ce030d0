//! Split one hash database into two shard destinations.
//!
//! Every data record of the source is routed by its key. Records owned by
//! one of the two target bitmasks are inserted into that destination with
//! insert-if-absent semantics; everything else is counted and skipped.
//!
//! ```text
//! source.tch ──scan──▶ route(key) ──┬─ bitmask A ─▶ dest_a.tch
//!                                   ├─ bitmask B ─▶ dest_b.tch
//!                                   └─ other / no id ─▶ unroutable
//! ```

pub mod checkpoint;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{HdbError, Result};
use crate::format::{Content, HashDbFile, HashDbWriter, Record, RecordSink, ResyncPolicy, Tuning};
use crate::progress::ProgressSink;
use crate::shard::{PartitionTable, ShardRouter};

pub use checkpoint::{Checkpoint, CheckpointState, FileCheckpoint, NoCheckpoint};

/// A destination database and the bitmask it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitTarget {
    pub bitmask: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    /// Clear the deflate option on destinations while loading and restore
    /// it on close. Values are copied verbatim either way.
    pub keep_compressed: bool,
    /// Records between progress updates and checkpoints; 0 disables both.
    pub progress_interval: u64,
    pub resync: ResyncPolicy,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            keep_compressed: true,
            progress_interval: 1000,
            resync: ResyncPolicy::Aligned,
        }
    }
}

/// A record sink paired with the bitmask it owns.
pub struct Destination<'a> {
    pub bitmask: u64,
    pub sink: &'a mut dyn RecordSink,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DestinationCounts {
    pub bitmask: u64,
    /// Records routed to this destination.
    pub routed: u64,
    pub written: u64,
    /// Records declined because the key was already present.
    pub conflicts: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    /// Data records read from the source.
    pub scanned: u64,
    /// Record count stored in the source header.
    pub expected: u64,
    pub destinations: [DestinationCounts; 2],
    pub unroutable: u64,
    pub free_records: u64,
    pub resyncs: u64,
    pub skipped_bytes: u64,
    pub truncated_at: Option<u64>,
}

impl SplitSummary {
    /// Every scanned record went to a destination or was counted unroutable.
    pub fn is_balanced(&self) -> bool {
        self.destinations[0].routed + self.destinations[1].routed + self.unroutable == self.scanned
    }
}

/// Route every data record of `source` into one of `destinations`.
///
/// Sink write failures abort the split; routing failures never do.
pub fn split_into(
    source: &HashDbFile,
    router: &ShardRouter,
    destinations: [Destination<'_>; 2],
    options: &SplitOptions,
    progress: &mut dyn ProgressSink,
    checkpoint: &mut dyn Checkpoint,
) -> Result<SplitSummary> {
    validate_bitmasks(router.table(), [destinations[0].bitmask, destinations[1].bitmask])?;

    let mut summary = SplitSummary {
        expected: source.metadata().record_count_hint,
        ..SplitSummary::default()
    };
    for (counts, dest) in summary.destinations.iter_mut().zip(&destinations) {
        counts.bitmask = dest.bitmask;
    }
    let [first, second] = destinations;
    let sinks = [first.sink, second.sink];

    tracing::info!("processing an estimated {} records", summary.expected);
    let mut scanner = source.records(options.resync, Content::Load);
    for item in scanner.by_ref() {
        let rec = match item {
            Ok(Record::Data(rec)) => rec,
            Ok(Record::Free(_)) => {
                summary.free_records += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!("source scan stopped: {}", e);
                break;
            }
        };
        summary.scanned += 1;
        let key = rec.key.unwrap_or_default();
        let value = rec.value.unwrap_or_default();

        let slot = match router.route(key) {
            Ok(shard) => {
                let slot = summary.destinations.iter().position(|d| d.bitmask == shard.bitmask);
                if slot.is_none() {
                    tracing::warn!(
                        "key [{}] maps to bitmask {:#04x}, not {:#04x} or {:#04x}",
                        String::from_utf8_lossy(key),
                        shard.bitmask,
                        summary.destinations[0].bitmask,
                        summary.destinations[1].bitmask
                    );
                }
                slot
            }
            Err(e) if e.is_routing_failure() => {
                tracing::warn!("skipping record at offset {}: {}", rec.offset, e);
                None
            }
            Err(e) => return Err(e),
        };

        match slot {
            Some(i) => {
                let counts = &mut summary.destinations[i];
                counts.routed += 1;
                if sinks[i].put_if_absent(key, value)? {
                    counts.written += 1;
                } else {
                    tracing::debug!("key [{}] already present in destination {}", String::from_utf8_lossy(key), i + 1);
                    counts.conflicts += 1;
                }
            }
            None => summary.unroutable += 1,
        }

        if options.progress_interval > 0 && summary.scanned % options.progress_interval == 0 {
            progress.update(summary.scanned, summary.expected);
            checkpoint.save(summary.scanned, rec.offset + rec.total_length)?;
        }
    }

    let scan = scanner.stats();
    summary.resyncs = scan.resyncs;
    summary.skipped_bytes = scan.skipped_bytes;
    summary.truncated_at = scanner.truncated_at();
    // final line always terminates with a newline
    progress.update(summary.scanned, summary.scanned);

    if summary.unroutable > 0 {
        tracing::warn!("{} records did not route to either destination", summary.unroutable);
    }
    Ok(summary)
}

/// Split the database at `source_path` into two new databases created with
/// the source's tuning.
pub fn split_files(
    source_path: &Path,
    targets: [&SplitTarget; 2],
    table: PartitionTable,
    options: &SplitOptions,
    progress: &mut dyn ProgressSink,
    checkpoint: &mut dyn Checkpoint,
) -> Result<SplitSummary> {
    for target in targets {
        if same_file(&target.path, source_path)? {
            return Err(HdbError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("destination {:?} is the source database", target.path),
            )));
        }
    }
    if same_file(&targets[0].path, &targets[1].path)? {
        return Err(HdbError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destinations {:?} and {:?} are the same file", targets[0].path, targets[1].path),
        )));
    }

    let router = ShardRouter::new(table);
    validate_bitmasks(router.table(), [targets[0].bitmask, targets[1].bitmask])?;

    let source = HashDbFile::open(source_path)?;
    let tuning = source.metadata().tuning();
    tracing::info!(
        "source {:?}: {} buckets, alignment power {}, options {:?}",
        source_path,
        tuning.bucket_count,
        tuning.alignment_power,
        tuning.options.names()
    );

    let mut first = create_destination(&targets[0].path, tuning, options)?;
    let mut second = create_destination(&targets[1].path, tuning, options)?;

    let summary = split_into(
        &source,
        &router,
        [
            Destination {
                bitmask: targets[0].bitmask,
                sink: &mut first,
            },
            Destination {
                bitmask: targets[1].bitmask,
                sink: &mut second,
            },
        ],
        options,
        progress,
        checkpoint,
    )?;

    first.close()?;
    second.close()?;
    Ok(summary)
}

/// Absolute path of `path` with symlinks and `..` resolved. A file that does
/// not exist yet resolves through its parent directory.
fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let name = path.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("{:?} does not name a file", path))
            })?;
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            Ok(parent.canonicalize()?.join(name))
        }
        Err(e) => Err(e),
    }
}

/// Whether two paths name the same file, including hard links.
fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    if resolve_path(a)? == resolve_path(b)? {
        return Ok(true);
    }
    Ok(same_inode(a, b))
}

#[cfg(unix)]
fn same_inode(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(x), Ok(y)) => x.dev() == y.dev() && x.ino() == y.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_inode(_a: &Path, _b: &Path) -> bool {
    false
}

fn create_destination(path: &Path, tuning: Tuning, options: &SplitOptions) -> Result<HashDbWriter> {
    let mut writer = HashDbWriter::create(path, tuning)?;
    if options.keep_compressed && tuning.options.deflate() {
        writer.suspend_compression()?;
    }
    Ok(writer)
}

fn validate_bitmasks(table: &PartitionTable, bitmasks: [u64; 2]) -> Result<()> {
    if bitmasks[0] == bitmasks[1] {
        return Err(HdbError::InvalidPartitionTable(format!(
            "both destinations own bitmask {:#04x}",
            bitmasks[0]
        )));
    }
    for bitmask in bitmasks {
        if table.get(bitmask).is_none() {
            return Err(HdbError::InvalidPartitionTable(format!(
                "bitmask {:#04x} is not part of the {}-way table",
                bitmask,
                table.shard_count()
            )));
        }
    }
    Ok(())
}
