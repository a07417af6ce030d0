//! Single-file hash database format.
//!
//! Read side: header parsing, bucket directory access, record decoding and
//! streaming scans over a memory-mapped file. Write side: a minimal
//! insert-only writer that produces files in the same layout.

pub mod types;
pub mod varint;
pub mod record;
pub mod header;
pub mod reader;
pub mod lookup;
pub mod writer;

pub use types::{DbFlags, DbOptions, Geometry, PointerWidth};
pub use record::{Content, DataRecord, Decoded, FreeRecord, Record, ResyncPolicy};
pub use header::{DatabaseMetadata, Tuning};
pub use reader::{
    probe_offsets, record_totals, BucketEntry, FreePoolEntry, HashDbFile, ProbeStats, RecordScanner,
    RecordTotals, ScanStats,
};
pub use lookup::{bucket_position, Lookup};
pub use writer::{HashDbWriter, RecordSink};
