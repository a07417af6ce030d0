//! hdbkit: offline tooling for single-file hash databases.
//!
//! - [`format`]: read and write the on-disk layout
//! - [`check`]: bucket/record reachability checker
//! - [`shard`]: partition tables and key routing
//! - [`split`]: split one database into two shard destinations
//! - [`cli`]: argument types and logging setup shared by the binaries

pub mod error;
pub mod format;
pub mod check;
pub mod shard;
pub mod split;
pub mod progress;
pub mod cli;

pub use error::{HdbError, Result};
pub use format::{DatabaseMetadata, HashDbFile, HashDbWriter, RecordSink, ResyncPolicy, Tuning};
pub use check::{check, check_with_progress, CheckOptions, CheckReport};
pub use shard::{Endpoint, PartitionLayout, PartitionTable, ShardDescriptor, ShardRouter};
pub use split::{split_files, split_into, SplitOptions, SplitSummary, SplitTarget};
