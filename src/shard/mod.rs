//! Partition tables and key routing.

pub mod table;
pub mod router;

pub use table::{Endpoint, PartitionLayout, PartitionTable, ShardDescriptor};
pub use router::{parse_identifier, ShardRouter};
