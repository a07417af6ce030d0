//! Partition tables: which bitmask lives on which backend pair.
//!
//! A table of N shards (N a power of two) uses the low `log2(N)` bits of a
//! key's numeric identifier. Every bitmask in `0..N` appears exactly once,
//! so routing is total.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HdbError, Result};

/// A host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One shard of a partition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub bitmask: u64,
    /// Same for every descriptor of a table.
    pub significant_bits_mask: u64,
    pub primary: Endpoint,
    /// Carried as configuration only; nothing fails over to it.
    pub backup: Endpoint,
}

/// Parameters for generating a table with consecutive port pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    pub shard_count: u64,
    pub primary_host: String,
    pub backup_host: String,
    pub start_port: u16,
    pub port_step: u16,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self {
            shard_count: 16,
            primary_host: "localhost".to_string(),
            backup_host: "localhost".to_string(),
            start_port: 11000,
            port_step: 2,
        }
    }
}

impl PartitionLayout {
    pub fn with_shards(shard_count: u64) -> Self {
        Self {
            shard_count,
            ..Self::default()
        }
    }
}

/// Validated, bitmask-ordered set of shard descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PartitionTable {
    descriptors: Vec<ShardDescriptor>,
}

fn invalid(msg: impl Into<String>) -> HdbError {
    HdbError::InvalidPartitionTable(msg.into())
}

impl PartitionTable {
    /// Validate `descriptors` and order them by bitmask.
    pub fn new(mut descriptors: Vec<ShardDescriptor>) -> Result<Self> {
        let count = descriptors.len() as u64;
        if count == 0 {
            return Err(invalid("no shards"));
        }
        if !count.is_power_of_two() {
            return Err(invalid(format!("shard count {count} is not a power of two")));
        }
        let mask = count - 1;
        descriptors.sort_by_key(|d| d.bitmask);
        for (expected, d) in descriptors.iter().enumerate() {
            if d.significant_bits_mask != mask {
                return Err(invalid(format!(
                    "shard {:#x} uses mask {:#x}, a {}-way table needs {:#x}",
                    d.bitmask, d.significant_bits_mask, count, mask
                )));
            }
            if d.bitmask != expected as u64 {
                return Err(invalid(format!(
                    "bitmasks must cover 0..{count} exactly once, found {:#x} at position {expected}",
                    d.bitmask
                )));
            }
        }
        Ok(Self { descriptors })
    }

    /// Skip validation. Lets tests build tables with holes.
    #[cfg(test)]
    pub(crate) fn unchecked(descriptors: Vec<ShardDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Build a table where shard `i` listens on `start_port + i * port_step`
    /// and its backup on the port right after it.
    pub fn generate(layout: &PartitionLayout) -> Result<Self> {
        let count = layout.shard_count;
        if count == 0 || !count.is_power_of_two() {
            return Err(invalid(format!("shard count {count} is not a power of two")));
        }
        let mask = count - 1;
        let descriptors = (0..count)
            .map(|i| {
                let port = u64::from(layout.start_port) + i * u64::from(layout.port_step);
                let (primary_port, backup_port) = match (u16::try_from(port), u16::try_from(port + 1)) {
                    (Ok(p), Ok(b)) => (p, b),
                    _ => return Err(invalid(format!("port {port} for shard {i:#x} exceeds 65535"))),
                };
                Ok(ShardDescriptor {
                    bitmask: i,
                    significant_bits_mask: mask,
                    primary: Endpoint::new(layout.primary_host.clone(), primary_port),
                    backup: Endpoint::new(layout.backup_host.clone(), backup_port),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(descriptors)
    }

    /// Load a JSON array of descriptors.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let descriptors: Vec<ShardDescriptor> = serde_json::from_str(text)?;
        Self::new(descriptors)
    }

    pub fn descriptors(&self) -> &[ShardDescriptor] {
        &self.descriptors
    }

    pub fn shard_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn significant_bits_mask(&self) -> u64 {
        self.descriptors.first().map_or(0, |d| d.significant_bits_mask)
    }

    pub fn get(&self, bitmask: u64) -> Option<&ShardDescriptor> {
        self.descriptors.iter().find(|d| d.bitmask == bitmask)
    }
}
