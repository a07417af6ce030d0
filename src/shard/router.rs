//! Key → shard routing.
//!
//! The numeric identifier of a key is its first run of ASCII digits, so
//! `mlid:4812` and `4812` route the same way.

use crate::error::{HdbError, Result};
use crate::shard::table::{PartitionTable, ShardDescriptor};

/// Extract the first run of decimal digits in `key` as a u64.
pub fn parse_identifier(key: &[u8]) -> Result<u64> {
    let start = key
        .iter()
        .position(u8::is_ascii_digit)
        .ok_or_else(|| HdbError::NoIdentifierFound(String::from_utf8_lossy(key).into_owned()))?;
    let digits = &key[start..];
    let run = digits.iter().take_while(|b| b.is_ascii_digit()).count();

    digits[..run]
        .iter()
        .try_fold(0u64, |acc, &b| acc.checked_mul(10)?.checked_add(u64::from(b - b'0')))
        .ok_or_else(|| HdbError::InvalidIdentifier(String::from_utf8_lossy(&digits[..run]).into_owned()))
}

/// Routes keys through a partition table.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    table: PartitionTable,
}

impl ShardRouter {
    pub fn new(table: PartitionTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    /// Descriptor owning `key`.
    pub fn route(&self, key: &[u8]) -> Result<&ShardDescriptor> {
        self.route_id(parse_identifier(key)?)
    }

    /// First descriptor, in table order, whose bitmask matches `id`.
    pub fn route_id(&self, id: u64) -> Result<&ShardDescriptor> {
        self.table
            .descriptors()
            .iter()
            .find(|d| id & d.significant_bits_mask == d.bitmask)
            .ok_or(HdbError::NoBackendFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::table::{Endpoint, PartitionLayout};
    use proptest::prelude::*;

    fn router(shards: u64) -> ShardRouter {
        ShardRouter::new(PartitionTable::generate(&PartitionLayout::with_shards(shards)).unwrap())
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_identifier(b"mlid:4812").unwrap(), 4812);
        assert_eq!(parse_identifier(b"4812").unwrap(), 4812);
        assert_eq!(parse_identifier(b"a1b2").unwrap(), 1);
        assert_eq!(parse_identifier(b"x007").unwrap(), 7);
        assert_eq!(parse_identifier(b"18446744073709551615").unwrap(), u64::MAX);
    }

    #[test]
    fn test_parse_identifier_failures() {
        assert!(matches!(parse_identifier(b"nodigits"), Err(HdbError::NoIdentifierFound(_))));
        assert!(matches!(parse_identifier(b""), Err(HdbError::NoIdentifierFound(_))));
        assert!(matches!(
            parse_identifier(b"99999999999999999999"),
            Err(HdbError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            parse_identifier(b"id:18446744073709551616:x"),
            Err(HdbError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_route_key() {
        let r = router(16);
        // 4812 = 0x12CC
        assert_eq!(r.route(b"mlid:4812").unwrap().bitmask, 0x0c);
        assert_eq!(router(8).route(b"mlid:4812").unwrap().bitmask, 0x04);
        assert!(r.route(b"nodigits").unwrap_err().is_routing_failure());
    }

    #[test]
    fn test_no_backend_for_incomplete_table() {
        let lone = ShardDescriptor {
            bitmask: 0,
            significant_bits_mask: 0x07,
            primary: Endpoint::new("a", 1),
            backup: Endpoint::new("b", 2),
        };
        let r = ShardRouter::new(PartitionTable::unchecked(vec![lone]));
        assert_eq!(r.route_id(8).unwrap().bitmask, 0);
        assert!(matches!(r.route_id(3), Err(HdbError::NoBackendFound(3))));
    }

    proptest! {
        #[test]
        fn prop_routing_is_total_for_eight_shards(id in any::<u64>()) {
            let r = router(8);
            let matches = r.table().descriptors().iter()
                .filter(|d| id & d.significant_bits_mask == d.bitmask)
                .count();
            prop_assert_eq!(matches, 1);
            prop_assert_eq!(r.route_id(id).unwrap().bitmask, id & 0x07);
        }

        #[test]
        fn prop_routing_is_total_for_sixteen_shards(id in any::<u64>()) {
            let r = router(16);
            let matches = r.table().descriptors().iter()
                .filter(|d| id & d.significant_bits_mask == d.bitmask)
                .count();
            prop_assert_eq!(matches, 1);
            prop_assert_eq!(r.route_id(id).unwrap().bitmask, id & 0x0f);
        }
    }
}
