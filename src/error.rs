//! Error types for hash database decoding, checking and splitting

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HdbError>;

#[derive(Error, Debug)]
pub enum HdbError {
    #[error("Unreadable header: {0}")]
    UnreadableHeader(String),

    #[error("Truncated {field} at offset {offset}")]
    Truncated { offset: u64, field: &'static str },

    #[error("Variable-length integer at offset {0} exceeds 64 bits")]
    VarIntOverflow(u64),

    #[error("Offset {offset} does not fit a {width}-byte pointer at alignment power {alignment_power}")]
    OffsetOverflow {
        offset: u64,
        width: usize,
        alignment_power: u8,
    },

    #[error("Expected a data record at offset {0}")]
    NotADataRecord(u64),

    #[error("Unable to find an identifier in key [{0}]")]
    NoIdentifierFound(String),

    #[error("Invalid identifier [{0}]: it does not convert to a 64 bit number")]
    InvalidIdentifier(String),

    #[error("No backend found for identifier {0}")]
    NoBackendFound(u64),

    #[error("Invalid partition table: {0}")]
    InvalidPartitionTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HdbError {
    /// Short code for summaries and logs
    pub fn code(&self) -> &'static str {
        match self {
            HdbError::UnreadableHeader(_) => "UNREADABLE_HEADER",
            HdbError::Truncated { .. } => "TRUNCATED",
            HdbError::VarIntOverflow(_) => "VARINT_OVERFLOW",
            HdbError::OffsetOverflow { .. } => "OFFSET_OVERFLOW",
            HdbError::NotADataRecord(_) => "NOT_A_DATA_RECORD",
            HdbError::NoIdentifierFound(_) => "NO_IDENTIFIER_FOUND",
            HdbError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            HdbError::NoBackendFound(_) => "NO_BACKEND_FOUND",
            HdbError::InvalidPartitionTable(_) => "INVALID_PARTITION_TABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Routing failures skip one record; they never abort a run.
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            HdbError::NoIdentifierFound(_)
                | HdbError::InvalidIdentifier(_)
                | HdbError::NoBackendFound(_)
        )
    }
}
