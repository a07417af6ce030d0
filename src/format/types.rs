//! On-disk layout constants and geometry of the hash database format.
//!
//! The file starts with a fixed 256-byte header, followed by the bucket
//! directory, the free-block pool, and then the record section:
//!
//! ```text
//! Offset  Size  Field
//! 0       32    magic: "ToKyO CaBiNeT\n" + version text
//! 32      1     db_type: u8 (0 = hash)
//! 33      1     flags: u8 (0x01 open, 0x02 fatal)
//! 34      1     alignment_power: u8
//! 35      1     free_block_power: u8
//! 36      1     options: u8 (large, deflate, bzip2, tcbs, extra codec)
//! 37      3     reserved
//! 40      8     bucket_count: u64
//! 48      8     record_count: u64
//! 56      8     file_size: u64
//! 64      8     first_record: u64
//! 72      56    reserved
//! 128     128   opaque
//! ```
//!
//! All integers are little-endian. Offsets stored in the bucket directory and
//! in record child slots are shifted right by `alignment_power`.

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────

/// Fixed header size; the bucket directory starts right after it.
pub const HEADER_SIZE: usize = 256;

/// Prefix every valid header magic starts with.
pub const MAGIC_PREFIX: &[u8] = b"ToKyO CaBiNeT";

/// Full text written into the magic field by [`crate::format::HashDbWriter`].
pub const MAGIC_TEXT: &[u8] = b"ToKyO CaBiNeT\n1.0:911\n";

pub const MAGIC_FIELD_SIZE: usize = 32;
pub const DB_TYPE_OFFSET: usize = 32;
pub const FLAGS_OFFSET: usize = 33;
pub const ALIGNMENT_POWER_OFFSET: usize = 34;
pub const FREE_BLOCK_POWER_OFFSET: usize = 35;
pub const OPTIONS_OFFSET: usize = 36;
pub const BUCKET_COUNT_OFFSET: usize = 40;
pub const RECORD_COUNT_OFFSET: usize = 48;
pub const FILE_SIZE_OFFSET: usize = 56;
pub const FIRST_RECORD_OFFSET: usize = 64;
pub const OPAQUE_OFFSET: usize = 128;

/// Database type byte of a hash database.
pub const DB_TYPE_HASH: u8 = 0;

/// Magic byte opening a live data record.
pub const MAGIC_DATA_RECORD: u8 = 0xC8;

/// Magic byte opening a free (reclaimed) block.
pub const MAGIC_FREE_RECORD: u8 = 0xB0;

/// Largest alignment power the engine accepts.
pub const MAX_ALIGNMENT_POWER: u8 = 16;

/// Largest free-block pool power the engine accepts.
pub const MAX_FREE_BLOCK_POWER: u8 = 20;

/// Bytes reserved per free-block pool slot by the writer (two empty varints).
pub const FREE_POOL_SLOT_SIZE: u64 = 2;

/// Free record header: magic + u32 length.
pub const FREE_RECORD_HEADER_SIZE: u64 = 5;

// ── Header bit fields ──────────────────────────────────────────────

/// Option bits from header byte 36.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DbOptions(pub u8);

impl DbOptions {
    pub const LARGE: u8 = 0x01;
    pub const DEFLATE: u8 = 0x02;
    pub const BZIP2: u8 = 0x04;
    pub const TCBS: u8 = 0x08;
    pub const EXTRA_CODEC: u8 = 0x10;

    const NAMES: [(u8, &'static str); 5] = [
        (Self::LARGE, "large"),
        (Self::DEFLATE, "deflate"),
        (Self::BZIP2, "bzip2"),
        (Self::TCBS, "tcbs"),
        (Self::EXTRA_CODEC, "extra codec"),
    ];

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// 64-bit record addresses.
    pub fn large(&self) -> bool {
        self.0 & Self::LARGE != 0
    }

    pub fn deflate(&self) -> bool {
        self.0 & Self::DEFLATE != 0
    }

    pub fn without(self, bits: u8) -> Self {
        Self(self.0 & !bits)
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Additional flags from header byte 33.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DbFlags(pub u8);

impl DbFlags {
    pub const OPEN: u8 = 0x01;
    pub const FATAL: u8 = 0x02;

    /// Set while a writer has the file open; a leftover means an unclean close.
    pub fn open(&self) -> bool {
        self.0 & Self::OPEN != 0
    }

    pub fn fatal(&self) -> bool {
        self.0 & Self::FATAL != 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.open() {
            names.push("open");
        }
        if self.fatal() {
            names.push("fatal");
        }
        names
    }
}

// ── Pointer width ──────────────────────────────────────────────────

/// Width of a stored file address, selected by the "large" option bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerWidth {
    Narrow,
    Wide,
}

impl PointerWidth {
    pub fn from_options(options: DbOptions) -> Self {
        if options.large() {
            Self::Wide
        } else {
            Self::Narrow
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::Narrow => 4,
            Self::Wide => 8,
        }
    }

    pub fn max_value(&self) -> u64 {
        match self {
            Self::Narrow => u32::MAX as u64,
            Self::Wide => u64::MAX,
        }
    }

    pub fn encode(&self, value: u64) -> Vec<u8> {
        value.to_le_bytes()[..self.bytes()].to_vec()
    }
}

// ── Geometry ───────────────────────────────────────────────────────

/// Everything needed to turn stored addresses into byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub pointer_width: PointerWidth,
    pub alignment_power: u8,
}

impl Geometry {
    pub fn new(pointer_width: PointerWidth, alignment_power: u8) -> Self {
        Self {
            pointer_width,
            alignment_power,
        }
    }

    pub fn alignment(&self) -> u64 {
        1u64 << self.alignment_power
    }

    /// Byte offset for a stored address, `None` when the shift overflows u64.
    pub fn shift(&self, stored: u64) -> Option<u64> {
        if stored == 0 {
            return Some(0);
        }
        if stored.leading_zeros() < self.alignment_power as u32 {
            return None;
        }
        Some(stored << self.alignment_power)
    }

    /// Stored address for a byte offset. The offset must be aligned and the
    /// shifted value must fit the pointer width.
    pub fn unshift(&self, offset: u64) -> Option<u64> {
        if offset & (self.alignment() - 1) != 0 {
            return None;
        }
        let stored = offset >> self.alignment_power;
        (stored <= self.pointer_width.max_value()).then_some(stored)
    }

    /// Smallest multiple of the alignment that is `>= pos`.
    pub fn align_up(&self, pos: u64) -> u64 {
        let mask = self.alignment() - 1;
        (pos + mask) & !mask
    }

    /// Smallest multiple of the alignment strictly greater than `pos`.
    pub fn next_boundary_after(&self, pos: u64) -> u64 {
        self.align_up(pos + 1)
    }

    /// Size of a data record's fixed prefix: magic, hash, left, right, pad_size.
    pub fn data_prefix_size(&self) -> usize {
        1 + 1 + 2 * self.pointer_width.bytes() + 2
    }
}

// ── Byte helpers ───────────────────────────────────────────────────

/// Read a little-endian unsigned integer of `width` bytes (<= 8) at `offset`.
/// Returns `None` if the slice is too short.
#[inline]
pub fn read_le(data: &[u8], offset: usize, width: usize) -> Option<u64> {
    let end = offset.checked_add(width)?;
    let bytes = data.get(offset..end)?;
    Some(
        bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64),
    )
}
