//! Record decoding for the record section.
//!
//! Two record kinds live in the record section:
//!
//! ```text
//! Data record (magic 0xC8)
//!   magic: u8
//!   hash: u8
//!   left: u32|u64 LE   (stored >> alignment_power)
//!   right: u32|u64 LE  (stored >> alignment_power)
//!   pad_size: u16 LE
//!   key_size: varint
//!   value_size: varint
//!   key: [u8; key_size]
//!   value: [u8; value_size]
//!   padding: [u8; pad_size]
//!
//! Free record (magic 0xB0)
//!   magic: u8
//!   length: u32 LE     (total span = 1 + 4 + length)
//! ```
//!
//! Any other byte at a claimed record boundary is a desynchronization. The
//! decoder only reports it; how far to skip is the caller's [`ResyncPolicy`].

use serde::{Deserialize, Serialize};

use crate::error::{HdbError, Result};
use crate::format::types::*;
use crate::format::varint::{self, VarIntError};

/// Whether key and value bytes are materialized while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    /// Structural boundaries only; key/value are bounds-checked and skipped.
    Skip,
    /// Borrow key and value bytes from the source.
    Load,
}

/// How to find the next candidate record after a desynchronization.
///
/// The two policies can pick different next records on files with garbage
/// between records; neither is preferred silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Advance one byte and retry. Finds records at any position.
    ByteByByte,
    /// Advance to the next multiple of `2^alignment_power` and retry.
    /// Assumes every record starts on an alignment boundary.
    Aligned,
}

impl ResyncPolicy {
    /// Position of the next candidate after a failed decode at `pos`.
    pub fn next_candidate(&self, pos: u64, geometry: &Geometry) -> u64 {
        match self {
            ResyncPolicy::ByteByByte => pos + 1,
            ResyncPolicy::Aligned => geometry.next_boundary_after(pos),
        }
    }
}

/// Fixed and varint fields of a data record, everything before the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub hash: u8,
    /// Byte offset of the left child (already shifted), 0 if none.
    pub left: u64,
    /// Byte offset of the right child (already shifted), 0 if none.
    pub right: u64,
    pub pad_size: u16,
    pub key_size: u64,
    pub value_size: u64,
    /// Bytes from the magic byte up to the first key byte.
    pub header_len: u64,
}

impl DataHeader {
    /// Bytes consumed on disk, magic through trailing padding.
    pub fn total_length(&self) -> Option<u64> {
        self.header_len
            .checked_add(self.key_size)?
            .checked_add(self.value_size)?
            .checked_add(self.pad_size as u64)
    }
}

/// A live key/value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord<'a> {
    pub offset: u64,
    pub hash: u8,
    pub left: u64,
    pub right: u64,
    pub pad_size: u16,
    pub key_size: u64,
    pub value_size: u64,
    /// `None` when decoded with [`Content::Skip`].
    pub key: Option<&'a [u8]>,
    pub value: Option<&'a [u8]>,
    pub total_length: u64,
}

/// Reclaimed space; carries no key or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
    pub offset: u64,
    pub total_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<'a> {
    Data(DataRecord<'a>),
    Free(FreeRecord),
}

impl Record<'_> {
    pub fn offset(&self) -> u64 {
        match self {
            Record::Data(r) => r.offset,
            Record::Free(r) => r.offset,
        }
    }

    pub fn total_length(&self) -> u64 {
        match self {
            Record::Data(r) => r.total_length,
            Record::Free(r) => r.total_length,
        }
    }

    /// Offset of the byte following this record.
    pub fn end(&self) -> u64 {
        self.offset() + self.total_length()
    }
}

/// Outcome of decoding at one candidate position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<'a> {
    Record(Record<'a>),
    /// No record starts here.
    Desync,
}

fn truncated(offset: u64, field: &'static str) -> HdbError {
    HdbError::Truncated { offset, field }
}

/// Decode a data record header from `bytes`, which start at the magic byte.
///
/// `base` is the file offset of `bytes[0]` and is only used for error
/// positions. Returns `Ok(None)` if the magic is not a data record or a child
/// pointer cannot be shifted into a u64.
pub fn decode_data_header(bytes: &[u8], base: u64, geometry: &Geometry) -> Result<Option<DataHeader>> {
    match bytes.first() {
        None => return Err(truncated(base, "magic")),
        Some(&MAGIC_DATA_RECORD) => {}
        Some(_) => return Ok(None),
    }

    let width = geometry.pointer_width.bytes();
    let hash = *bytes.get(1).ok_or_else(|| truncated(base + 1, "hash"))?;
    let left_pos = 2;
    let right_pos = left_pos + width;
    let pad_pos = right_pos + width;

    let left_raw = read_le(bytes, left_pos, width).ok_or_else(|| truncated(base + left_pos as u64, "left"))?;
    let right_raw =
        read_le(bytes, right_pos, width).ok_or_else(|| truncated(base + right_pos as u64, "right"))?;
    let pad_size = read_le(bytes, pad_pos, 2).ok_or_else(|| truncated(base + pad_pos as u64, "pad_size"))? as u16;

    let (left, right) = match (geometry.shift(left_raw), geometry.shift(right_raw)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Ok(None),
    };

    let mut pos = geometry.data_prefix_size();
    let key_size = read_varint(bytes, &mut pos, base, "key_size")?;
    let value_size = read_varint(bytes, &mut pos, base, "value_size")?;

    Ok(Some(DataHeader {
        hash,
        left,
        right,
        pad_size,
        key_size,
        value_size,
        header_len: pos as u64,
    }))
}

fn read_varint(bytes: &[u8], pos: &mut usize, base: u64, field: &'static str) -> Result<u64> {
    let at = base + *pos as u64;
    let rest = bytes.get(*pos..).unwrap_or(&[]);
    match varint::decode(rest) {
        Ok((value, used)) => {
            *pos += used;
            Ok(value)
        }
        Err(VarIntError::Truncated) => Err(truncated(at, field)),
        Err(VarIntError::Overflow) => Err(HdbError::VarIntOverflow(at)),
    }
}

/// Decode whatever starts at `offset` in `data` (the whole file).
///
/// Never reads at or past `data.len()`; a record that claims bytes beyond
/// the end fails with [`HdbError::Truncated`].
pub fn decode_at<'a>(data: &'a [u8], offset: u64, geometry: &Geometry, content: Content) -> Result<Decoded<'a>> {
    let len = data.len() as u64;
    if offset >= len {
        return Err(truncated(offset, "magic"));
    }
    let start = offset as usize;
    let bytes = &data[start..];

    match bytes[0] {
        MAGIC_DATA_RECORD => {
            let header = match decode_data_header(bytes, offset, geometry)? {
                Some(h) => h,
                None => return Ok(Decoded::Desync),
            };
            let total_length = header
                .total_length()
                .filter(|t| offset.checked_add(*t).is_some_and(|end| end <= len))
                .ok_or_else(|| truncated(offset + header.header_len, "key/value"))?;

            let (key, value) = match content {
                Content::Skip => (None, None),
                Content::Load => {
                    let key_start = header.header_len as usize;
                    let key_end = key_start + header.key_size as usize;
                    let value_end = key_end + header.value_size as usize;
                    (Some(&bytes[key_start..key_end]), Some(&bytes[key_end..value_end]))
                }
            };

            Ok(Decoded::Record(Record::Data(DataRecord {
                offset,
                hash: header.hash,
                left: header.left,
                right: header.right,
                pad_size: header.pad_size,
                key_size: header.key_size,
                value_size: header.value_size,
                key,
                value,
                total_length,
            })))
        }
        MAGIC_FREE_RECORD => {
            let body = read_le(bytes, 1, 4).ok_or_else(|| truncated(offset + 1, "free length"))?;
            let total_length = FREE_RECORD_HEADER_SIZE + body;
            if offset + total_length > len {
                return Err(truncated(offset + FREE_RECORD_HEADER_SIZE, "free block"));
            }
            Ok(Decoded::Record(Record::Free(FreeRecord { offset, total_length })))
        }
        _ => Ok(Decoded::Desync),
    }
}

/// Encode a data record exactly as it lies on disk, padding included.
///
/// `left` and `right` are byte offsets; they must be aligned and fit the
/// pointer width.
pub fn encode_data_record(
    geometry: &Geometry,
    hash: u8,
    left: u64,
    right: u64,
    key: &[u8],
    value: &[u8],
    pad_size: u16,
) -> Result<Vec<u8>> {
    let width = geometry.pointer_width;
    let stored = |offset: u64| {
        geometry.unshift(offset).ok_or(HdbError::OffsetOverflow {
            offset,
            width: width.bytes(),
            alignment_power: geometry.alignment_power,
        })
    };

    let mut out = Vec::with_capacity(geometry.data_prefix_size() + 20 + key.len() + value.len() + pad_size as usize);
    out.push(MAGIC_DATA_RECORD);
    out.push(hash);
    out.extend_from_slice(&width.encode(stored(left)?));
    out.extend_from_slice(&width.encode(stored(right)?));
    out.extend_from_slice(&pad_size.to_le_bytes());
    varint::encode_into(key.len() as u64, &mut out);
    varint::encode_into(value.len() as u64, &mut out);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out.resize(out.len() + pad_size as usize, 0);
    Ok(out)
}

/// Padding that brings a record of `unpadded` bytes up to the alignment.
pub fn padding_for(geometry: &Geometry, unpadded: u64) -> u16 {
    (geometry.align_up(unpadded) - unpadded) as u16
}

/// Encode a free record spanning `total_length` bytes (at least 5).
pub fn encode_free_record(total_length: u64) -> Vec<u8> {
    let body = total_length.saturating_sub(FREE_RECORD_HEADER_SIZE);
    let mut out = Vec::with_capacity(total_length as usize);
    out.push(MAGIC_FREE_RECORD);
    out.extend_from_slice(&(body as u32).to_le_bytes());
    out.resize(FREE_RECORD_HEADER_SIZE as usize + body as usize, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrow(apow: u8) -> Geometry {
        Geometry::new(PointerWidth::Narrow, apow)
    }

    #[test]
    fn test_decode_data_record_with_content() {
        let g = narrow(0);
        let bytes = encode_data_record(&g, 0x42, 64, 128, b"mlid:1", b"payload", 3).unwrap();
        let Decoded::Record(Record::Data(rec)) = decode_at(&bytes, 0, &g, Content::Load).unwrap() else {
            panic!("expected data record");
        };
        assert_eq!(rec.hash, 0x42);
        assert_eq!(rec.left, 64);
        assert_eq!(rec.right, 128);
        assert_eq!(rec.key, Some(&b"mlid:1"[..]));
        assert_eq!(rec.value, Some(&b"payload"[..]));
        assert_eq!(rec.pad_size, 3);
        assert_eq!(rec.total_length, bytes.len() as u64);
    }

    #[test]
    fn test_child_offsets_are_shifted() {
        let g = narrow(4);
        let bytes = encode_data_record(&g, 1, 32, 0, b"k", b"v", 0).unwrap();
        // stored left is 32 >> 4
        assert_eq!(read_le(&bytes, 2, 4), Some(2));
        let Decoded::Record(Record::Data(rec)) = decode_at(&bytes, 0, &g, Content::Skip).unwrap() else {
            panic!("expected data record");
        };
        assert_eq!(rec.left, 32);
        assert_eq!(rec.right, 0);
        assert_eq!(rec.key, None);
    }

    #[test]
    fn test_wide_pointers() {
        let g = Geometry::new(PointerWidth::Wide, 3);
        let far = 1u64 << 40;
        let bytes = encode_data_record(&g, 9, far, far + 8, b"key", b"", 0).unwrap();
        assert_eq!(bytes.len(), 20 + 1 + 1 + 3);
        let Decoded::Record(Record::Data(rec)) = decode_at(&bytes, 0, &g, Content::Load).unwrap() else {
            panic!("expected data record");
        };
        assert_eq!(rec.left, far);
        assert_eq!(rec.right, far + 8);
        assert_eq!(rec.value, Some(&b""[..]));
    }

    #[test]
    fn test_decode_free_record() {
        let g = narrow(0);
        let bytes = encode_free_record(16);
        assert_eq!(bytes.len(), 16);
        let decoded = decode_at(&bytes, 0, &g, Content::Skip).unwrap();
        assert_eq!(
            decoded,
            Decoded::Record(Record::Free(FreeRecord { offset: 0, total_length: 16 }))
        );
    }

    #[test]
    fn test_unknown_magic_is_desync() {
        let g = narrow(0);
        assert_eq!(decode_at(&[0x00, 0xC8], 0, &g, Content::Skip).unwrap(), Decoded::Desync);
    }

    #[test]
    fn test_truncated_fields() {
        let g = narrow(0);
        let bytes = encode_data_record(&g, 1, 0, 0, b"abcdef", b"ghij", 0).unwrap();

        // cut inside the fixed prefix
        let err = decode_at(&bytes[..8], 0, &g, Content::Skip).unwrap_err();
        assert!(matches!(err, HdbError::Truncated { field: "right", .. }), "{err:?}");

        // cut inside the value; skipping content still bounds-checks it
        let err = decode_at(&bytes[..bytes.len() - 1], 0, &g, Content::Skip).unwrap_err();
        assert!(matches!(err, HdbError::Truncated { field: "key/value", .. }), "{err:?}");

        // free block claiming more than the file holds
        let mut free = encode_free_record(32);
        free.truncate(20);
        let err = decode_at(&free, 0, &g, Content::Skip).unwrap_err();
        assert!(matches!(err, HdbError::Truncated { field: "free block", .. }), "{err:?}");

        assert!(decode_at(&bytes, bytes.len() as u64, &g, Content::Skip).is_err());
    }

    #[test]
    fn test_overflowing_child_pointer_is_desync() {
        let g = Geometry::new(PointerWidth::Wide, 4);
        let mut bytes = vec![MAGIC_DATA_RECORD, 0];
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(decode_at(&bytes, 0, &g, Content::Skip).unwrap(), Decoded::Desync);
    }

    #[test]
    fn test_padding_and_resync_policies() {
        let g = narrow(3);
        assert_eq!(padding_for(&g, 13), 3);
        assert_eq!(padding_for(&g, 16), 0);
        assert_eq!(ResyncPolicy::ByteByByte.next_candidate(9, &g), 10);
        assert_eq!(ResyncPolicy::Aligned.next_candidate(9, &g), 16);
        assert_eq!(ResyncPolicy::Aligned.next_candidate(8, &g), 16);
    }
}
