//! Diff records and their fixed-size wire encoding.
//!
//! Wire layout, 24 bytes, all fields little-endian:
//!
//! ```text
//! [4 bytes: kind (u32) 1 = in use, 2 = free]
//! [4 bytes: reserved, zero]
//! [8 bytes: first object (u64)]
//! [8 bytes: last object (u64), inclusive]
//! ```
//!
//! Kind 0 is reserved for "none" and never appears in a well-formed stream.
//! There is no header, count or trailer; end of stream terminates the diff.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::ObjectId;

/// Size of one encoded [`DiffRecord`].
pub const RECORD_SIZE: usize = 24;

/// Reserved wire value meaning "no record".
pub const KIND_NONE: u32 = 0;

/// Allocation state shared by every object in a [`DiffRecord`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum RecordKind {
    /// The objects hold an allocated dnode in the "to" snapshot.
    InUse,
    /// The objects are unallocated in the "to" snapshot.
    Free,
}

impl RecordKind {
    /// The kind's wire value.
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::InUse => 1,
            Self::Free => 2,
        }
    }

    /// Decode a wire value. [`KIND_NONE`] and anything unknown are rejected.
    pub fn from_wire(raw: u32) -> Result<Self, TypeError> {
        match raw {
            1 => Ok(Self::InUse),
            2 => Ok(Self::Free),
            other => Err(TypeError::UnknownRecordKind(other)),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InUse => f.write_str("inuse"),
            Self::Free => f.write_str("free"),
        }
    }
}

/// An inclusive range of object numbers sharing one allocation state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DiffRecord {
    pub kind: RecordKind,
    pub first: ObjectId,
    pub last: ObjectId,
}

impl DiffRecord {
    /// Create a record. Callers must keep `first <= last`.
    pub fn new(kind: RecordKind, first: ObjectId, last: ObjectId) -> Self {
        debug_assert!(first <= last, "inverted diff record {first}..={last}");
        Self { kind, first, last }
    }

    pub fn in_use(first: ObjectId, last: ObjectId) -> Self {
        Self::new(RecordKind::InUse, first, last)
    }

    pub fn free(first: ObjectId, last: ObjectId) -> Self {
        Self::new(RecordKind::Free, first, last)
    }

    /// Number of objects covered by the record. Saturates at `u64::MAX`
    /// for the record spanning every object number.
    pub fn len(&self) -> u64 {
        (self.last - self.first).saturating_add(1)
    }

    /// A record always covers at least one object.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The covered object numbers.
    pub fn objects(&self) -> RangeInclusive<ObjectId> {
        self.first..=self.last
    }

    /// Returns `true` if `object` lies inside the record.
    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects().contains(&object)
    }

    /// Encode into the fixed wire layout.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.kind.to_wire().to_le_bytes());
        buf[8..16].copy_from_slice(&self.first.to_le_bytes());
        buf[16..24].copy_from_slice(&self.last.to_le_bytes());
        buf
    }

    /// Decode one record from exactly [`RECORD_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, TypeError> {
        if buf.len() != RECORD_SIZE {
            return Err(TypeError::InvalidLength {
                expected: RECORD_SIZE,
                actual: buf.len(),
            });
        }
        let kind = RecordKind::from_wire(read_u32(&buf[0..4]))?;
        if read_u32(&buf[4..8]) != 0 {
            return Err(TypeError::ReservedBits("diff record"));
        }
        let first = read_u64(&buf[8..16]);
        let last = read_u64(&buf[16..24]);
        if first > last {
            return Err(TypeError::InvertedRange { first, last });
        }
        Ok(Self { kind, first, last })
    }
}

impl fmt::Display for DiffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..={}", self.kind, self.first, self.last)
    }
}

pub(crate) fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub(crate) fn read_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_is_little_endian() {
        let bytes = DiffRecord::free(0x0102, 0x0304).encode();
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..10], &[0x02, 0x01]);
        assert_eq!(&bytes[16..18], &[0x04, 0x03]);
    }

    #[test]
    fn decode_recovers_record() {
        let rec = DiffRecord::in_use(10, 99);
        assert_eq!(DiffRecord::decode(&rec.encode()).unwrap(), rec);
    }

    #[test]
    fn decode_rejects_none_kind() {
        let mut bytes = DiffRecord::in_use(1, 1).encode();
        bytes[0..4].copy_from_slice(&KIND_NONE.to_le_bytes());
        assert_eq!(
            DiffRecord::decode(&bytes),
            Err(TypeError::UnknownRecordKind(0))
        );
    }

    #[test]
    fn decode_rejects_inverted_range() {
        let mut bytes = DiffRecord::in_use(5, 5).encode();
        bytes[8..16].copy_from_slice(&9u64.to_le_bytes());
        assert_eq!(
            DiffRecord::decode(&bytes),
            Err(TypeError::InvertedRange { first: 9, last: 5 })
        );
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = DiffRecord::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: RECORD_SIZE,
                actual: 10
            }
        );
    }

    #[test]
    fn decode_rejects_reserved_bits() {
        let mut bytes = DiffRecord::free(0, 3).encode();
        bytes[5] = 1;
        assert_eq!(
            DiffRecord::decode(&bytes),
            Err(TypeError::ReservedBits("diff record"))
        );
    }

    #[test]
    fn len_and_contains() {
        let rec = DiffRecord::free(50, 59);
        assert_eq!(rec.len(), 10);
        assert!(rec.contains(50));
        assert!(rec.contains(59));
        assert!(!rec.contains(60));
        assert!(!rec.is_empty());
        assert_eq!(DiffRecord::free(0, u64::MAX).len(), u64::MAX);
    }

    #[test]
    fn display_format() {
        assert_eq!(format!("{}", DiffRecord::in_use(0, 99)), "inuse 0..=99");
    }
}
