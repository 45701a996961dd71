//! Record Framing
//!
//! The segment store keeps messages as fixed-header frames, back to back in
//! a `.dat` file:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬───────────┐
//! │ seq      │ crc      │ len      │ time     │ payload   │
//! │ i32 LE   │ i32 LE   │ i32 LE   │ i32 LE   │ len bytes │
//! └──────────┴──────────┴──────────┴──────────┴───────────┘
//! ```
//!
//! Total frame size is `16 + len`. `seq` is the record's sequence number
//! inside its generation, `crc` is the signed CRC32 of the payload alone
//! (see [`crate::codec::crc32_signed`]), `time` is the append wall-clock in
//! unix seconds. Frames are located through the sibling `.index` file, never
//! by scanning, so a reader always knows the exact byte range a frame must
//! occupy - which is why [`RecordHeader::verify`] can insist on an exact
//! sequence, length and checksum match.

use bytes::Bytes;

use crate::codec::{crc32_signed, pack_i32, unpack_i32};
use crate::error::RecordError;

/// Fixed byte length of a record header (`seq | crc | len | time`).
pub const RECORD_HEADER_LEN: usize = 16;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub seq: i32,
    pub crc: i32,
    pub len: i32,
    pub time: i32,
}

impl RecordHeader {
    /// Parse a header from the first 16 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(RecordError::Truncated {
                needed: RECORD_HEADER_LEN,
                available: buf.len(),
            });
        }
        Ok(Self {
            seq: unpack_i32(buf[0..4].try_into().expect("4 bytes")),
            crc: unpack_i32(buf[4..8].try_into().expect("4 bytes")),
            len: unpack_i32(buf[8..12].try_into().expect("4 bytes")),
            time: unpack_i32(buf[12..16].try_into().expect("4 bytes")),
        })
    }

    /// Validate this header against the sequence the reader expected to find
    /// and the payload bytes that followed it on disk.
    pub fn verify(&self, expected_seq: i32, payload: &[u8]) -> Result<(), RecordError> {
        if self.seq != expected_seq {
            return Err(RecordError::SequenceMismatch {
                expected: expected_seq,
                found: self.seq,
            });
        }
        if self.len < 0 || self.len as usize != payload.len() {
            return Err(RecordError::LengthMismatch {
                header: self.len,
                actual: payload.len(),
            });
        }
        let computed = crc32_signed(payload);
        if self.crc != computed {
            return Err(RecordError::CrcMismatch {
                stored: self.crc,
                computed,
            });
        }
        Ok(())
    }
}

/// Append one framed record to `buf`. Returns the frame's total length.
pub fn encode_record(buf: &mut Vec<u8>, seq: i32, time: i32, payload: &[u8]) -> usize {
    buf.extend_from_slice(&pack_i32(seq));
    buf.extend_from_slice(&pack_i32(crc32_signed(payload)));
    buf.extend_from_slice(&pack_i32(payload.len() as i32));
    buf.extend_from_slice(&pack_i32(time));
    buf.extend_from_slice(payload);
    RECORD_HEADER_LEN + payload.len()
}

/// A message handed to a consumer.
///
/// `offset` is the sequence number inside the generation that stored the
/// message; `label` is that generation's counter. A consumer that wants one
/// global order computes `label * label_size + offset` (both fields are
/// widened to i64 so the product cannot wrap).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub offset: i64,
    pub hash: i32,
    pub len: i32,
    pub time: i32,
    pub payload: Bytes,
    pub label: i64,
}
