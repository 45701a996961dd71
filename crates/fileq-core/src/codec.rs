//! Binary Codec - 32-bit Little-Endian Integers and the Signed CRC
//!
//! Every integer the engine puts on disk is a 32-bit **signed** little-endian
//! value. That includes the CRC: we compute a standard CRC32 and reinterpret
//! the bit pattern as an i32 (two's complement), so a checksum with bit 31
//! set is stored and compared as a negative number. The reinterpretation is
//! lossless and makes the stored value identical on every architecture that
//! writes signed 32-bit integers, which is what keeps the format
//! cross-implementation stable.
//!
//! ## Functions
//!
//! - [`pack_i32`] / [`unpack_i32`]: i32 ↔ 4 LE bytes
//! - [`read_i32_at`]: positioned read of one i32 from an open handle
//! - [`crc32_signed`]: CRC32 of a payload as an i32

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Encode an i32 as 4 little-endian bytes.
#[inline]
pub fn pack_i32(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Decode 4 little-endian bytes into an i32.
#[inline]
pub fn unpack_i32(bytes: [u8; 4]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// Read one i32 at an absolute byte position.
///
/// Leaves the handle positioned just past the integer.
pub fn read_i32_at(file: &mut File, pos: u64) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// CRC32 of `payload`, reinterpreted as a signed 32-bit integer.
#[inline]
pub fn crc32_signed(payload: &[u8]) -> i32 {
    crc32fast::hash(payload) as i32
}
