// SPDX-License-Identifier: AGPL-3.0-only

//! Bit-field packing over little-endian byte buffers.
//!
//! Bit `n` of a buffer is bit `n % 8` of byte `n / 8`. A field of `count`
//! bits at `offset` is assembled least-significant bit first, so a field
//! that starts on a byte boundary and spans whole bytes reads the same as a
//! little-endian integer of that width.
//!
//! Every access walks the buffer one byte at a time with an explicit
//! shift/mask, so a field that straddles bytes or ends on the last byte of
//! the buffer never touches memory past the slice.
//!
//! ```text
//! byte:      0          1          2
//! bits:  76543210   76543210   76543210
//! field(offset=6, count=7):
//!        xx......   ...xxxxx
//!        ^ bits 0-1 ^ bits 2-6 of the value
//! ```

use std::fmt;

/// Widest field a single get/set can address.
pub const MAX_FIELD_BITS: usize = 64;

/// Rejected bit-field request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    /// Field is wider than [`MAX_FIELD_BITS`].
    TooWide {
        /// Requested width in bits
        bits: usize,
    },
    /// Field ends past the end of the buffer.
    OutOfRange {
        /// First bit past the requested field
        end: usize,
        /// Buffer size in bits
        limit: usize,
    },
}

impl FieldError {
    /// Offending value and the limit it broke, for boundary reporting.
    #[must_use]
    pub const fn value_and_limit(&self) -> (usize, usize) {
        match *self {
            Self::TooWide { bits } => (bits, MAX_FIELD_BITS),
            Self::OutOfRange { end, limit } => (end, limit),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooWide { bits } => {
                write!(f, "field width {bits} exceeds {MAX_FIELD_BITS} bits")
            }
            Self::OutOfRange { end, limit } => {
                write!(f, "field end bit {end} exceeds buffer of {limit} bits")
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Mask of the low `bits` bits (`bits` ≤ 64).
#[must_use]
pub const fn low_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Check that `count` bits at `offset` lie inside `len_bytes` bytes.
///
/// # Errors
///
/// [`FieldError::OutOfRange`] if the range ends past the buffer.
pub const fn check_range(len_bytes: usize, offset: usize, count: usize) -> Result<(), FieldError> {
    let limit = len_bytes * 8;
    let end = offset.saturating_add(count);
    if end > limit {
        return Err(FieldError::OutOfRange { end, limit });
    }
    Ok(())
}

fn check_field(len_bytes: usize, offset: usize, count: usize) -> Result<(), FieldError> {
    if count > MAX_FIELD_BITS {
        return Err(FieldError::TooWide { bits: count });
    }
    check_range(len_bytes, offset, count)
}

/// Read an unsigned field of `count` bits starting at bit `offset`.
///
/// A zero-width field reads as 0.
///
/// # Errors
///
/// Returns [`FieldError`] if `count > 64` or the field ends past `buf`.
pub fn get_uint(buf: &[u8], offset: usize, count: usize) -> Result<u64, FieldError> {
    check_field(buf.len(), offset, count)?;

    let mut value = 0u64;
    let mut done = 0;
    while done < count {
        let pos = offset + done;
        let shift = pos % 8;
        let take = (8 - shift).min(count - done);
        let bits = (u64::from(buf[pos / 8]) >> shift) & low_mask(take);
        value |= bits << done;
        done += take;
    }
    Ok(value)
}

/// Write the low `count` bits of `value` at bit `offset`.
///
/// Bits outside the field are left untouched, as are bits of `value` above
/// `count`. On error the buffer is not modified.
///
/// # Errors
///
/// Returns [`FieldError`] if `count > 64` or the field ends past `buf`.
#[allow(clippy::cast_possible_truncation)]
pub fn set_uint(buf: &mut [u8], offset: usize, count: usize, value: u64) -> Result<(), FieldError> {
    check_field(buf.len(), offset, count)?;

    let mut done = 0;
    while done < count {
        let pos = offset + done;
        let shift = pos % 8;
        let take = (8 - shift).min(count - done);
        // take + shift <= 8, both masks fit in a byte
        let mask = (low_mask(take) as u8) << shift;
        let chunk = (((value >> done) & low_mask(take)) as u8) << shift;
        let byte = &mut buf[pos / 8];
        *byte = (*byte & !mask) | chunk;
        done += take;
    }
    Ok(())
}

/// Set every bit in `[offset, offset + count)`; no width limit.
///
/// # Errors
///
/// [`FieldError::OutOfRange`] if the range ends past `buf`.
pub fn set_bits(buf: &mut [u8], offset: usize, count: usize) -> Result<(), FieldError> {
    check_range(buf.len(), offset, count)?;
    for pos in offset..offset + count {
        buf[pos / 8] |= 1 << (pos % 8);
    }
    Ok(())
}

/// First byte index where `a` and `b` differ under `mask`.
///
/// Only the common prefix of the three slices is compared.
#[must_use]
pub fn masked_mismatch(a: &[u8], b: &[u8], mask: &[u8]) -> Option<usize> {
    a.iter()
        .zip(b)
        .zip(mask)
        .position(|((x, y), m)| (x & m) != (y & m))
}

/// Round `size` up to the next multiple of `granule` (granule 0 is treated as 1).
#[must_use]
pub const fn pad_to(size: usize, granule: usize) -> usize {
    if granule <= 1 || size % granule == 0 {
        size
    } else {
        (size / granule + 1) * granule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_aligned_field_reads_little_endian() {
        let buf = [0x78, 0x56, 0x34, 0x12];
        assert_eq!(get_uint(&buf, 0, 32).unwrap(), 0x1234_5678);
        assert_eq!(get_uint(&buf, 8, 16).unwrap(), 0x3456);
    }

    #[test]
    fn straddling_field_round_trips() {
        let mut buf = [0u8; 3];
        set_uint(&mut buf, 6, 7, 0x55).unwrap();
        assert_eq!(get_uint(&buf, 6, 7).unwrap(), 0x55);
        assert_eq!(buf[0] & 0x3F, 0, "low bits of byte 0 untouched");
        assert_eq!(buf[1] & 0xE0, 0, "high bits of byte 1 untouched");
        assert_eq!(buf[2], 0);
    }

    #[test]
    fn full_width_field_at_unaligned_offset() {
        let mut buf = [0xFFu8; 10];
        set_uint(&mut buf, 3, 64, 0x0123_4567_89AB_CDEF).unwrap();
        assert_eq!(get_uint(&buf, 3, 64).unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(buf[0] & 0x07, 0x07);
        assert_eq!(buf[8] & 0xF8, 0xF8);
        assert_eq!(buf[9], 0xFF);
    }

    #[test]
    fn field_on_last_byte_stays_in_bounds() {
        let mut buf = [0u8; 4];
        set_uint(&mut buf, 28, 4, 0xF).unwrap();
        assert_eq!(buf, [0, 0, 0, 0xF0]);
        assert_eq!(get_uint(&buf, 24, 8).unwrap(), 0xF0);
    }

    #[test]
    fn excess_value_bits_are_dropped() {
        let mut buf = [0u8; 2];
        set_uint(&mut buf, 4, 4, 0xFFFF).unwrap();
        assert_eq!(buf, [0xF0, 0x00]);
    }

    #[test]
    fn every_width_and_offset_round_trips() {
        let mut buf = [0u8; 12];
        for count in 1..=64 {
            for offset in 0..=(96 - count) {
                let value = 0xA5A5_5A5A_F00F_0FF0u64 & low_mask(count);
                let before = buf;
                set_uint(&mut buf, offset, count, value).unwrap();
                assert_eq!(get_uint(&buf, offset, count).unwrap(), value);
                for bit in (0..96).filter(|b| *b < offset || *b >= offset + count) {
                    let old = get_uint(&before, bit, 1).unwrap();
                    assert_eq!(get_uint(&buf, bit, 1).unwrap(), old, "bit {bit} disturbed");
                }
            }
        }
    }

    #[test]
    fn oversize_requests_leave_buffer_alone() {
        let mut buf = [0x11u8; 4];
        assert_eq!(
            set_uint(&mut buf, 0, 65, 0),
            Err(FieldError::TooWide { bits: 65 })
        );
        assert_eq!(
            set_uint(&mut buf, 30, 4, 0),
            Err(FieldError::OutOfRange { end: 34, limit: 32 })
        );
        assert_eq!(get_uint(&buf, 33, 0), Err(FieldError::OutOfRange { end: 33, limit: 32 }));
        assert_eq!(buf, [0x11; 4]);
    }

    #[test]
    fn set_bits_and_masked_compare() {
        let mut mask = [0u8; 2];
        set_bits(&mut mask, 4, 6).unwrap();
        assert_eq!(mask, [0xF0, 0x03]);

        let a = [0x0F, 0xFC];
        let b = [0x00, 0x00];
        assert_eq!(masked_mismatch(&a, &b, &mask), None);
        let c = [0x10, 0x00];
        assert_eq!(masked_mismatch(&a, &c, &mask), Some(0));
    }

    #[test]
    fn pad_to_granule() {
        assert_eq!(pad_to(4, 4), 4);
        assert_eq!(pad_to(5, 4), 8);
        assert_eq!(pad_to(3, 1), 3);
        assert_eq!(pad_to(3, 0), 3);
    }
}
