// SPDX-License-Identifier: AGPL-3.0-only

//! Stream data file record layout.
//!
//! A data file is a plain concatenation of records, one per frame:
//!
//! ```text
//! offset  size  field
//! ──────  ────  ────────────────────────────────────────────
//!  0      4     length  (u32 LE) = payload bytes + 4
//!  4      4     meta    (u32 LE) = channel << 24 | error << 16 | flags
//!  8      n     payload
//! ```
//!
//! The length word counts the meta word so a reader can skip a record
//! without understanding it.

/// Bytes preceding the payload of every record.
pub const HEADER_LEN: usize = 8;

/// Bytes of the header counted by the length word.
pub const META_LEN: u32 = 4;

/// Frame metadata carried in the second header word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordMeta {
    /// Producer-defined flags
    pub flags: u16,
    /// Producer-reported error bits
    pub error: u8,
    /// Logical channel the frame arrived on
    pub channel: u8,
}

impl RecordMeta {
    /// Pack into the on-disk meta word.
    #[must_use]
    pub const fn to_word(self) -> u32 {
        ((self.channel as u32) << 24) | ((self.error as u32) << 16) | self.flags as u32
    }

    /// Unpack the on-disk meta word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_word(word: u32) -> Self {
        Self {
            flags: (word & 0xFFFF) as u16,
            error: ((word >> 16) & 0xFF) as u8,
            channel: (word >> 24) as u8,
        }
    }
}

/// Length word for a payload of `payload` bytes, `None` if it cannot be represented.
#[must_use]
pub fn length_word(payload: usize) -> Option<u32> {
    u32::try_from(payload).ok()?.checked_add(META_LEN)
}

/// Payload size encoded by a length word, `None` if the word is shorter than the meta word.
#[must_use]
pub const fn payload_len(length_word: u32) -> Option<u32> {
    length_word.checked_sub(META_LEN)
}
