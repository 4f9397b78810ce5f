// SPDX-License-Identifier: AGPL-3.0-only

//! Memory transaction codes.
//!
//! A transaction carries a type code and finishes with a 32-bit status code.
//! Status `0` is success; the upper byte classifies failures the runtime
//! itself raises, anything else is an opaque transport-specific code.
//!
//! ```text
//! status      meaning
//! ──────────  ─────────────────────────────────────────────
//! 0x00000000  success
//! 0x01000000  timeout (raised by the initiator, not the transport)
//! 0x02000000  verify mismatch (raised by the initiator)
//! 0x03000000  address rejected by the responder
//! 0x04000000  size rejected by the responder
//! other       transport-defined failure
//! ```

// ── Transaction types ────────────────────────────────────────────────────────

/// Read from hardware into the shadow buffer.
pub const READ: u32 = 0x1;
/// Write the shadow buffer to hardware, completion expected.
pub const WRITE: u32 = 0x2;
/// Posted write: fire and forget from the caller's point of view.
pub const POST: u32 = 0x3;
/// Read back into the verify shadow for post-write comparison.
pub const VERIFY: u32 = 0x4;

// ── Completion status ────────────────────────────────────────────────────────

/// Completion status codes.
pub mod status {
    /// Transaction completed.
    pub const OK: u32 = 0;
    /// No completion arrived within the initiator's timeout.
    pub const TIMEOUT: u32 = 0x0100_0000;
    /// Read-back data differed from the written data under the verify mask.
    pub const VERIFY: u32 = 0x0200_0000;
    /// Address outside the responder's window or misaligned.
    pub const ADDRESS: u32 = 0x0300_0000;
    /// Size above the responder's maximum access.
    pub const SIZE: u32 = 0x0400_0000;
}

/// Whether a type code moves data towards the hardware.
#[must_use]
pub const fn is_write(kind: u32) -> bool {
    kind == WRITE || kind == POST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_distinct() {
        let all = [READ, WRITE, POST, VERIFY];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn write_direction() {
        assert!(is_write(WRITE));
        assert!(is_write(POST));
        assert!(!is_write(READ));
        assert!(!is_write(VERIFY));
    }

    #[test]
    fn failure_codes_nonzero() {
        assert_eq!(status::OK, 0);
        for code in [status::TIMEOUT, status::VERIFY, status::ADDRESS, status::SIZE] {
            assert_ne!(code, status::OK);
        }
    }
}
