//! # Emulation Prevention
//!
//! Inside a NAL unit the byte pattern `00 00 0x` (x <= 3) must never appear,
//! since a decoder scanning the Annex B stream would mistake it for a start
//! code. Writers insert an `emulation_prevention_three_byte` (`0x03`) after
//! every pair of zero bytes that is followed by such a byte; readers drop it.
//!
//! ```text
//!   RBSP:   00 00 01 ..      →   NAL payload:   00 00 03 01 ..
//!   RBSP:   00 00 00 00      →   NAL payload:   00 00 03 00 00 03 00
//! ```

use bytes::{BufMut, BytesMut};

const EMULATION_PREVENTION_BYTE: u8 = 0x03;

/// Append `rbsp` to `out`, inserting emulation prevention bytes.
pub fn escape_into(rbsp: &[u8], out: &mut impl BufMut) {
    let mut zeros = 0usize;
    for &b in rbsp {
        if zeros >= 2 && b <= 0x03 {
            out.put_u8(EMULATION_PREVENTION_BYTE);
            zeros = 0;
        }
        out.put_u8(b);
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

/// Escape an RBSP into a freshly allocated buffer.
pub fn escape(rbsp: &[u8]) -> BytesMut {
    // Worst case adds one byte per two input bytes.
    let mut out = BytesMut::with_capacity(rbsp.len() + rbsp.len() / 2);
    escape_into(rbsp, &mut out);
    out
}

/// Remove emulation prevention bytes from a NAL unit payload.
///
/// Only a `0x03` that directly follows two zero bytes is dropped; everything
/// else is copied through unchanged.
pub fn unescape(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len());
    let mut zeros = 0usize;
    for &b in payload {
        if zeros >= 2 && b == EMULATION_PREVENTION_BYTE {
            zeros = 0;
            continue;
        }
        out.put_u8(b);
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    out
}

/// Number of emulation prevention bytes `escape` would insert.
pub fn escaped_overhead(rbsp: &[u8]) -> usize {
    let mut zeros = 0usize;
    let mut extra = 0usize;
    for &b in rbsp {
        if zeros >= 2 && b <= 0x03 {
            extra += 1;
            zeros = 0;
        }
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    extra
}
