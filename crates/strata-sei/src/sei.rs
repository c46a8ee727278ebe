//! # SEI Wire Format
//!
//! Serialization and parsing of H.264 Supplemental Enhancement Information
//! NAL units (7.3.2.3).
//!
//! ```text
//! +--------+-----------------+-----------------+-----------+-----+--------+
//! | NAL    | payload_type    | payload_size    | payload   | ... | 0x80   |
//! | header | (0xFF.. + byte) | (0xFF.. + byte) | (size B)  |     | stop   |
//! +--------+-----------------+-----------------+-----------+-----+--------+
//! ```
//!
//! Everything after the header byte is emulation-prevented on the wire; see
//! [`crate::rbsp`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::nal::{NalHeader, NalUnitType};
use crate::rbsp;

/// SEI `payload_type` for `user_data_unregistered` (D.1.7).
pub const USER_DATA_UNREGISTERED: u32 = 5;

/// RBSP stop bit followed by alignment zeros.
const RBSP_TRAILING_BITS: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeiError {
    #[error("empty NAL unit")]
    Empty,
    #[error("forbidden_zero_bit is set")]
    ForbiddenBit,
    #[error("NAL unit type {0} is not SEI")]
    NotSei(u8),
    #[error("truncated SEI message header")]
    TruncatedHeader,
    #[error("SEI payload of {declared} bytes exceeds remaining {available} bytes")]
    TruncatedPayload { declared: usize, available: usize },
    #[error("missing or malformed rbsp_trailing_bits")]
    MissingTrailingBits,
    #[error("no SEI messages to serialize")]
    NoMessages,
}

/// One `sei_message()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u32,
    pub payload: Bytes,
}

impl SeiMessage {
    pub fn new(payload_type: u32, payload: impl Into<Bytes>) -> Self {
        SeiMessage {
            payload_type,
            payload: payload.into(),
        }
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Unescaped size of this message inside the RBSP.
    fn rbsp_len(&self) -> usize {
        ff_coded_len(self.payload_type as usize)
            + ff_coded_len(self.payload.len())
            + self.payload.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        put_ff_coded(buf, self.payload_type as usize);
        put_ff_coded(buf, self.payload.len());
        buf.put_slice(&self.payload);
    }
}

// ─── 0xFF-extended values ───────────────────────────────────────────────────

fn ff_coded_len(mut value: usize) -> usize {
    let mut len = 1;
    while value >= 0xFF {
        value -= 0xFF;
        len += 1;
    }
    len
}

fn put_ff_coded(buf: &mut impl BufMut, mut value: usize) {
    while value >= 0xFF {
        buf.put_u8(0xFF);
        value -= 0xFF;
    }
    buf.put_u8(value as u8);
}

fn get_ff_coded(buf: &mut impl Buf) -> Option<usize> {
    let mut value = 0usize;
    loop {
        if !buf.has_remaining() {
            return None;
        }
        let b = buf.get_u8();
        value = value.checked_add(b as usize)?;
        if b != 0xFF {
            return Some(value);
        }
    }
}

// ─── Serialization ──────────────────────────────────────────────────────────

/// Serialize a SEI NAL unit (header byte + escaped RBSP), without start code.
pub fn serialize_sei(header: NalHeader, messages: &[SeiMessage]) -> Result<BytesMut, SeiError> {
    if header.unit_type != NalUnitType::Sei {
        return Err(SeiError::NotSei(header.unit_type.as_u8()));
    }
    if messages.is_empty() {
        return Err(SeiError::NoMessages);
    }

    let rbsp_len = messages.iter().map(SeiMessage::rbsp_len).sum::<usize>() + 1;
    let mut body = BytesMut::with_capacity(rbsp_len);
    for msg in messages {
        msg.encode(&mut body);
    }
    body.put_u8(RBSP_TRAILING_BITS);

    let mut out = BytesMut::with_capacity(1 + rbsp_len + rbsp::escaped_overhead(&body));
    out.put_u8(header.to_byte());
    rbsp::escape_into(&body, &mut out);
    Ok(out)
}

// ─── Parsing ────────────────────────────────────────────────────────────────

/// True when `rest` is exactly the RBSP stop bit plus zero padding.
fn is_trailing(rest: &[u8]) -> bool {
    matches!(
        rest.split_first(),
        Some((&RBSP_TRAILING_BITS, zeros)) if zeros.iter().all(|&b| b == 0)
    )
}

/// Parse a SEI NAL unit (header byte + escaped RBSP, no start code).
///
/// Returns the header and every message found. A unit with no messages
/// before the trailing bits is not an error here; callers decide what an
/// empty list means.
pub fn parse_sei(nal: &[u8]) -> Result<(NalHeader, Vec<SeiMessage>), SeiError> {
    let (&first, payload) = nal.split_first().ok_or(SeiError::Empty)?;
    let header = NalHeader::parse(first);
    if header.forbidden_zero_bit {
        return Err(SeiError::ForbiddenBit);
    }
    if header.unit_type != NalUnitType::Sei {
        return Err(SeiError::NotSei(header.unit_type.as_u8()));
    }

    let mut buf = rbsp::unescape(payload).freeze();
    let mut messages = Vec::new();

    loop {
        if is_trailing(buf.chunk()) {
            break;
        }
        if !buf.has_remaining() {
            return Err(SeiError::MissingTrailingBits);
        }

        let payload_type = get_ff_coded(&mut buf).ok_or(SeiError::TruncatedHeader)?;
        let size = get_ff_coded(&mut buf).ok_or(SeiError::TruncatedHeader)?;
        if size > buf.remaining() {
            return Err(SeiError::TruncatedPayload {
                declared: size,
                available: buf.remaining(),
            });
        }
        let payload_type = u32::try_from(payload_type).map_err(|_| SeiError::TruncatedHeader)?;
        messages.push(SeiMessage {
            payload_type,
            payload: buf.split_to(size),
        });
    }

    Ok((header, messages))
}
