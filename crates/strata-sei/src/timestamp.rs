//! # Timestamp NALU
//!
//! Encodes the sender's wall-clock time into a `user_data_unregistered` SEI
//! NAL unit and recovers the end-to-end delay on the receiving side.
//!
//! ## Wire layout (before emulation prevention)
//!
//! ```text
//! offset  size  field
//!      0     3  start code            00 00 01
//!      3     1  NAL header            ref_idc=0 (disposable), type=6 (SEI)
//!      4     1  payload_type          0x05 (user_data_unregistered)
//!      5     1  payload_size          0x18 (24)
//!      6    16  tag                   TIMESTAMP_TAG
//!     22     8  timestamp             ms since Unix epoch, little-endian u64
//!     30     1  rbsp_trailing_bits    0x80
//! ```
//!
//! Sender and receiver are assumed to share a clock domain (same host, or
//! NTP/PTP-synced hosts). A timestamp ahead of the receiver's clock is
//! rejected rather than clamped.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes};
use thiserror::Error;
use tracing::{debug, trace};

use crate::nal::{self, NalHeader, START_CODE};
use crate::sei::{self, SeiError, SeiMessage, USER_DATA_UNREGISTERED};

// ─── Constants ───────────────────────────────────────────────────────────────

/// UUID identifying our SEI messages: `602b0db6-2d3d-44b5-ab9e-ec8ad71f3f8e`.
pub const TIMESTAMP_TAG: [u8; 16] = [
    0x60, 0x2b, 0x0d, 0xb6, 0x2d, 0x3d, 0x44, 0xb5, 0xab, 0x9e, 0xec, 0x8a, 0xd7, 0x1f, 0x3f, 0x8e,
];

pub const TAG_LEN: usize = 16;

pub const TIMESTAMP_LEN: usize = 8;

/// SEI `payload_size` of a timestamp message: tag + timestamp.
pub const PAYLOAD_SIZE: usize = TAG_LEN + TIMESTAMP_LEN;

/// Encoded NALU length without emulation prevention bytes:
/// start code (3) + header (1) + type (1) + size (1) + payload (24) + trailing (1).
pub const NALU_LEN: usize = START_CODE.len() + 3 + PAYLOAD_SIZE + 1;

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Source of real (wall-clock) time.
pub trait WallClock {
    /// Time elapsed since the Unix epoch.
    fn since_epoch(&self) -> Duration;

    fn now_ms(&self) -> u64 {
        epoch_millis(self.since_epoch())
    }
}

/// The system real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn since_epoch(&self) -> Duration {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// A clock frozen at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub Duration);

impl FixedClock {
    pub fn from_millis(ms: u64) -> Self {
        FixedClock(Duration::from_millis(ms))
    }
}

impl WallClock for FixedClock {
    fn since_epoch(&self) -> Duration {
        self.0
    }
}

/// Convert a time since the epoch to whole milliseconds, rounding the
/// sub-second part to the nearest millisecond. A sub-second part that rounds
/// up to 1000 ms carries into the seconds.
pub fn epoch_millis(since_epoch: Duration) -> u64 {
    let mut secs = since_epoch.as_secs();
    let mut millis = (since_epoch.subsec_nanos() as u64 + 500_000) / 1_000_000;
    if millis > 999 {
        secs += 1;
        millis = 0;
    }
    secs.saturating_mul(1000).saturating_add(millis)
}

/// Milliseconds since the epoch on the system clock.
pub fn now_ms() -> u64 {
    SystemClock.now_ms()
}

// ─── Encoder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("SEI serialization failed: {0}")]
    Sei(#[from] SeiError),
    #[error("SEI serialization produced no bytes")]
    EmptyOutput,
    #[error("failed to allocate {len} byte NALU buffer")]
    Alloc { len: usize },
}

/// The 24-byte SEI payload: tag followed by the little-endian timestamp.
pub fn timestamp_payload(timestamp_ms: u64) -> [u8; PAYLOAD_SIZE] {
    let mut payload = [0u8; PAYLOAD_SIZE];
    payload[..TAG_LEN].copy_from_slice(&TIMESTAMP_TAG);
    payload[TAG_LEN..].copy_from_slice(&timestamp_ms.to_le_bytes());
    payload
}

/// Build a start-code-prefixed SEI NALU carrying the current system time.
pub fn build_timestamp_nalu() -> Result<Bytes, EncodeError> {
    build_timestamp_nalu_with(&SystemClock)
}

/// Build a timestamp NALU reading the time from `clock`.
pub fn build_timestamp_nalu_with(clock: &impl WallClock) -> Result<Bytes, EncodeError> {
    encode_timestamp_nalu(clock.now_ms())
}

/// Build a timestamp NALU carrying an explicit timestamp.
pub fn encode_timestamp_nalu(timestamp_ms: u64) -> Result<Bytes, EncodeError> {
    let message = SeiMessage::new(
        USER_DATA_UNREGISTERED,
        Bytes::copy_from_slice(&timestamp_payload(timestamp_ms)),
    );
    let unit = sei::serialize_sei(NalHeader::disposable_sei(), std::slice::from_ref(&message))?;
    if unit.is_empty() {
        return Err(EncodeError::EmptyOutput);
    }

    let len = START_CODE.len() + unit.len();
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| EncodeError::Alloc { len })?;
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(&unit);

    trace!(timestamp_ms, len, "built timestamp NALU");
    Ok(Bytes::from(out))
}

// ─── Decoder ─────────────────────────────────────────────────────────────────

/// Why a NAL unit was not accepted as a timestamp NALU.
///
/// Variants are listed in the order the decoder checks them; the first
/// failing check wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not a parseable SEI NAL unit: {0}")]
    ParseFailure(SeiError),
    #[error("NAL unit type {0} is not SEI")]
    NotSei(u8),
    #[error("expected exactly one SEI message, found {0}")]
    MessageCount(usize),
    #[error("SEI payload type {0} is not user_data_unregistered")]
    WrongType(u32),
    #[error("SEI payload size {0} does not match {PAYLOAD_SIZE}")]
    WrongSize(usize),
    #[error("SEI tag does not match")]
    TagMismatch,
    #[error("timestamp is {ahead_ms} ms ahead of the local clock")]
    NegativeDelay { ahead_ms: u64 },
}

impl Rejection {
    /// Short stable name, for counters and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::ParseFailure(_) => "parse_failure",
            Rejection::NotSei(_) => "not_sei",
            Rejection::MessageCount(_) => "message_count",
            Rejection::WrongType(_) => "wrong_type",
            Rejection::WrongSize(_) => "wrong_size",
            Rejection::TagMismatch => "tag_mismatch",
            Rejection::NegativeDelay { .. } => "negative_delay",
        }
    }
}

/// A decoded timestamp NALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Sender wall-clock time, ms since the epoch.
    pub sent_at_ms: u64,
    /// Receiver clock minus sender clock.
    pub delay_ms: u64,
}

/// Extract the embedded timestamp from a NAL unit.
///
/// `nal` starts at the NAL header byte; a leading Annex B start code is
/// tolerated, including extra `leading_zero_8bits` before it. Checks, in order: parseable SEI unit, exactly one message,
/// `user_data_unregistered` type, 24-byte size, tag.
pub fn read_timestamp(nal: &[u8]) -> Result<u64, Rejection> {
    let nal = nal::strip_start_code(nal);

    let (_, messages) = sei::parse_sei(nal).map_err(|err| match err {
        SeiError::NotSei(unit_type) => Rejection::NotSei(unit_type),
        other => Rejection::ParseFailure(other),
    })?;

    let message = match messages.as_slice() {
        [message] => message,
        other => return Err(Rejection::MessageCount(other.len())),
    };
    if message.payload_type != USER_DATA_UNREGISTERED {
        return Err(Rejection::WrongType(message.payload_type));
    }
    if message.payload_size() != PAYLOAD_SIZE {
        return Err(Rejection::WrongSize(message.payload_size()));
    }

    let (tag, mut timestamp) = message.payload.split_at(TAG_LEN);
    if tag != TIMESTAMP_TAG {
        return Err(Rejection::TagMismatch);
    }
    Ok(timestamp.get_u64_le())
}

/// Decode a timestamp NALU against an explicit receive time.
pub fn measure_at(nal: &[u8], now_ms: u64) -> Result<Reading, Rejection> {
    let result = read_timestamp(nal).and_then(|sent_at_ms| {
        match now_ms.checked_sub(sent_at_ms) {
            Some(delay_ms) => Ok(Reading {
                sent_at_ms,
                delay_ms,
            }),
            None => Err(Rejection::NegativeDelay {
                ahead_ms: sent_at_ms - now_ms,
            }),
        }
    });

    if let Err(rejection) = &result {
        match rejection {
            Rejection::ParseFailure(err) => debug!(error = %err, "SEI unit could not be parsed"),
            Rejection::NotSei(unit_type) => debug!(unit_type, "NAL unit is not SEI"),
            Rejection::MessageCount(count) => debug!(count, "SEI unit has != 1 messages"),
            Rejection::WrongType(payload_type) => {
                debug!(payload_type, "SEI payload is not user_data_unregistered")
            }
            Rejection::WrongSize(size) => debug!(size, "SEI payload size mismatch"),
            Rejection::TagMismatch => debug!("SEI tag belongs to another producer"),
            Rejection::NegativeDelay { ahead_ms } => {
                debug!(ahead_ms, "timestamp ahead of local clock")
            }
        }
    }

    result
}

/// Delay in ms between the embedded timestamp and `now_ms`.
pub fn parse_timestamp_nalu_at(nal: &[u8], now_ms: u64) -> Result<u64, Rejection> {
    measure_at(nal, now_ms).map(|reading| reading.delay_ms)
}

/// Delay in ms between the embedded timestamp and the system clock.
pub fn parse_timestamp_nalu(nal: &[u8]) -> Result<u64, Rejection> {
    parse_timestamp_nalu_at(nal, now_ms())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbsp;

    fn sei_unit(payload_type: u32, payload: Vec<u8>) -> Vec<u8> {
        let msg = SeiMessage::new(payload_type, payload);
        sei::serialize_sei(NalHeader::disposable_sei(), &[msg])
            .unwrap()
            .to_vec()
    }

    #[test]
    fn wire_layout_is_exact() {
        let nalu = encode_timestamp_nalu(1_700_000_000_123).unwrap();

        let mut expected = vec![0x00, 0x00, 0x01, 0x06, 0x05, 0x18];
        expected.extend_from_slice(&TIMESTAMP_TAG);
        expected.extend_from_slice(&[0x7b, 0x68, 0xe5, 0xcf, 0x8b, 0x01, 0x00, 0x00]);
        expected.push(0x80);

        assert_eq!(&nalu[..], &expected[..]);
        assert_eq!(nalu.len(), NALU_LEN);
    }

    #[test]
    fn size_includes_emulation_prevention() {
        // Low bytes 00 00 00 force two prevention bytes.
        let ts = 0x0000_0100_0000_0002u64;
        let nalu = encode_timestamp_nalu(ts).unwrap();
        let overhead = rbsp::escaped_overhead(&timestamp_payload(ts));
        assert_eq!(overhead, 2);
        assert_eq!(nalu.len(), NALU_LEN + overhead);
        assert_eq!(read_timestamp(&nalu), Ok(ts));
    }

    #[test]
    fn millisecond_rounding_carries_into_seconds() {
        assert_eq!(epoch_millis(Duration::new(5, 999_600_000)), 6000);
        assert_eq!(epoch_millis(Duration::new(5, 999_400_000)), 5999);
        assert_eq!(epoch_millis(Duration::new(5, 1_499_999)), 5001);
        assert_eq!(epoch_millis(Duration::new(5, 1_500_000)), 5002);
        assert_eq!(epoch_millis(Duration::ZERO), 0);
    }

    #[test]
    fn encode_at_1000_decode_at_1050() {
        let nalu = build_timestamp_nalu_with(&FixedClock::from_millis(1000)).unwrap();
        assert_eq!(parse_timestamp_nalu_at(&nalu, 1050), Ok(50));
        assert_eq!(
            measure_at(&nalu, 1050),
            Ok(Reading {
                sent_at_ms: 1000,
                delay_ms: 50
            })
        );
    }

    #[test]
    fn same_instant_is_zero_delay() {
        let nalu = encode_timestamp_nalu(42).unwrap();
        assert_eq!(parse_timestamp_nalu_at(&nalu, 42), Ok(0));
    }

    #[test]
    fn decoder_accepts_unit_without_start_code() {
        let nalu = encode_timestamp_nalu(1000).unwrap();
        assert_eq!(parse_timestamp_nalu_at(&nalu[3..], 1001), Ok(1));

        let mut long = vec![0x00];
        long.extend_from_slice(&nalu);
        assert_eq!(parse_timestamp_nalu_at(&long, 1001), Ok(1));
    }

    #[test]
    fn decoder_accepts_extra_leading_zeros() {
        let nalu = encode_timestamp_nalu(1000).unwrap();
        let mut padded = vec![0x00, 0x00];
        padded.extend_from_slice(&nalu);
        assert_eq!(padded[..6], [0x00, 0x00, 0x00, 0x00, 0x01, 0x06]);
        assert_eq!(parse_timestamp_nalu_at(&padded, 1250), Ok(250));
    }

    #[test]
    fn system_clock_roundtrip() {
        let nalu = build_timestamp_nalu().unwrap();
        let delay = parse_timestamp_nalu(&nalu).unwrap();
        assert!(delay < 50, "back-to-back delay was {delay} ms");
    }

    #[test]
    fn foreign_tag_is_rejected() {
        let mut payload = timestamp_payload(1000).to_vec();
        payload[..TAG_LEN].copy_from_slice(&[0x11; TAG_LEN]);
        let unit = sei_unit(USER_DATA_UNREGISTERED, payload);
        assert_eq!(parse_timestamp_nalu_at(&unit, 2000), Err(Rejection::TagMismatch));
    }

    #[test]
    fn wrong_size_is_rejected_before_tag() {
        // Right tag, one byte short.
        let payload = timestamp_payload(1000)[..PAYLOAD_SIZE - 1].to_vec();
        let unit = sei_unit(USER_DATA_UNREGISTERED, payload);
        assert_eq!(read_timestamp(&unit), Err(Rejection::WrongSize(23)));

        // Wrong tag and wrong size: size wins.
        let unit = sei_unit(USER_DATA_UNREGISTERED, vec![0xEE; 40]);
        assert_eq!(read_timestamp(&unit), Err(Rejection::WrongSize(40)));
    }

    #[test]
    fn wrong_payload_type_is_rejected_before_size() {
        let unit = sei_unit(4, timestamp_payload(1000).to_vec());
        assert_eq!(read_timestamp(&unit), Err(Rejection::WrongType(4)));

        let unit = sei_unit(1, vec![0x00; 3]);
        assert_eq!(read_timestamp(&unit), Err(Rejection::WrongType(1)));
    }

    #[test]
    fn non_sei_units_are_rejected_without_reading_payload() {
        assert_eq!(read_timestamp(&[0x65]), Err(Rejection::NotSei(5)));
        assert_eq!(read_timestamp(&[0x67, 0xFF, 0xFF]), Err(Rejection::NotSei(7)));
        assert_eq!(
            read_timestamp(&[0x00, 0x00, 0x01, 0x41]),
            Err(Rejection::NotSei(1))
        );
    }

    #[test]
    fn short_and_garbage_buffers_fail_to_parse() {
        assert_eq!(
            read_timestamp(&[]),
            Err(Rejection::ParseFailure(SeiError::Empty))
        );
        assert_eq!(
            read_timestamp(&[0x06]),
            Err(Rejection::ParseFailure(SeiError::MissingTrailingBits))
        );
        assert_eq!(
            read_timestamp(&[0x06, 0x05, 0x18, 0x60]),
            Err(Rejection::ParseFailure(SeiError::TruncatedPayload {
                declared: 24,
                available: 1
            }))
        );
        assert_eq!(
            read_timestamp(&[0xE6, 0x80]),
            Err(Rejection::ParseFailure(SeiError::ForbiddenBit))
        );
    }

    #[test]
    fn message_count_must_be_one() {
        assert_eq!(read_timestamp(&[0x06, 0x80]), Err(Rejection::MessageCount(0)));

        let ours = SeiMessage::new(USER_DATA_UNREGISTERED, timestamp_payload(1000).to_vec());
        let unit = sei::serialize_sei(NalHeader::disposable_sei(), &[ours.clone(), ours]).unwrap();
        assert_eq!(read_timestamp(&unit), Err(Rejection::MessageCount(2)));
    }

    #[test]
    fn future_timestamp_is_negative_delay() {
        let nalu = build_timestamp_nalu_with(&FixedClock::from_millis(2000)).unwrap();
        assert_eq!(
            parse_timestamp_nalu_at(&nalu, 1000),
            Err(Rejection::NegativeDelay { ahead_ms: 1000 })
        );
    }

    #[test]
    fn huge_timestamp_does_not_wrap() {
        let nalu = encode_timestamp_nalu(u64::MAX).unwrap();
        assert_eq!(
            parse_timestamp_nalu_at(&nalu, 0),
            Err(Rejection::NegativeDelay { ahead_ms: u64::MAX })
        );
    }

    #[test]
    fn rejection_kinds_are_distinct() {
        let all = [
            Rejection::ParseFailure(SeiError::Empty),
            Rejection::NotSei(1),
            Rejection::MessageCount(0),
            Rejection::WrongType(1),
            Rejection::WrongSize(1),
            Rejection::TagMismatch,
            Rejection::NegativeDelay { ahead_ms: 1 },
        ];
        let mut kinds: Vec<_> = all.iter().map(Rejection::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }
}
