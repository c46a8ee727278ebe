//! # Integration tests: encoder → Annex B stream → probe
//!
//! Timestamp NALUs are spliced into a synthetic H.264 elementary stream the
//! way a live pipeline would insert them, then recovered by scanning the
//! stream. Clocks are fixed or mocked so delays are exact.

use std::time::Duration;

use quanta::Clock;
use strata_sei::nal::{self, NalHeader, NalUnitType};
use strata_sei::pacer::InsertPacer;
use strata_sei::probe::probe_annex_b;
use strata_sei::sei::{self, SeiMessage, USER_DATA_UNREGISTERED};
use strata_sei::timestamp::{
    self, encode_timestamp_nalu, measure_at, FixedClock, Reading, NALU_LEN,
};
use strata_sei::{build_timestamp_nalu, parse_timestamp_nalu, Rejection, TIMESTAMP_TAG};

// ─── Helpers ────────────────────────────────────────────────────────────────

const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28, 0xac];
const PPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x68, 0xee, 0x3c, 0x80];

fn idr(len: usize) -> Vec<u8> {
    let mut unit = vec![0x00, 0x00, 0x01, 0x65];
    unit.extend((0..len).map(|i| (i % 200) as u8 + 0x10));
    unit
}

fn p_slice(len: usize) -> Vec<u8> {
    let mut unit = vec![0x00, 0x00, 0x01, 0x41];
    unit.extend((0..len).map(|i| (i % 100) as u8 + 0x20));
    unit
}

/// A GOP of `frames` pictures with a timestamp NALU ahead of each picture.
fn stamped_gop(frames: usize, first_ms: u64, step_ms: u64) -> Vec<u8> {
    let mut stream = Vec::new();
    stream.extend_from_slice(SPS);
    stream.extend_from_slice(PPS);
    for i in 0..frames {
        let ts = encode_timestamp_nalu(first_ms + i as u64 * step_ms).unwrap();
        stream.extend_from_slice(&ts);
        if i == 0 {
            stream.extend(idr(512));
        } else {
            stream.extend(p_slice(128));
        }
    }
    stream
}

// ─── Encoder → Decoder ──────────────────────────────────────────────────────

#[test]
fn fresh_nalu_decodes_with_small_delay() {
    let nalu = build_timestamp_nalu().unwrap();
    assert_eq!(nalu.len(), NALU_LEN);

    let delay = parse_timestamp_nalu(&nalu).unwrap();
    assert!(delay < 1_000, "delay {delay} ms for a NALU built just now");
}

#[test]
fn built_nalu_is_a_disposable_sei_unit() {
    let nalu = build_timestamp_nalu().unwrap();
    let units = nal::split_annex_b(&nalu);
    assert_eq!(units.len(), 1);

    let header = units[0].header().unwrap();
    assert_eq!(header, NalHeader::disposable_sei());
    assert_eq!(header.unit_type, NalUnitType::Sei);

    let (_, messages) = sei::parse_sei(units[0].data).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload_type, USER_DATA_UNREGISTERED);
    assert_eq!(&messages[0].payload[..16], &TIMESTAMP_TAG);
}

#[test]
fn fixed_clock_gives_exact_delay() {
    let sent = FixedClock::from_millis(1_700_000_000_000);
    let nalu = timestamp::build_timestamp_nalu_with(&sent).unwrap();

    assert_eq!(
        measure_at(&nalu, 1_700_000_000_250),
        Ok(Reading {
            sent_at_ms: 1_700_000_000_000,
            delay_ms: 250,
        })
    );
}

#[test]
fn start_code_forms_are_interchangeable() {
    let nalu = encode_timestamp_nalu(42).unwrap();
    let bare = &nalu[3..];
    let mut long = vec![0x00];
    long.extend_from_slice(&nalu);

    for form in [&nalu[..], bare, &long[..]] {
        assert_eq!(timestamp::parse_timestamp_nalu_at(form, 100), Ok(58));
    }
}

#[test]
fn other_producers_sei_is_ignored() {
    // Same shape as ours, different UUID.
    let mut payload = vec![0xA5u8; 16];
    payload.extend_from_slice(&1_000u64.to_le_bytes());
    let unit = sei::serialize_sei(
        NalHeader::disposable_sei(),
        &[SeiMessage::new(USER_DATA_UNREGISTERED, payload)],
    )
    .unwrap();

    assert_eq!(
        timestamp::parse_timestamp_nalu_at(&unit, 2_000),
        Err(Rejection::TagMismatch)
    );
}

// ─── Stream probing ─────────────────────────────────────────────────────────

#[test]
fn probe_recovers_every_stamp_in_a_gop() {
    let stream = stamped_gop(30, 10_000, 33);
    let now = 10_000 + 29 * 33 + 100;

    let report = probe_annex_b(&stream, now);
    assert_eq!(report.nal_units, 2 + 30 * 2);
    assert_eq!(report.sei_units, 30);
    assert_eq!(report.rejected(), 0);
    assert_eq!(report.measurements.len(), 30);

    // Later stamps are younger.
    let delays: Vec<u64> = report.measurements.iter().map(|m| m.delay_ms).collect();
    assert!(delays.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(*delays.last().unwrap(), 100);

    for m in &report.measurements {
        assert_eq!(stream[m.offset], 0x06);
    }
}

#[test]
fn probe_report_merges_across_chunks() {
    let first = stamped_gop(5, 1_000, 40);
    let second = stamped_gop(5, 2_000, 40);

    let mut report = probe_annex_b(&first, 3_000);
    report.merge(probe_annex_b(&second, 3_000));

    assert_eq!(report.measurements.len(), 10);
    let summary = report.delay_summary().unwrap();
    assert_eq!(summary.max_ms, 2_000);
    assert_eq!(summary.min_ms, 3_000 - 2_160);
}

#[test]
fn probe_counts_clock_skew_as_rejection() {
    let stream = stamped_gop(3, 5_000, 1_000);
    let report = probe_annex_b(&stream, 6_000);

    // 5000 and 6000 measure, 7000 is in the future.
    assert_eq!(report.measurements.len(), 2);
    assert_eq!(report.rejections.get("negative_delay"), Some(&1));
}

// ─── Paced insertion ────────────────────────────────────────────────────────

#[test]
fn pacer_limits_stamps_to_one_per_interval() {
    let (clock, mock) = Clock::mock();
    let mut pacer = InsertPacer::with_clocks(
        Duration::from_millis(1_000),
        clock,
        FixedClock::from_millis(50_000),
    );

    // 60 frames at ~30 fps, encoder asks for data before every frame.
    let mut stream = Vec::new();
    for _ in 0..60 {
        if let Some(nalu) = pacer.poll() {
            stream.extend_from_slice(&nalu);
        }
        stream.extend(p_slice(64));
        mock.increment(Duration::from_millis(33));
    }

    let report = probe_annex_b(&stream, 50_020);
    // t = 0 and t = 1023 ms (31 * 33); the next would be 2046 ms.
    assert_eq!(report.measurements.len(), 2);
    assert_eq!(pacer.stats().inserted, 2);
    assert!(report.measurements.iter().all(|m| m.delay_ms == 20));
}
