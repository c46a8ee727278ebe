//! # Stream Probe
//!
//! Walks an H.264 Annex B byte stream, hands every SEI NAL unit to the
//! timestamp decoder and collects the recovered delays. Other NAL unit types
//! are skipped without being inspected.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::nal::{self, NalUnitType};
use crate::timestamp::{self, Rejection};

/// One recovered timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Measurement {
    /// Byte offset of the NAL header within the probed buffer.
    pub offset: usize,
    pub sent_at_ms: u64,
    pub delay_ms: u64,
}

/// Result of probing one buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// Total NAL units seen.
    pub nal_units: usize,
    /// NAL units of type SEI.
    pub sei_units: usize,
    pub measurements: Vec<Measurement>,
    /// SEI units that were not ours, by [`Rejection::kind`].
    pub rejections: BTreeMap<&'static str, usize>,
}

impl ProbeReport {
    pub fn rejected(&self) -> usize {
        self.rejections.values().sum()
    }

    /// Smallest, largest and mean delay, if anything was measured.
    pub fn delay_summary(&self) -> Option<DelaySummary> {
        let delays = self.measurements.iter().map(|m| m.delay_ms);
        let min_ms = delays.clone().min()?;
        let max_ms = delays.clone().max()?;
        // Widened so delays near u64::MAX cannot overflow the sum.
        let total: u128 = delays.map(u128::from).sum();
        let mean_ms = total as f64 / self.measurements.len() as f64;
        Some(DelaySummary {
            min_ms,
            max_ms,
            mean_ms,
        })
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ProbeReport) {
        self.nal_units += other.nal_units;
        self.sei_units += other.sei_units;
        self.measurements.extend(other.measurements);
        for (kind, count) in other.rejections {
            *self.rejections.entry(kind).or_default() += count;
        }
    }

    fn record_rejection(&mut self, rejection: &Rejection) {
        *self.rejections.entry(rejection.kind()).or_default() += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DelaySummary {
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
}

/// Probe an Annex B buffer, measuring delays against `now_ms`.
pub fn probe_annex_b(data: &[u8], now_ms: u64) -> ProbeReport {
    let mut report = ProbeReport::default();

    for unit in nal::split_annex_b(data) {
        report.nal_units += 1;

        let is_sei = unit
            .header()
            .is_some_and(|h| h.unit_type == NalUnitType::Sei);
        if !is_sei {
            continue;
        }
        report.sei_units += 1;

        match timestamp::measure_at(unit.data, now_ms) {
            Ok(reading) => {
                info!(
                    offset = unit.offset,
                    sent_at_ms = reading.sent_at_ms,
                    delay_ms = reading.delay_ms,
                    "timestamp recovered"
                );
                report.measurements.push(Measurement {
                    offset: unit.offset,
                    sent_at_ms: reading.sent_at_ms,
                    delay_ms: reading.delay_ms,
                });
            }
            Err(rejection) => {
                debug!(offset = unit.offset, reason = rejection.kind(), "SEI unit skipped");
                report.record_rejection(&rejection);
            }
        }
    }

    report
}

/// Probe an Annex B buffer against the system clock.
pub fn probe_annex_b_now(data: &[u8]) -> ProbeReport {
    probe_annex_b(data, timestamp::now_ms())
}
