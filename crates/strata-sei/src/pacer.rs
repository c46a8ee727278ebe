//! # Insertion Pacer
//!
//! Decides when the next timestamp NALU goes into a live stream. At most one
//! NALU is produced per interval, measured on a monotonic clock so wall-clock
//! steps (NTP slews, manual changes) cannot cause bursts or stalls.
//!
//! The pacer never sleeps. Callers poll it from wherever the stream asks for
//! more input and use [`InsertPacer::time_until_next`] if they want to wait.

use std::time::Duration;

use bytes::Bytes;
use quanta::{Clock, Instant};
use tracing::warn;

use crate::timestamp::{self, SystemClock, WallClock};

/// Default spacing between timestamp NALUs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Per-pacer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    /// NALUs handed out.
    pub inserted: u64,
    /// Polls that fell inside the interval.
    pub skipped: u64,
    /// Polls where the encoder failed.
    pub failed: u64,
}

/// Rate limiter around the timestamp encoder.
pub struct InsertPacer<W = SystemClock> {
    interval: Duration,
    clock: Clock,
    wall: W,
    last_insert: Option<Instant>,
    stats: PacerStats,
}

impl InsertPacer {
    pub fn new(interval: Duration) -> Self {
        Self::with_clocks(interval, Clock::new(), SystemClock)
    }
}

impl<W: WallClock> InsertPacer<W> {
    /// Pacer with explicit monotonic and wall clocks.
    pub fn with_clocks(interval: Duration, clock: Clock, wall: W) -> Self {
        InsertPacer {
            interval,
            clock,
            wall,
            last_insert: None,
            stats: PacerStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    /// Whether the next poll would produce a NALU.
    pub fn is_due(&self) -> bool {
        self.time_until_next().is_zero()
    }

    /// How long until the interval since the last insertion has passed.
    pub fn time_until_next(&self) -> Duration {
        match self.last_insert {
            None => Duration::ZERO,
            Some(last) => {
                let elapsed = self.clock.now().saturating_duration_since(last);
                self.interval.saturating_sub(elapsed)
            }
        }
    }

    /// Produce a timestamp NALU if one is due.
    ///
    /// A failed build is logged and not counted as an insertion, so the
    /// next poll tries again.
    pub fn poll(&mut self) -> Option<Bytes> {
        if !self.is_due() {
            self.stats.skipped += 1;
            return None;
        }

        match timestamp::build_timestamp_nalu_with(&self.wall) {
            Ok(nalu) => {
                self.last_insert = Some(self.clock.now());
                self.stats.inserted += 1;
                Some(nalu)
            }
            Err(err) => {
                self.stats.failed += 1;
                warn!(error = %err, "timestamp NALU build failed, retrying next poll");
                None
            }
        }
    }

    /// Forget the last insertion so the next poll fires immediately.
    pub fn reset(&mut self) {
        self.last_insert = None;
    }
}
