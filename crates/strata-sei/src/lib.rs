//! # strata-sei
//!
//! End-to-end latency measurement for H.264 streams.
//!
//! A sender embeds its wall-clock time (milliseconds since the Unix epoch)
//! into the elementary stream as a `user_data_unregistered` SEI NAL unit,
//! tagged with a fixed 16-byte UUID. Anywhere downstream, the unit can be
//! recognised by its tag and the glass-to-glass delay recovered by comparing
//! the embedded time with the local clock.
//!
//! ## Crate structure
//!
//! - [`rbsp`]: Emulation prevention (`00 00 03`) insertion and removal
//! - [`nal`]: NAL header, unit types, Annex B start-code splitting
//! - [`sei`]: SEI message serialization and parsing
//! - [`timestamp`]: Timestamp NALU encoder/decoder and rejection reasons
//! - [`pacer`]: Rate-limited insertion of timestamp NALUs
//! - [`probe`]: Delay measurement over an Annex B byte stream
//! - [`config`]: TOML configuration for the `strata-sei` tool

pub mod config;
pub mod nal;
pub mod pacer;
pub mod probe;
pub mod rbsp;
pub mod sei;
pub mod timestamp;

pub use timestamp::{
    build_timestamp_nalu, parse_timestamp_nalu, EncodeError, Rejection, TIMESTAMP_TAG,
};
