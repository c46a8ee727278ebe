//! # NAL Unit Framing
//!
//! H.264 NAL unit header handling and Annex B byte-stream splitting.
//!
//! The H.264 NAL header is 1 byte: `forbidden(1) | nal_ref_idc(2) | nal_type(5)`.
//! In an Annex B stream every NAL unit is preceded by a start code,
//! `00 00 01` or `00 00 00 01`.

use std::fmt;

/// Three-byte Annex B start code prefix.
pub const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Four-byte Annex B start code (zero_byte + prefix).
pub const START_CODE_LONG: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// `nal_ref_idc`: how important the unit is for reference picture handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalRefIdc {
    /// Not used for reference; may be dropped without affecting decoding.
    Disposable = 0,
    Low = 1,
    High = 2,
    Highest = 3,
}

impl NalRefIdc {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => NalRefIdc::Disposable,
            1 => NalRefIdc::Low,
            2 => NalRefIdc::High,
            3 => NalRefIdc::Highest,
            _ => unreachable!(),
        }
    }
}

/// H.264 `nal_unit_type` (Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    Slice,
    SliceDataA,
    SliceDataB,
    SliceDataC,
    Idr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    Filler,
    SpsExtension,
    AuxiliarySlice,
    SliceExtension,
    Other(u8),
}

impl NalUnitType {
    pub fn from_u8(v: u8) -> Self {
        match v & 0x1F {
            1 => NalUnitType::Slice,
            2 => NalUnitType::SliceDataA,
            3 => NalUnitType::SliceDataB,
            4 => NalUnitType::SliceDataC,
            5 => NalUnitType::Idr,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::Filler,
            13 => NalUnitType::SpsExtension,
            19 => NalUnitType::AuxiliarySlice,
            20 => NalUnitType::SliceExtension,
            other => NalUnitType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            NalUnitType::Slice => 1,
            NalUnitType::SliceDataA => 2,
            NalUnitType::SliceDataB => 3,
            NalUnitType::SliceDataC => 4,
            NalUnitType::Idr => 5,
            NalUnitType::Sei => 6,
            NalUnitType::Sps => 7,
            NalUnitType::Pps => 8,
            NalUnitType::AccessUnitDelimiter => 9,
            NalUnitType::EndOfSequence => 10,
            NalUnitType::EndOfStream => 11,
            NalUnitType::Filler => 12,
            NalUnitType::SpsExtension => 13,
            NalUnitType::AuxiliarySlice => 19,
            NalUnitType::SliceExtension => 20,
            NalUnitType::Other(v) => v & 0x1F,
        }
    }
}

/// Parsed one-byte H.264 NAL header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub forbidden_zero_bit: bool,
    pub ref_idc: NalRefIdc,
    pub unit_type: NalUnitType,
}

impl NalHeader {
    /// Header for a disposable SEI unit, as carried by timestamp NALUs.
    pub const fn disposable_sei() -> Self {
        NalHeader {
            forbidden_zero_bit: false,
            ref_idc: NalRefIdc::Disposable,
            unit_type: NalUnitType::Sei,
        }
    }

    pub fn parse(byte: u8) -> Self {
        NalHeader {
            forbidden_zero_bit: byte & 0x80 != 0,
            ref_idc: NalRefIdc::from_bits(byte >> 5),
            unit_type: NalUnitType::from_u8(byte),
        }
    }

    pub fn to_byte(self) -> u8 {
        ((self.forbidden_zero_bit as u8) << 7)
            | ((self.ref_idc as u8) << 5)
            | self.unit_type.as_u8()
    }
}

impl fmt::Display for NalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} ref_idc={}",
            self.unit_type.as_u8(),
            self.ref_idc as u8
        )
    }
}

/// A NAL unit located inside an Annex B byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Offset of the first header byte within the scanned buffer.
    pub offset: usize,
    /// Header byte plus escaped payload, without start code.
    pub data: &'a [u8],
}

impl NalUnit<'_> {
    pub fn header(&self) -> Option<NalHeader> {
        self.data.first().map(|b| NalHeader::parse(*b))
    }
}

/// Length of the start code at the beginning of `data`, if any.
///
/// Any run of two or more zero bytes followed by `0x01` counts, so
/// `leading_zero_8bits` before a 3- or 4-byte start code is included.
pub fn start_code_len(data: &[u8]) -> Option<usize> {
    let zeros = data.iter().take_while(|&&b| b == 0x00).count();
    (zeros >= 2 && data.get(zeros) == Some(&0x01)).then_some(zeros + 1)
}

/// Strip a leading Annex B start code (with any extra leading zeros), if
/// present. Input without one is returned unchanged.
pub fn strip_start_code(data: &[u8]) -> &[u8] {
    match start_code_len(data) {
        Some(len) => &data[len..],
        None => data,
    }
}

/// Split an Annex B byte stream into its NAL units.
///
/// Bytes before the first start code are ignored. Trailing zero bytes
/// (`trailing_zero_8bits`, or the leading zero of a 4-byte start code) are
/// not part of the preceding unit. Empty units are skipped.
pub fn split_annex_b(data: &[u8]) -> Vec<NalUnit<'_>> {
    let mut starts = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01 {
            starts.push((i, i + 3));
            i += 3;
        } else if data[i + 2] > 0x01 {
            // No start code can begin at i, i+1 or i+2.
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map_or(data.len(), |&(sc, _)| sc);
        let mut unit = &data[payload_start..end];
        while let [rest @ .., 0x00] = unit {
            unit = rest;
        }
        if !unit.is_empty() {
            units.push(NalUnit {
                offset: payload_start,
                data: unit,
            });
        }
    }

    units
}
