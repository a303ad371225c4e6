use std::borrow::Cow;
use std::ops::Range;

use crate::Codec;

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const SHORT_START_CODE: [u8; 3] = [0, 0, 1];

/// Bytes that must follow a start code before the detector stops looking.
const DETECT_TAIL_MARGIN: usize = 5;

/// One NAL unit located inside a scanned buffer. Borrows the buffer, no copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    buffer: &'a [u8],
    start: usize,
    end: usize,
    header_len: usize,
}

impl<'a> NalUnit<'a> {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn start_code_len(&self) -> usize {
        self.header_len
    }

    /// NAL bytes after the start code, header byte first.
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.start + self.header_len..self.end]
    }

    pub fn header(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    pub fn kind(&self, codec: Codec) -> Option<NalKind> {
        self.header().map(|header| NalKind {
            codec,
            nal_type: codec.nal_type(header),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalKind {
    pub codec: Codec,
    pub nal_type: u8,
}

impl NalKind {
    pub fn is_sps(&self) -> bool {
        self.nal_type == self.codec.sps_nal_type()
    }

    pub fn is_pps(&self) -> bool {
        self.nal_type == self.codec.pps_nal_type()
    }

    pub fn is_parameter_set(&self) -> bool {
        match self.codec {
            Codec::H264 => matches!(self.nal_type, 7 | 8),
            Codec::Hevc => matches!(self.nal_type, 32 | 33 | 34),
        }
    }

    pub fn is_vcl(&self) -> bool {
        match self.codec {
            Codec::H264 => matches!(self.nal_type, 1..=5 | 19),
            Codec::Hevc => self.nal_type <= 31,
        }
    }
}

/// Lazy scan over `00 00 00 01`-delimited NAL units. Clone it to restart.
///
/// Only the first unit may use the three-byte `00 00 01` start code; the last
/// unit runs to the end of the scanned region.
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    buffer: &'a [u8],
    end: usize,
    cursor: Option<(usize, usize)>,
}

impl<'a> NalUnits<'a> {
    /// Scans `buffer[offset..offset + length]`, clamped to the buffer.
    pub fn new(buffer: &'a [u8], offset: usize, length: usize) -> Self {
        let end = offset.saturating_add(length).min(buffer.len());
        let start = offset.min(end);
        Self {
            buffer,
            end,
            cursor: find_first_start_code(&buffer[..end], start),
        }
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, header_len) = self.cursor.take()?;
        let next = find_start_code(&self.buffer[..self.end], start + header_len);
        let end = next.unwrap_or(self.end);
        self.cursor = next.map(|pos| (pos, START_CODE.len()));
        Some(NalUnit {
            buffer: self.buffer,
            start,
            end,
            header_len,
        })
    }
}

pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits::new(data, 0, data.len())
}

/// Classifies the stream from the first SPS header found. `None` means the
/// buffer carries no SPS of either family.
pub fn detect_codec(data: &[u8]) -> Option<Codec> {
    let mut i = 0usize;
    while i + DETECT_TAIL_MARGIN <= data.len() {
        let start_len = if data[i..].starts_with(&START_CODE) {
            START_CODE.len()
        } else if data[i..].starts_with(&SHORT_START_CODE) {
            SHORT_START_CODE.len()
        } else {
            i += 1;
            continue;
        };
        let header = data[i + start_len];
        if Codec::H264.nal_type(header) == Codec::H264.sps_nal_type() {
            return Some(Codec::H264);
        }
        if Codec::Hevc.nal_type(header) == Codec::Hevc.sps_nal_type() {
            return Some(Codec::Hevc);
        }
        i += start_len;
    }
    None
}

/// Latest SPS/PPS payloads (start code stripped, header byte kept).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl ParameterSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the unit if it is a parameter set; returns its kind when stored.
    pub fn observe(&mut self, codec: Codec, nal: &NalUnit<'_>) -> Option<NalKind> {
        let kind = nal.kind(codec)?;
        if kind.is_sps() {
            self.sps = Some(nal.payload().to_vec());
        } else if kind.is_pps() {
            self.pps = Some(nal.payload().to_vec());
        } else {
            return None;
        }
        Some(kind)
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    pub fn required(&self) -> Option<[Vec<u8>; 2]> {
        Some([self.sps.clone()?, self.pps.clone()?])
    }

    pub fn clear(&mut self) {
        self.sps = None;
        self.pps = None;
    }
}

/// Removes `03` from every `00 00 03` sequence, turning a NAL payload into RBSP.
pub fn strip_emulation_prevention(data: &[u8]) -> Cow<'_, [u8]> {
    if !data.windows(3).any(|w| w == [0, 0, 3]) {
        return Cow::Borrowed(data);
    }
    let mut rbsp = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        rbsp.push(byte);
    }
    Cow::Owned(rbsp)
}

fn find_first_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + SHORT_START_CODE.len() <= data.len() {
        if data[i..].starts_with(&START_CODE) {
            return Some((i, START_CODE.len()));
        }
        if data[i..].starts_with(&SHORT_START_CODE) {
            return Some((i, SHORT_START_CODE.len()));
        }
        i += 1;
    }
    None
}

fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(START_CODE.len())
        .position(|w| w == START_CODE)
        .map(|pos| from + pos)
}
