#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use video_ingest::memory_platform::MemoryPlatform;
use video_ingest::{DecodeListener, Dimensions, TimestampUs};

pub const PPS: [u8; 4] = [0x68, 0xCE, 0x06, 0xE2];
pub const IDR: [u8; 6] = [0x65, 0x88, 0x84, 0x21, 0xA0, 0x7F];
pub const NON_IDR: [u8; 4] = [0x41, 0x9A, 0x02, 0x10];
pub const HEVC_VPS: [u8; 4] = [0x40, 0x01, 0x0C, 0x01];
pub const HEVC_SPS: [u8; 5] = [0x42, 0x01, 0x01, 0x01, 0x60];
pub const HEVC_PPS: [u8; 3] = [0x44, 0x01, 0xC1];
pub const HEVC_IDR: [u8; 4] = [0x26, 0x01, 0xAF, 0x09];

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    fn bits(&mut self, value: u32, n: u32) -> &mut Self {
        for i in (0..n).rev() {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - (self.bit_len % 8));
            }
            self.bit_len += 1;
        }
        self
    }

    fn ue(&mut self, value: u32) -> &mut Self {
        let code = value + 1;
        let len = 32 - code.leading_zeros();
        self.bits(0, len - 1).bits(code, len)
    }

    fn finish(mut self) -> Vec<u8> {
        self.bits(1, 1);
        while self.bit_len % 8 != 0 {
            self.bits(0, 1);
        }
        self.bytes
    }
}

/// Baseline-profile SPS NAL payload (header byte included) for a
/// progressive frame of `width`x`height`, both multiples of 16 or cropped
/// down from the next macroblock boundary.
pub fn baseline_sps(width: u32, height: u32) -> Vec<u8> {
    let width_mbs = width.div_ceil(16);
    let height_mbs = height.div_ceil(16);
    let crop_right = (width_mbs * 16 - width) / 2;
    let crop_bottom = (height_mbs * 16 - height) / 2;

    let mut w = BitWriter::default();
    w.bits(0x67, 8).bits(66, 8).bits(0xC0, 8).bits(31, 8).ue(0);
    // log2_max_frame_num_minus4, poc type 0, log2_max_poc_lsb_minus4
    w.ue(0).ue(0).ue(2);
    // max_num_ref_frames, gaps_in_frame_num_allowed
    w.ue(1).bits(0, 1);
    w.ue(width_mbs - 1).ue(height_mbs - 1);
    // frame_mbs_only, direct_8x8_inference
    w.bits(1, 1).bits(1, 1);
    if crop_right > 0 || crop_bottom > 0 {
        w.bits(1, 1).ue(0).ue(crop_right).ue(0).ue(crop_bottom);
    } else {
        w.bits(0, 1);
    }
    w.bits(0, 1);
    w.finish()
}

/// Joins NAL payloads with 4-byte start codes.
pub fn annexb(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

pub fn h264_keyframe(width: u32, height: u32) -> Vec<u8> {
    annexb(&[&baseline_sps(width, height), &PPS, &IDR])
}

pub fn hevc_keyframe() -> Vec<u8> {
    annexb(&[&HEVC_VPS, &HEVC_SPS, &HEVC_PPS, &HEVC_IDR])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// New dimensions plus how many units the platform had received so far.
    Dimensions(Dimensions, usize),
    Frame(TimestampUs),
    Dropped(TimestampUs),
}

/// Records listener callbacks in order.
pub struct Recorder {
    platform: MemoryPlatform,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new(platform: &MemoryPlatform) -> Self {
        Self {
            platform: platform.clone(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn dimensions(&self) -> Vec<Dimensions> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Dimensions(dims, _) => Some(dims),
                _ => None,
            })
            .collect()
    }
}

impl DecodeListener for Recorder {
    fn dimensions_changed(&self, dims: Dimensions) {
        let submitted = self.platform.journal().submitted.len();
        self.events
            .lock()
            .unwrap()
            .push(Event::Dimensions(dims, submitted));
    }

    fn frame_decoded(&self, pts: TimestampUs, _latency: Duration) {
        self.events.lock().unwrap().push(Event::Frame(pts));
    }

    fn unit_dropped(&self, pts: TimestampUs) {
        self.events.lock().unwrap().push(Event::Dropped(pts));
    }
}
