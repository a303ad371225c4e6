//! Bit-level H.264 sequence parameter set parsing, limited to the fields
//! needed to derive the cropped frame size.

use crate::bitstream::strip_emulation_prevention;
use crate::{DecodeError, Dimensions};

/// Profiles whose SPS carries chroma format, bit depth and scaling matrices.
const EXTENDED_PROFILES: [u8; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

const MACROBLOCK_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub dims: Dimensions,
}

/// MSB-first reader over an RBSP buffer.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }

    pub fn read_bit(&mut self) -> Result<u32, DecodeError> {
        let byte = self.data.get(self.bit_pos / 8).ok_or_else(|| {
            DecodeError::SpsParse(format!("read past end at bit {}", self.bit_pos))
        })?;
        let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
        self.bit_pos += 1;
        Ok(u32::from(bit))
    }

    pub fn read_flag(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_bit()? == 1)
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32, DecodeError> {
        if n > 32 {
            return Err(DecodeError::SpsParse(format!("cannot read {n} bits at once")));
        }
        if n as usize > self.bits_left() {
            return Err(DecodeError::SpsParse(format!(
                "read of {n} bits past end at bit {}",
                self.bit_pos
            )));
        }
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > self.bits_left() {
            return Err(DecodeError::SpsParse(format!(
                "skip of {n} bits past end at bit {}",
                self.bit_pos
            )));
        }
        self.bit_pos += n;
        Ok(())
    }

    /// Unsigned Exp-Golomb: `L` leading zeros, a one, then `L` suffix bits.
    pub fn read_ue(&mut self) -> Result<u32, DecodeError> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(DecodeError::SpsParse(
                    "exp-golomb prefix longer than 31 bits".to_string(),
                ));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        let value = (1u64 << leading_zeros) - 1 + suffix;
        u32::try_from(value)
            .map_err(|_| DecodeError::SpsParse(format!("exp-golomb value {value} overflows")))
    }

    pub fn read_se(&mut self) -> Result<i32, DecodeError> {
        let code = i64::from(self.read_ue()?);
        let value = if code % 2 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        // |value| <= 2^31, only +2^31 is out of range.
        i32::try_from(value)
            .map_err(|_| DecodeError::SpsParse(format!("signed exp-golomb {value} overflows")))
    }
}

/// Parses an H.264 SPS NAL payload (start code stripped, header byte present).
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo, DecodeError> {
    let rbsp = strip_emulation_prevention(nal);
    let mut br = BitReader::new(&rbsp);

    br.skip_bits(8)?;
    let profile_idc = br.read_bits(8)? as u8;
    // constraint_set flags and level_idc
    br.skip_bits(16)?;
    let _seq_parameter_set_id = br.read_ue()?;

    if EXTENDED_PROFILES.contains(&profile_idc) {
        let chroma_format_idc = br.read_ue()?;
        if chroma_format_idc == 3 {
            // separate_colour_plane_flag
            br.skip_bits(1)?;
        }
        let _bit_depth_luma_minus8 = br.read_ue()?;
        let _bit_depth_chroma_minus8 = br.read_ue()?;
        // qpprime_y_zero_transform_bypass_flag
        br.skip_bits(1)?;
        if br.read_flag()? {
            let slots = if chroma_format_idc == 3 { 12 } else { 8 };
            for slot in 0..slots {
                if br.read_flag()? {
                    skip_scaling_list(&mut br, if slot < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = br.read_ue()?;
    match br.read_ue()? {
        0 => {
            let _log2_max_pic_order_cnt_lsb_minus4 = br.read_ue()?;
        }
        1 => {
            // delta_pic_order_always_zero_flag
            br.skip_bits(1)?;
            let _offset_for_non_ref_pic = br.read_se()?;
            let _offset_for_top_to_bottom_field = br.read_se()?;
            let cycle = br.read_ue()?;
            for _ in 0..cycle {
                let _offset_for_ref_frame = br.read_se()?;
            }
        }
        _ => {}
    }

    let _max_num_ref_frames = br.read_ue()?;
    // gaps_in_frame_num_value_allowed_flag
    br.skip_bits(1)?;

    let pic_width_in_mbs_minus1 = br.read_ue()?;
    let pic_height_in_map_units_minus1 = br.read_ue()?;
    let frame_mbs_only_flag = br.read_bit()?;

    let width_mbs = u64::from(pic_width_in_mbs_minus1) + 1;
    let height_map_units = u64::from(pic_height_in_map_units_minus1) + 1;
    let mut width = width_mbs * u64::from(MACROBLOCK_SIZE);
    let mut height =
        u64::from(2 - frame_mbs_only_flag) * height_map_units * u64::from(MACROBLOCK_SIZE);

    if frame_mbs_only_flag == 0 {
        // mb_adaptive_frame_field_flag
        br.skip_bits(1)?;
    }
    // direct_8x8_inference_flag
    br.skip_bits(1)?;

    if br.read_flag()? {
        let left = u64::from(br.read_ue()?);
        let right = u64::from(br.read_ue()?);
        let top = u64::from(br.read_ue()?);
        let bottom = u64::from(br.read_ue()?);
        width = width.checked_sub(2 * (left + right)).ok_or_else(|| {
            DecodeError::SpsParse(format!(
                "horizontal crop {left}+{right} exceeds width {width}"
            ))
        })?;
        height = height.checked_sub(2 * (top + bottom)).ok_or_else(|| {
            DecodeError::SpsParse(format!(
                "vertical crop {top}+{bottom} exceeds height {height}"
            ))
        })?;
    }

    let dims = u32::try_from(width)
        .ok()
        .zip(u32::try_from(height).ok())
        .and_then(|(w, h)| Dimensions::new(w, h))
        .ok_or_else(|| DecodeError::SpsParse(format!("unusable frame size {width}x{height}")))?;

    Ok(SpsInfo { profile_idc, dims })
}

/// Walks one scaling list; the deltas only matter for bit alignment.
fn skip_scaling_list(br: &mut BitReader<'_>, size: usize) -> Result<(), DecodeError> {
    let mut last_scale = 8i64;
    let mut next_scale = 8i64;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = i64::from(br.read_se()?);
            next_scale = (last_scale + delta).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Writes SPS syntax for tests.
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bit_len: usize,
    }

    impl BitWriter {
        pub(crate) fn bits(&mut self, value: u64, n: u32) -> &mut Self {
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

        pub(crate) fn flag(&mut self, on: bool) -> &mut Self {
            self.bits(u64::from(on), 1)
        }

        pub(crate) fn ue(&mut self, value: u32) -> &mut Self {
            let code = u64::from(value) + 1;
            let len = 64 - code.leading_zeros();
            self.bits(0, len - 1).bits(code, len)
        }

        pub(crate) fn se(&mut self, value: i32) -> &mut Self {
            let code = if value > 0 {
                (value as u32) * 2 - 1
            } else {
                value.unsigned_abs() * 2
            };
            self.ue(code)
        }

        /// Appends the RBSP stop bit and byte-aligns.
        pub(crate) fn finish(&mut self) -> Vec<u8> {
            self.bits(1, 1);
            while self.bit_len % 8 != 0 {
                self.bits(0, 1);
            }
            std::mem::take(&mut self.bytes)
        }
    }

    pub(crate) struct SpsFields {
        pub(crate) profile_idc: u8,
        pub(crate) level_idc: u8,
        pub(crate) chroma_format_idc: u32,
        pub(crate) scaling_matrix: bool,
        pub(crate) pic_order_cnt_type: u32,
        pub(crate) width_mbs_minus1: u32,
        pub(crate) height_map_units_minus1: u32,
        pub(crate) frame_mbs_only: bool,
        pub(crate) crop: Option<[u32; 4]>,
    }

    impl SpsFields {
        pub(crate) fn baseline(width_mbs_minus1: u32, height_map_units_minus1: u32) -> Self {
            Self {
                profile_idc: 66,
                level_idc: 31,
                chroma_format_idc: 1,
                scaling_matrix: false,
                pic_order_cnt_type: 0,
                width_mbs_minus1,
                height_map_units_minus1,
                frame_mbs_only: true,
                crop: None,
            }
        }

        /// NAL payload starting with the `0x67` header byte.
        pub(crate) fn encode(&self) -> Vec<u8> {
            let mut w = BitWriter::default();
            w.bits(0x67, 8)
                .bits(u64::from(self.profile_idc), 8)
                .bits(0, 8)
                .bits(u64::from(self.level_idc), 8)
                .ue(0);
            if super::EXTENDED_PROFILES.contains(&self.profile_idc) {
                w.ue(self.chroma_format_idc);
                if self.chroma_format_idc == 3 {
                    w.flag(false);
                }
                w.ue(0).ue(0).flag(false).flag(self.scaling_matrix);
                if self.scaling_matrix {
                    let slots = if self.chroma_format_idc == 3 { 12 } else { 8 };
                    for slot in 0..slots {
                        // slot 0 carries an explicit list, the rest fall back
                        w.flag(slot == 0);
                        if slot == 0 {
                            w.se(-8);
                        }
                    }
                }
            }
            w.ue(0).ue(self.pic_order_cnt_type);
            match self.pic_order_cnt_type {
                0 => {
                    w.ue(2);
                }
                1 => {
                    w.flag(false).se(-1).se(3).ue(2).se(1).se(-2);
                }
                _ => {}
            }
            w.ue(1)
                .flag(false)
                .ue(self.width_mbs_minus1)
                .ue(self.height_map_units_minus1)
                .flag(self.frame_mbs_only);
            if !self.frame_mbs_only {
                w.flag(false);
            }
            w.flag(true);
            match self.crop {
                Some([left, right, top, bottom]) => {
                    w.flag(true).ue(left).ue(right).ue(top).ue(bottom);
                }
                None => {
                    w.flag(false);
                }
            }
            // vui_parameters_present_flag
            w.flag(false);
            w.finish()
        }
    }

    /// Inserts emulation prevention bytes the way an encoder would.
    pub(crate) fn escape(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 4);
        let mut zeros = 0usize;
        for &byte in payload {
            if zeros >= 2 && byte <= 3 {
                out.push(3);
                zeros = 0;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            out.push(byte);
        }
        out
    }
}
