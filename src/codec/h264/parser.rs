use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

use super::types::{is_high_profile, NALUnit, NALUnitType, PPSInfo, SPSInfo};
use crate::error::{CapError, Result};
use crate::utils::BitReader;

#[derive(Debug, Default)]
struct ParserState {
    sps: Option<SPSInfo>,
    pps: Option<PPSInfo>,
}

/// Parameter set parser. Remembers the last SPS/PPS it saw.
#[derive(Debug)]
pub struct H264Parser {
    state: Arc<Mutex<ParserState>>,
    buffer: BytesMut,
}

impl H264Parser {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ParserState::default())),
            buffer: BytesMut::new(),
        }
    }

    /// Parses one NAL unit (no start code), updating the remembered SPS/PPS.
    pub fn parse_nalu(&mut self, data: &[u8]) -> Result<NALUnit> {
        let nalu = NALUnit::new(Bytes::copy_from_slice(data))?;

        match nalu.unit_type() {
            NALUnitType::SPS => {
                let sps = self.parse_sps(data)?;
                self.state.lock().sps = Some(sps);
            }
            NALUnitType::PPS => {
                let rbsp = self.remove_emulation_prevention(&data[1..]);
                let pps = parse_pps_rbsp(&rbsp)?;
                self.state.lock().pps = Some(pps);
            }
            _ => {}
        }

        Ok(nalu)
    }

    /// Strips `00 00 03` emulation prevention bytes.
    pub fn remove_emulation_prevention(&mut self, data: &[u8]) -> Bytes {
        self.buffer.clear();
        let mut zeros = 0;

        for &byte in data {
            if zeros >= 2 && byte == 0x03 {
                zeros = 0;
                continue;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            self.buffer.put_u8(byte);
        }

        self.buffer.split().freeze()
    }

    /// Parses a complete SPS NAL unit, header byte included.
    pub fn parse_sps(&mut self, nal: &[u8]) -> Result<SPSInfo> {
        if nal.len() < 4 || nal[0] & 0x1F != NALUnitType::SPS as u8 {
            return Err(CapError::Codec("not a sequence parameter set".into()));
        }
        let rbsp = self.remove_emulation_prevention(&nal[1..]);
        parse_sps_rbsp(&rbsp)
    }

    pub fn sps(&self) -> Option<SPSInfo> {
        self.state.lock().sps.clone()
    }

    pub fn pps(&self) -> Option<PPSInfo> {
        self.state.lock().pps.clone()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let state = self.state.lock();
        state.sps.as_ref().map(|sps| (sps.width, sps.height))
    }
}

impl Default for H264Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_sps_rbsp(data: &[u8]) -> Result<SPSInfo> {
    let mut reader = BitReader::new(data);

    let profile_idc = reader.read_bits(8)? as u8;
    let profile_compatibility = reader.read_bits(8)? as u8;
    let level_idc = reader.read_bits(8)? as u8;
    let seq_parameter_set_id = reader.read_golomb()?;

    let mut chroma_format_idc = 1;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    let mut separate_colour_plane = false;

    if is_high_profile(profile_idc) {
        chroma_format_idc = reader.read_golomb()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = reader.read_bit()?;
        }
        bit_depth_luma = 8 + reader.read_golomb()? as u8;
        bit_depth_chroma = 8 + reader.read_golomb()? as u8;
        reader.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag

        if reader.read_bit()? {
            let count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..count {
                if reader.read_bit()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.read_golomb()?; // log2_max_frame_num_minus4
    match reader.read_golomb()? {
        0 => {
            reader.read_golomb()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            reader.skip_bits(1)?;
            reader.read_signed_golomb()?;
            reader.read_signed_golomb()?;
            let cycle = reader.read_golomb()?;
            for _ in 0..cycle {
                reader.read_signed_golomb()?;
            }
        }
        _ => {}
    }

    reader.read_golomb()?; // max_num_ref_frames
    reader.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = reader.read_golomb()? + 1;
    let pic_height_in_map_units = reader.read_golomb()? + 1;
    let frame_mbs_only = reader.read_bit()?;
    if !frame_mbs_only {
        reader.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    reader.skip_bits(1)?; // direct_8x8_inference_flag

    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let mut width = pic_width_in_mbs * 16;
    let mut height = field_factor * pic_height_in_map_units * 16;

    if reader.read_bit()? {
        let left = reader.read_golomb()?;
        let right = reader.read_golomb()?;
        let top = reader.read_golomb()?;
        let bottom = reader.read_golomb()?;

        let (sub_width, sub_height) = match (chroma_format_idc, separate_colour_plane) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            _ => (1, 1),
        };
        let crop_x = sub_width * (left + right);
        let crop_y = sub_height * field_factor * (top + bottom);
        if crop_x >= width || crop_y >= height {
            return Err(CapError::Codec("SPS cropping exceeds picture size".into()));
        }
        width -= crop_x;
        height -= crop_y;
    }

    Ok(SPSInfo {
        profile_idc,
        profile_compatibility,
        level_idc,
        seq_parameter_set_id,
        chroma_format_idc,
        bit_depth_luma,
        bit_depth_chroma,
        width,
        height,
    })
}

fn parse_pps_rbsp(data: &[u8]) -> Result<PPSInfo> {
    let mut reader = BitReader::new(data);
    Ok(PPSInfo {
        pic_parameter_set_id: reader.read_golomb()?,
        seq_parameter_set_id: reader.read_golomb()?,
        entropy_coding_mode_flag: reader.read_bit()?,
    })
}

fn skip_scaling_list(reader: &mut BitReader, size: usize) -> Result<()> {
    let mut last_scale = 8;
    let mut next_scale = 8;

    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.read_signed_golomb()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::BitWriter;
    use pretty_assertions::assert_eq;

    /// Builds a progressive High profile SPS for `width`x`height`, cropping
    /// to non multiple-of-16 sizes.
    pub(crate) fn high_profile_sps(width: u32, height: u32) -> Vec<u8> {
        let mbs_w = (width + 15) / 16;
        let mbs_h = (height + 15) / 16;

        let mut w = BitWriter::new();
        w.write_bits(100, 8); // profile_idc
        w.write_bits(0, 8);
        w.write_bits(40, 8); // level 4.0
        w.write_golomb(0); // sps id
        w.write_golomb(1); // chroma 4:2:0
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_bit(false);
        w.write_bit(false); // no scaling matrix
        w.write_golomb(0); // log2_max_frame_num_minus4
        w.write_golomb(0); // poc type 0
        w.write_golomb(2);
        w.write_golomb(4); // max refs
        w.write_bit(false);
        w.write_golomb(mbs_w - 1);
        w.write_golomb(mbs_h - 1);
        w.write_bit(true); // frame_mbs_only
        w.write_bit(true); // direct_8x8
        let crop_right = (mbs_w * 16 - width) / 2;
        let crop_bottom = (mbs_h * 16 - height) / 2;
        if crop_right > 0 || crop_bottom > 0 {
            w.write_bit(true);
            w.write_golomb(0);
            w.write_golomb(crop_right);
            w.write_golomb(0);
            w.write_golomb(crop_bottom);
        } else {
            w.write_bit(false);
        }
        w.write_bit(false); // vui
        w.write_bit(true); // rbsp stop bit

        let mut nal = vec![0x67];
        nal.extend(w.into_bytes());
        nal
    }

    #[test]
    fn test_parse_high_profile_sps_with_cropping() {
        let mut parser = H264Parser::new();
        let sps = high_profile_sps(1920, 1080);
        let nalu = parser.parse_nalu(&sps).unwrap();
        assert_eq!(nalu.unit_type(), NALUnitType::SPS);

        let info = parser.sps().unwrap();
        assert_eq!(info.profile_idc, 100);
        assert_eq!(info.level_idc, 40);
        assert_eq!(info.chroma_format_idc, 1);
        assert_eq!(info.bit_depth_luma, 8);
        assert_eq!(parser.dimensions(), Some((1920, 1080)));
    }

    #[test]
    fn test_parse_baseline_sps() {
        let mut w = BitWriter::new();
        w.write_bits(66, 8);
        w.write_bits(0xC0, 8);
        w.write_bits(30, 8);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(1);
        w.write_bit(false);
        w.write_golomb(39); // 640 wide
        w.write_golomb(29); // 480 high
        w.write_bit(true);
        w.write_bit(true);
        w.write_bit(false);
        w.write_bit(false);
        w.write_bit(true);
        let mut nal = vec![0x67];
        nal.extend(w.into_bytes());

        let info = H264Parser::new().parse_sps(&nal).unwrap();
        assert_eq!(info.profile_idc, 66);
        assert_eq!(info.profile_compatibility, 0xC0);
        assert_eq!((info.width, info.height), (640, 480));
        assert!(!info.is_high_profile());
    }

    #[test]
    fn test_parse_pps() {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_bit(true);
        w.write_bit(true);
        let mut nal = vec![0x68];
        nal.extend(w.into_bytes());

        let mut parser = H264Parser::new();
        parser.parse_nalu(&nal).unwrap();
        assert!(parser.pps().unwrap().entropy_coding_mode_flag);
    }

    #[test]
    fn test_remove_emulation_prevention() {
        let mut parser = H264Parser::new();
        let out = parser.remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]);
        assert_eq!(&out[..], &[0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_rejects_non_sps() {
        let mut parser = H264Parser::new();
        assert!(parser.parse_sps(&[0x68, 0xCE, 0x3C, 0x80]).is_err());
        assert!(parser.parse_nalu(&[]).is_err());
    }
}
