use bytes::Bytes;

use crate::error::{CapError, Result};

/// One NAL unit without start code or length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NALUnit {
    pub nal_type: u8,
    pub nal_ref_idc: u8,
    pub data: Bytes,
}

impl NALUnit {
    pub fn new(data: Bytes) -> Result<Self> {
        let Some(&header) = data.first() else {
            return Err(CapError::InvalidData("empty NAL unit".into()));
        };
        Ok(Self {
            nal_type: header & 0x1F,
            nal_ref_idc: (header >> 5) & 0x03,
            data,
        })
    }

    pub fn unit_type(&self) -> NALUnitType {
        NALUnitType::from(self.nal_type)
    }
}

/// Fields of a sequence parameter set needed to describe the stream in a
/// container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SPSInfo {
    pub profile_idc: u8,
    /// constraint_set flags and reserved bits, as stored in `avcC`.
    pub profile_compatibility: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub width: u32,
    pub height: u32,
}

impl SPSInfo {
    /// Profiles that carry chroma format and bit depth syntax.
    pub fn is_high_profile(&self) -> bool {
        is_high_profile(self.profile_idc)
    }
}

pub(crate) fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}

/// Profiles whose `avcC` record ends with chroma format and bit depth
/// bytes (ISO/IEC 14496-15, 5.3.3.1.2).
pub(crate) fn has_avcc_extension(profile_idc: u8) -> bool {
    matches!(profile_idc, 100 | 110 | 122 | 144)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PPSInfo {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    Unspecified = 0,
    CodedSliceNonIDR = 1,
    CodedSliceDataPartitionA = 2,
    CodedSliceDataPartitionB = 3,
    CodedSliceDataPartitionC = 4,
    CodedSliceIDR = 5,
    SEI = 6,
    SPS = 7,
    PPS = 8,
    AccessUnitDelimiter = 9,
    EndOfSequence = 10,
    EndOfStream = 11,
    FillerData = 12,
}

impl From<u8> for NALUnitType {
    fn from(value: u8) -> Self {
        match value & 0x1F {
            1 => NALUnitType::CodedSliceNonIDR,
            2 => NALUnitType::CodedSliceDataPartitionA,
            3 => NALUnitType::CodedSliceDataPartitionB,
            4 => NALUnitType::CodedSliceDataPartitionC,
            5 => NALUnitType::CodedSliceIDR,
            6 => NALUnitType::SEI,
            7 => NALUnitType::SPS,
            8 => NALUnitType::PPS,
            9 => NALUnitType::AccessUnitDelimiter,
            10 => NALUnitType::EndOfSequence,
            11 => NALUnitType::EndOfStream,
            12 => NALUnitType::FillerData,
            _ => NALUnitType::Unspecified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avcc_extension_profiles_are_a_subset() {
        for profile in [100, 110, 122, 144] {
            assert!(has_avcc_extension(profile));
        }
        for profile in [66, 77, 88] {
            assert!(!has_avcc_extension(profile));
            assert!(!is_high_profile(profile));
        }
        // CAVLC 4:4:4 Intra parses chroma syntax but gets no avcC extension
        assert!(is_high_profile(44));
        assert!(!has_avcc_extension(44));
    }
}
