use bytes::Bytes;

use crate::av::AudioFormat;
use crate::error::{CapError, Result};
use crate::utils::{BitReader, BitWriter};

pub const ADTS_HEADER_LEN: usize = 7;

/// Largest value of the 13-bit ADTS frame length field.
pub const MAX_ADTS_FRAME_LEN: usize = 0x1FFF;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// AAC profile as carried in the 2-bit ADTS field (audio object type - 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileType {
    Main = 0,
    LC = 1,
    SSR = 2,
    LTP = 3,
}

impl ProfileType {
    /// MPEG-4 audio object type.
    pub fn object_type(&self) -> u8 {
        *self as u8 + 1
    }
}

impl From<u8> for ProfileType {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            0 => ProfileType::Main,
            2 => ProfileType::SSR,
            3 => ProfileType::LTP,
            _ => ProfileType::LC,
        }
    }
}

pub fn sample_rate_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == sample_rate).map(|i| i as u8)
}

pub fn sample_rate_from_index(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(index as usize).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AACConfig {
    pub profile: ProfileType,
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
    pub frame_length: u16,
}

impl Default for AACConfig {
    /// AAC-LC, 44.1 kHz, mono.
    fn default() -> Self {
        Self {
            profile: ProfileType::LC,
            sample_rate_index: 4,
            channel_configuration: 1,
            frame_length: 1024,
        }
    }
}

impl AACConfig {
    pub fn from_format(format: &AudioFormat) -> Result<Self> {
        let sample_rate_index = sample_rate_index(format.sample_rate).ok_or_else(|| {
            CapError::Codec(format!("sample rate {} has no ADTS index", format.sample_rate))
        })?;
        Ok(Self {
            profile: format.profile,
            sample_rate_index,
            channel_configuration: format.channels,
            frame_length: format.frames_per_packet as u16,
        })
    }

    pub fn sample_rate(&self) -> Option<u32> {
        sample_rate_from_index(self.sample_rate_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ADTSHeader {
    pub sync_word: u32,             // 12 bits
    pub id: u8,                     // 1 bit, 0=MPEG-4, 1=MPEG-2
    pub layer: u8,                  // 2 bits
    pub protection_absent: bool,    // 1 bit
    pub profile: ProfileType,       // 2 bits
    pub sample_rate_index: u8,      // 4 bits
    pub private_bit: bool,          // 1 bit
    pub channel_configuration: u8,  // 3 bits
    pub original_copy: bool,        // 1 bit
    pub home: bool,                 // 1 bit
    pub copyright_id_bit: bool,     // 1 bit
    pub copyright_id_start: bool,   // 1 bit
    pub frame_length: u16,          // 13 bits, header included
    pub buffer_fullness: u16,       // 11 bits
    pub number_of_raw_blocks: u8,   // 2 bits
}

impl ADTSHeader {
    /// Header for one raw frame of `payload_len` bytes without CRC.
    pub fn for_payload(config: &AACConfig, payload_len: usize) -> Result<Self> {
        let frame_length = payload_len + ADTS_HEADER_LEN;
        if frame_length > MAX_ADTS_FRAME_LEN {
            return Err(CapError::Codec(format!(
                "AAC payload of {} bytes exceeds the ADTS frame length field",
                payload_len
            )));
        }
        Ok(Self {
            sync_word: 0xFFF,
            id: 1,
            layer: 0,
            protection_absent: true,
            profile: config.profile,
            sample_rate_index: config.sample_rate_index,
            private_bit: false,
            channel_configuration: config.channel_configuration,
            original_copy: false,
            home: false,
            copyright_id_bit: false,
            copyright_id_start: false,
            frame_length: frame_length as u16,
            buffer_fullness: 0x7FF,
            number_of_raw_blocks: 0,
        })
    }

    pub fn sync_word_valid(&self) -> bool {
        self.sync_word == 0xFFF
    }

    pub fn sample_rate(&self) -> Option<u32> {
        sample_rate_from_index(self.sample_rate_index)
    }

    pub fn payload_len(&self) -> usize {
        (self.frame_length as usize).saturating_sub(ADTS_HEADER_LEN)
    }

    pub fn to_bytes(&self) -> Result<[u8; ADTS_HEADER_LEN]> {
        if self.frame_length as usize > MAX_ADTS_FRAME_LEN || self.sample_rate_index > 15 {
            return Err(CapError::Codec("ADTS header field out of range".into()));
        }

        let mut w = BitWriter::with_capacity(ADTS_HEADER_LEN);
        w.write_bits(self.sync_word, 12);
        w.write_bits(self.id as u32, 1);
        w.write_bits(self.layer as u32, 2);
        w.write_bit(self.protection_absent);
        w.write_bits(self.profile as u32, 2);
        w.write_bits(self.sample_rate_index as u32, 4);
        w.write_bit(self.private_bit);
        w.write_bits(self.channel_configuration as u32, 3);
        w.write_bit(self.original_copy);
        w.write_bit(self.home);
        w.write_bit(self.copyright_id_bit);
        w.write_bit(self.copyright_id_start);
        w.write_bits(self.frame_length as u32, 13);
        w.write_bits(self.buffer_fullness as u32, 11);
        w.write_bits(self.number_of_raw_blocks as u32, 2);

        let mut out = [0u8; ADTS_HEADER_LEN];
        out.copy_from_slice(&w.into_bytes());
        Ok(out)
    }
}

/// The two-byte MPEG-4 AudioSpecificConfig stored in MP4 `esds` boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn from_config(config: &AACConfig) -> Self {
        Self {
            object_type: config.profile.object_type(),
            sample_rate_index: config.sample_rate_index,
            channel_configuration: config.channel_configuration,
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        let mut w = BitWriter::with_capacity(2);
        w.write_bits(self.object_type as u32, 5);
        w.write_bits(self.sample_rate_index as u32, 4);
        w.write_bits(self.channel_configuration as u32, 4);
        w.write_bits(0, 3); // 1024-sample frames, no core coder, no extension
        let bytes = w.into_bytes();
        [bytes[0], bytes[1]]
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(data);
        Ok(Self {
            object_type: r.read_bits(5)? as u8,
            sample_rate_index: r.read_bits(4)? as u8,
            channel_configuration: r.read_bits(4)? as u8,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AACFrame {
    pub config: AACConfig,
    pub data: Bytes,
}

impl AACFrame {
    pub fn new(config: AACConfig, data: impl Into<Bytes>) -> Self {
        Self {
            config,
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_bytes_match_reference_layout() {
        let config = AACConfig::default();
        let header = ADTSHeader::for_payload(&config, 100).unwrap();
        let bytes = header.to_bytes().unwrap();

        let profile = 2u32; // object type
        let freq = 4u32;
        let chan = 1u32;
        let len = 107u32;
        let expected = [
            0xFF,
            0xF9,
            (((profile - 1) << 6) | (freq << 2) | (chan >> 2)) as u8,
            (((chan & 3) << 6) | (len >> 11)) as u8,
            ((len & 0x7FF) >> 3) as u8,
            (((len & 7) << 5) | 0x1F) as u8,
            0xFC,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let config = AACConfig::default();
        assert!(ADTSHeader::for_payload(&config, MAX_ADTS_FRAME_LEN - ADTS_HEADER_LEN).is_ok());
        assert!(ADTSHeader::for_payload(&config, MAX_ADTS_FRAME_LEN - ADTS_HEADER_LEN + 1).is_err());
    }

    #[test]
    fn test_audio_specific_config() {
        let asc = AudioSpecificConfig::from_config(&AACConfig::default());
        // LC, 44.1 kHz, mono
        assert_eq!(asc.to_bytes(), [0x12, 0x08]);
        assert_eq!(AudioSpecificConfig::parse(&[0x12, 0x08]).unwrap(), asc);
    }

    #[test]
    fn test_sample_rate_index() {
        assert_eq!(sample_rate_index(44_100), Some(4));
        assert_eq!(sample_rate_index(48_000), Some(3));
        assert_eq!(sample_rate_index(44_000), None);
        assert_eq!(sample_rate_from_index(11), Some(8_000));
        assert_eq!(sample_rate_from_index(13), None);
    }
}
