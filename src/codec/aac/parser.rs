use bytes::Bytes;

use super::types::{AACConfig, AACFrame, ADTSHeader, ProfileType, ADTS_HEADER_LEN};
use crate::error::{CapError, Result};
use crate::utils::BitReader;

/// ADTS reader. Remembers the configuration of the last header it parsed so
/// headerless frames can still be attributed.
#[derive(Debug, Default)]
pub struct AACParser {
    config: Option<AACConfig>,
}

impl AACParser {
    pub fn new() -> Self {
        Self { config: None }
    }

    /// Parses one frame, ADTS framed or raw.
    pub fn parse_frame(&mut self, data: &[u8]) -> Result<AACFrame> {
        if data.len() >= ADTS_HEADER_LEN {
            if let Ok(header) = self.parse_adts_header(data) {
                let end = (header.frame_length as usize).clamp(ADTS_HEADER_LEN, data.len());
                let config = config_of(&header);
                self.config = Some(config.clone());
                return Ok(AACFrame::new(config, Bytes::copy_from_slice(&data[ADTS_HEADER_LEN..end])));
            }
        }

        match &self.config {
            Some(config) => Ok(AACFrame::new(config.clone(), Bytes::copy_from_slice(data))),
            None => Err(CapError::Codec(
                "no AAC configuration available and data is not ADTS framed".into(),
            )),
        }
    }

    /// Splits a run of back to back ADTS frames.
    pub fn parse_stream(&mut self, data: &[u8]) -> Result<Vec<AACFrame>> {
        let mut frames = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let header = self.parse_adts_header(&data[offset..])?;
            let frame_len = header.frame_length as usize;
            if frame_len < ADTS_HEADER_LEN || offset + frame_len > data.len() {
                return Err(CapError::Codec(format!(
                    "truncated ADTS frame at offset {}",
                    offset
                )));
            }
            let config = config_of(&header);
            self.config = Some(config.clone());
            frames.push(AACFrame::new(
                config,
                Bytes::copy_from_slice(&data[offset + ADTS_HEADER_LEN..offset + frame_len]),
            ));
            offset += frame_len;
        }

        Ok(frames)
    }

    pub fn parse_adts_header(&mut self, data: &[u8]) -> Result<ADTSHeader> {
        if data.len() < ADTS_HEADER_LEN {
            return Err(CapError::Codec("ADTS header too short".into()));
        }

        let mut reader = BitReader::new(&data[..ADTS_HEADER_LEN]);

        let sync_word = reader.read_bits(12)?;
        if sync_word != 0xFFF {
            return Err(CapError::Codec("invalid ADTS sync word".into()));
        }

        Ok(ADTSHeader {
            sync_word,
            id: reader.read_bits(1)? as u8,
            layer: reader.read_bits(2)? as u8,
            protection_absent: reader.read_bit()?,
            profile: ProfileType::from(reader.read_bits(2)? as u8),
            sample_rate_index: reader.read_bits(4)? as u8,
            private_bit: reader.read_bit()?,
            channel_configuration: reader.read_bits(3)? as u8,
            original_copy: reader.read_bit()?,
            home: reader.read_bit()?,
            copyright_id_bit: reader.read_bit()?,
            copyright_id_start: reader.read_bit()?,
            frame_length: reader.read_bits(13)? as u16,
            buffer_fullness: reader.read_bits(11)? as u16,
            number_of_raw_blocks: reader.read_bits(2)? as u8,
        })
    }

    pub fn set_config(&mut self, config: AACConfig) {
        self.config = Some(config);
    }

    pub fn config(&self) -> Option<&AACConfig> {
        self.config.as_ref()
    }
}

fn config_of(header: &ADTSHeader) -> AACConfig {
    AACConfig {
        profile: header.profile,
        sample_rate_index: header.sample_rate_index,
        channel_configuration: header.channel_configuration,
        frame_length: 1024,
    }
}
