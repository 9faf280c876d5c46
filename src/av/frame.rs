use bytes::Bytes;

use super::{MediaKind, MediaTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Bi-planar 4:2:0, luma plane followed by interleaved chroma.
    Nv12,
    /// Planar 4:2:0.
    I420,
    Bgra,
}

/// Uncompressed picture as handed over by the frame source.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub planes: Vec<Bytes>,
}

/// Interleaved PCM layout of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub format: PcmFormat,
    pub data: Bytes,
    pub frame_count: u32,
}

impl AudioBuffer {
    /// Builds a buffer and derives the frame count from the payload size.
    pub fn new(format: PcmFormat, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let frame_count = match format.bytes_per_frame() {
            0 => 0,
            n => (data.len() / n) as u32,
        };
        Self {
            format,
            data,
            frame_count,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RawFrameData {
    Video(ImageBuffer),
    Audio(AudioBuffer),
}

/// One raw capture unit. Consumed exactly once by the matching encoder.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: RawFrameData,
    pub pts: MediaTime,
    pub duration: MediaTime,
}

impl RawFrame {
    pub fn video(image: ImageBuffer, pts: MediaTime, duration: MediaTime) -> Self {
        Self {
            data: RawFrameData::Video(image),
            pts,
            duration,
        }
    }

    pub fn audio(buffer: AudioBuffer, pts: MediaTime, duration: MediaTime) -> Self {
        Self {
            data: RawFrameData::Audio(buffer),
            pts,
            duration,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.data {
            RawFrameData::Video(_) => MediaKind::Video,
            RawFrameData::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn image(&self) -> Option<&ImageBuffer> {
        match &self.data {
            RawFrameData::Video(image) => Some(image),
            RawFrameData::Audio(_) => None,
        }
    }

    pub fn audio_buffer(&self) -> Option<&AudioBuffer> {
        match &self.data {
            RawFrameData::Audio(buffer) => Some(buffer),
            RawFrameData::Video(_) => None,
        }
    }
}
