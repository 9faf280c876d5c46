#![allow(dead_code)]

use avcap::av::{
    AudioBuffer, AudioFormat, EncodedSample, FormatDescription, ImageBuffer, MediaKind, MediaTime,
    PcmFormat, PixelFormat, RawFrame, VideoFormat,
};
use avcap::codec::aac::{AudioConverter, AudioConverterFactory, ConverterStatus, ProfileType};
use avcap::codec::h264::{to_avcc, CompressedFrame, CompressionSession, CompressionSessionFactory};
use avcap::config::VideoEncoderSettings;
use avcap::utils::BitWriter;
use avcap::{CapError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const PCM: PcmFormat = PcmFormat {
    sample_rate: 44_100,
    channels: 1,
    bits_per_sample: 16,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Progressive Main profile SPS NAL unit for a multiple-of-16 picture.
pub fn sps(width: u32, height: u32) -> Bytes {
    let mut w = BitWriter::new();
    w.write_bits(77, 8); // profile_idc
    w.write_bits(0x40, 8);
    w.write_bits(31, 8); // level 3.1
    w.write_golomb(0);
    w.write_golomb(0); // log2_max_frame_num_minus4
    w.write_golomb(0); // poc type 0
    w.write_golomb(2);
    w.write_golomb(2); // max refs
    w.write_bit(false);
    w.write_golomb(width / 16 - 1);
    w.write_golomb(height / 16 - 1);
    w.write_bit(true); // frame_mbs_only
    w.write_bit(true);
    w.write_bit(false); // no cropping
    w.write_bit(false); // no vui
    w.write_bit(true);

    let mut nal = vec![0x67];
    nal.extend(w.into_bytes());
    Bytes::from(nal)
}

pub fn pps() -> Bytes {
    Bytes::from_static(&[0x68, 0xEE, 0x3C, 0x80])
}

pub fn video_format(width: u32, height: u32) -> VideoFormat {
    VideoFormat::new(width, height, vec![sps(width, height), pps()])
}

pub fn audio_format() -> Arc<FormatDescription> {
    Arc::new(FormatDescription::Audio(AudioFormat {
        sample_rate: 44_100,
        channels: 1,
        profile: ProfileType::LC,
        frames_per_packet: 1024,
    }))
}

pub fn ms(value: i64) -> MediaTime {
    MediaTime::new(value, 1000)
}

pub fn video_frame(at_ms: i64) -> RawFrame {
    let image = ImageBuffer {
        width: 64,
        height: 64,
        pixel_format: PixelFormat::Nv12,
        planes: vec![Bytes::from(vec![0x10; 64 * 64]), Bytes::from(vec![0x80; 64 * 32])],
    };
    RawFrame::video(image, ms(at_ms), ms(33))
}

pub fn audio_frame(at_ms: i64) -> RawFrame {
    let buffer = AudioBuffer::new(PCM, vec![0u8; 2048]);
    RawFrame::audio(buffer, ms(at_ms), MediaTime::new(1024, 44_100))
}

/// An encoded video sample with one slice NAL unit carrying `tag`.
pub fn video_sample(at_ms: i64, key: bool, tag: u8) -> EncodedSample {
    let nal_type = if key { 0x65 } else { 0x41 };
    EncodedSample::new(
        MediaKind::Video,
        to_avcc([&[nal_type, tag][..]]),
        ms(at_ms),
        Arc::new(FormatDescription::Video(video_format(64, 64))),
    )
    .with_key_flag(key)
    .with_duration(ms(33))
}

pub fn audio_sample(at_ms: i64, tag: u8) -> EncodedSample {
    EncodedSample::new(MediaKind::Audio, vec![0x21, 0x10, tag], ms(at_ms), audio_format())
        .with_key_flag(true)
        .with_duration(MediaTime::new(1024, 44_100))
}

/// Compresses every frame into one slice, a key frame every `key_interval`.
pub struct FakeSessions {
    pub fail_setup: bool,
    pub key_interval: usize,
    pub created: AtomicUsize,
}

impl FakeSessions {
    pub fn new() -> Self {
        Self {
            fail_setup: false,
            key_interval: 30,
            created: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_setup: true,
            ..Self::new()
        }
    }
}

impl CompressionSessionFactory for FakeSessions {
    fn create(&self, settings: &VideoEncoderSettings) -> Result<Box<dyn CompressionSession>> {
        if self.fail_setup {
            return Err(CapError::Setup("no hardware encoder available".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            key_interval: self.key_interval.max(1),
            count: 0,
            format: video_format(64, 64),
            expected_fps: settings.expected_frame_rate,
        }))
    }
}

struct FakeSession {
    key_interval: usize,
    count: usize,
    format: VideoFormat,
    expected_fps: u32,
}

impl CompressionSession for FakeSession {
    fn encode_frame(&mut self, frame: &RawFrame) -> Result<Vec<CompressedFrame>> {
        let is_key = self.count % self.key_interval == 0;
        self.count += 1;
        let nal_type = if is_key { 0x65 } else { 0x41 };
        Ok(vec![CompressedFrame {
            data: to_avcc([&[nal_type, self.count as u8, self.expected_fps as u8][..]]),
            pts: frame.pts,
            dts: Some(frame.pts),
            duration: Some(frame.duration),
            is_key,
            format: self.format.clone(),
        }])
    }

    fn complete_frames(&mut self) -> Result<Vec<CompressedFrame>> {
        Ok(Vec::new())
    }

    fn invalidate(&mut self) {}
}

/// Emits one AAC packet per buffer of at least 1024 frames and reports
/// "input too small" for anything shorter.
pub struct FakeConverters {
    pub fail_setup: bool,
}

impl AudioConverterFactory for FakeConverters {
    fn create(&self, _input: &PcmFormat, _output: &AudioFormat) -> Result<Box<dyn AudioConverter>> {
        if self.fail_setup {
            return Err(CapError::Setup("converter unavailable".into()));
        }
        Ok(Box::new(FakeConverter { packets: 0 }))
    }
}

struct FakeConverter {
    packets: u8,
}

impl AudioConverter for FakeConverter {
    fn set_bitrate(&mut self, _bitrate: u32) -> Result<()> {
        Ok(())
    }

    fn fill_buffer(&mut self, input: &AudioBuffer, output: &mut BytesMut) -> ConverterStatus {
        if input.frame_count < 1024 {
            return ConverterStatus::INPUT_TOO_SMALL;
        }
        self.packets = self.packets.wrapping_add(1);
        output.put_slice(&[0x21, 0x10, self.packets]);
        ConverterStatus::OK
    }
}
