use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::types::ProfileType;
use crate::av::{
    AudioBuffer, AudioFormat, EncodedSample, EncoderOutput, EncoderState, FormatDescription,
    MediaKind, MediaTime, PcmFormat, RawFrame,
};
use crate::config::AudioEncoderSettings;
use crate::error::{CapError, Result};
use crate::utils::SerialQueue;

/// Status code returned by a converter fill pass.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConverterStatus(pub i32);

impl ConverterStatus {
    pub const OK: ConverterStatus = ConverterStatus(0);
    /// `'insz'`: not enough input buffered to produce a packet yet.
    pub const INPUT_TOO_SMALL: ConverterStatus = ConverterStatus(0x696E_737A);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }
}

impl fmt::Debug for ConverterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "ConverterStatus('{}')", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "ConverterStatus({})", self.0)
        }
    }
}

/// A PCM to AAC converter.
pub trait AudioConverter: Send {
    fn set_bitrate(&mut self, bitrate: u32) -> Result<()>;

    /// Runs one conversion pass, appending at most one AAC packet to `output`.
    fn fill_buffer(&mut self, input: &AudioBuffer, output: &mut BytesMut) -> ConverterStatus;
}

pub trait AudioConverterFactory: Send + Sync {
    fn create(&self, input: &PcmFormat, output: &AudioFormat) -> Result<Box<dyn AudioConverter>>;
}

struct Inner {
    state: EncoderState,
    converter: Option<Box<dyn AudioConverter>>,
    format: Option<Arc<FormatDescription>>,
    format_announced: bool,
    epoch: u64,
}

impl Inner {
    fn setup_converter(
        &mut self,
        input: &PcmFormat,
        settings: &AudioEncoderSettings,
        factory: &dyn AudioConverterFactory,
    ) -> Result<()> {
        if self.converter.is_some() {
            log::warn!("audio converter already created");
            return Ok(());
        }

        let output = output_format(settings);
        let mut converter = match factory.create(input, &output) {
            Ok(converter) => converter,
            Err(e) => {
                log::error!("failed to create audio converter: {}", e);
                self.state = EncoderState::Stopped;
                return Err(match e {
                    CapError::Setup(_) => e,
                    other => CapError::Setup(other.to_string()),
                });
            }
        };

        if let Err(e) = converter.set_bitrate(settings.bitrate) {
            log::warn!("could not set AAC bitrate to {}: {}", settings.bitrate, e);
        }

        log::info!(
            "audio converter ready: {} Hz x{} PCM -> {} Hz x{} AAC",
            input.sample_rate,
            input.channels,
            output.sample_rate,
            output.channels
        );
        self.converter = Some(converter);
        self.format = Some(Arc::new(FormatDescription::Audio(output)));
        self.format_announced = false;
        if self.state == EncoderState::Uninitialized {
            self.state = EncoderState::Ready;
        }
        Ok(())
    }
}

fn output_format(settings: &AudioEncoderSettings) -> AudioFormat {
    AudioFormat {
        sample_rate: settings.sample_rate,
        channels: settings.channels,
        profile: ProfileType::LC,
        frames_per_packet: settings.frames_per_packet,
    }
}

enum Emit {
    Format(Arc<FormatDescription>),
    Sample(EncodedSample),
    Dropped(MediaTime, CapError),
}

/// AAC encoder around an [`AudioConverter`], running on its own serial queue.
pub struct AudioEncoder {
    settings: Arc<AudioEncoderSettings>,
    factory: Arc<dyn AudioConverterFactory>,
    output: Arc<dyn EncoderOutput>,
    inner: Arc<Mutex<Inner>>,
    queue: SerialQueue,
}

impl AudioEncoder {
    pub fn new(
        settings: AudioEncoderSettings,
        factory: Arc<dyn AudioConverterFactory>,
        output: Arc<dyn EncoderOutput>,
    ) -> Result<Self> {
        Ok(Self {
            settings: Arc::new(settings),
            factory,
            output,
            inner: Arc::new(Mutex::new(Inner {
                state: EncoderState::Uninitialized,
                converter: None,
                format: None,
                format_announced: false,
                epoch: 0,
            })),
            queue: SerialQueue::new("avcap-audio-encoder")?,
        })
    }

    pub fn state(&self) -> EncoderState {
        self.inner.lock().state
    }

    /// The AAC format produced, once the converter exists.
    pub fn format(&self) -> Option<Arc<FormatDescription>> {
        self.inner.lock().format.clone()
    }

    /// Re-arms a stopped encoder. The converter itself is built from the
    /// first buffer's format.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.state == EncoderState::Stopped {
            inner.state = EncoderState::Uninitialized;
        }
    }

    /// Builds the converter for `input`. Calling it again is a no-op.
    pub fn setup_converter(&self, input: &PcmFormat) -> Result<()> {
        self.inner
            .lock()
            .setup_converter(input, &self.settings, self.factory.as_ref())
    }

    /// Submits one PCM buffer for conversion.
    pub fn encode(&self, frame: RawFrame) {
        let epoch = self.inner.lock().epoch;
        let pts = frame.pts;
        let inner = self.inner.clone();
        let factory = self.factory.clone();
        let settings = self.settings.clone();
        let output = self.output.clone();

        let submitted = self.queue.dispatch(move || {
            let mut events = Vec::new();
            {
                let mut inner = inner.lock();
                if let Err(e) = encode_locked(&mut inner, epoch, &frame, &settings, factory.as_ref(), &mut events) {
                    events.push(Emit::Dropped(frame.pts, e));
                }
            }
            for event in events {
                match event {
                    Emit::Format(format) => output.format_changed(MediaKind::Audio, format),
                    Emit::Sample(sample) => output.sample_encoded(sample),
                    Emit::Dropped(pts, error) => {
                        log::warn!("audio buffer at {} dropped: {}", pts, error);
                        output.sample_dropped(MediaKind::Audio, pts, error)
                    }
                }
            }
        });

        if !submitted {
            self.output.sample_dropped(
                MediaKind::Audio,
                pts,
                CapError::InvalidState("audio encoder queue closed".into()),
            );
        }
    }

    /// Disposes the converter and forgets the announced format.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.converter.take().is_some() {
            log::info!("audio converter disposed");
        }
        inner.format = None;
        inner.format_announced = false;
        inner.state = EncoderState::Stopped;
        inner.epoch += 1;
    }

    pub async fn drained(&self) {
        self.queue.drained().await
    }
}

fn encode_locked(
    inner: &mut Inner,
    epoch: u64,
    frame: &RawFrame,
    settings: &AudioEncoderSettings,
    factory: &dyn AudioConverterFactory,
    events: &mut Vec<Emit>,
) -> Result<()> {
    if inner.epoch != epoch {
        return Err(CapError::InvalidState("converter stopped before the buffer was encoded".into()));
    }
    if inner.state == EncoderState::Stopped {
        return Err(CapError::InvalidState("audio encoder is stopped".into()));
    }
    let buffer = frame
        .audio_buffer()
        .ok_or_else(|| CapError::InvalidData("audio encoder received a video frame".into()))?;

    if inner.converter.is_none() {
        inner.setup_converter(&buffer.format, settings, factory)?;
    }

    let mut packet = BytesMut::with_capacity(buffer.data.len().max(1536));
    let status = match inner.converter.as_mut() {
        Some(converter) => converter.fill_buffer(buffer, &mut packet),
        None => return Err(CapError::InvalidState("no audio converter".into())),
    };

    if status == ConverterStatus::INPUT_TOO_SMALL || (status.is_ok() && packet.is_empty()) {
        log::debug!("converter produced no output for buffer at {}", frame.pts);
        return Ok(());
    }
    if !status.is_ok() {
        return Err(CapError::Converter { status: status.0 });
    }

    let Some(format) = inner.format.clone() else {
        return Err(CapError::InvalidState("audio format unknown".into()));
    };
    if !inner.format_announced {
        inner.format_announced = true;
        events.push(Emit::Format(format.clone()));
    }
    inner.state = EncoderState::Encoding;

    let duration = MediaTime::new(settings.frames_per_packet as i64, settings.sample_rate);
    events.push(Emit::Sample(
        EncodedSample::new(MediaKind::Audio, packet.freeze(), frame.pts, format)
            .with_key_flag(true)
            .with_duration(duration),
    ));
    Ok(())
}
