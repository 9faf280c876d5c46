use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::av::{
    EncodedSample, EncoderOutput, EncoderState, FormatDescription, MediaKind, MediaTime, RawFrame,
    VideoFormat,
};
use crate::config::VideoEncoderSettings;
use crate::error::{CapError, Result};
use crate::utils::SerialQueue;

/// One access unit as returned by a compression session.
#[derive(Debug, Clone)]
pub struct CompressedFrame {
    /// 4-byte length prefixed NAL units.
    pub data: Bytes,
    pub pts: MediaTime,
    pub dts: Option<MediaTime>,
    pub duration: Option<MediaTime>,
    pub is_key: bool,
    pub format: VideoFormat,
}

/// A hardware H.264 compression session.
///
/// Sessions may hold frames back for reordering, so one call can return
/// zero, one or several frames. Frames come back in decode order.
pub trait CompressionSession: Send {
    fn encode_frame(&mut self, frame: &RawFrame) -> Result<Vec<CompressedFrame>>;

    /// Forces out every frame still held by the session.
    fn complete_frames(&mut self) -> Result<Vec<CompressedFrame>>;

    fn invalidate(&mut self);
}

pub trait CompressionSessionFactory: Send + Sync {
    fn create(&self, settings: &VideoEncoderSettings) -> Result<Box<dyn CompressionSession>>;
}

struct Inner {
    state: EncoderState,
    session: Option<Box<dyn CompressionSession>>,
    last_format: Option<Arc<FormatDescription>>,
    epoch: u64,
}

enum Emit {
    Format(Arc<FormatDescription>),
    Sample(EncodedSample),
    Dropped(MediaTime, CapError),
}

impl Inner {
    fn ensure_session(
        &mut self,
        factory: &dyn CompressionSessionFactory,
        settings: &VideoEncoderSettings,
    ) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        match factory.create(settings) {
            Ok(session) => {
                log::info!(
                    "compression session ready: {}x{} @ {} fps, key frame every {} frames",
                    settings.width,
                    settings.height,
                    settings.expected_frame_rate,
                    settings.max_key_frame_interval_frames()
                );
                self.session = Some(session);
                self.state = EncoderState::Ready;
                Ok(())
            }
            Err(e) => {
                log::error!("failed to create compression session: {}", e);
                self.state = EncoderState::Stopped;
                Err(match e {
                    CapError::Setup(_) => e,
                    other => CapError::Setup(other.to_string()),
                })
            }
        }
    }

    fn deliver(&mut self, frames: Vec<CompressedFrame>, events: &mut Vec<Emit>) {
        for frame in frames {
            if frame.data.is_empty() {
                events.push(Emit::Dropped(
                    frame.pts,
                    CapError::Encode("session returned an empty frame".into()),
                ));
                continue;
            }

            let format = FormatDescription::Video(frame.format);
            let format = match &self.last_format {
                Some(last) if **last == format => last.clone(),
                _ => {
                    let format = Arc::new(format);
                    log::debug!("video format changed: {:?}", format);
                    self.last_format = Some(format.clone());
                    events.push(Emit::Format(format.clone()));
                    format
                }
            };

            let mut sample = EncodedSample::new(MediaKind::Video, frame.data, frame.pts, format)
                .with_key_flag(frame.is_key);
            sample.dts = frame.dts;
            sample.duration = frame.duration;
            events.push(Emit::Sample(sample));
        }
    }
}

fn emit(output: &dyn EncoderOutput, events: Vec<Emit>) {
    for event in events {
        match event {
            Emit::Format(format) => output.format_changed(MediaKind::Video, format),
            Emit::Sample(sample) => output.sample_encoded(sample),
            Emit::Dropped(pts, error) => {
                log::warn!("video frame at {} dropped: {}", pts, error);
                output.sample_dropped(MediaKind::Video, pts, error)
            }
        }
    }
}

/// H.264 encoder driving one [`CompressionSession`] on a private serial queue.
///
/// Every call returns immediately; results arrive through the
/// [`EncoderOutput`] in submission order.
pub struct VideoEncoder {
    settings: Arc<VideoEncoderSettings>,
    factory: Arc<dyn CompressionSessionFactory>,
    output: Arc<dyn EncoderOutput>,
    inner: Arc<Mutex<Inner>>,
    queue: SerialQueue,
}

impl VideoEncoder {
    pub fn new(
        settings: VideoEncoderSettings,
        factory: Arc<dyn CompressionSessionFactory>,
        output: Arc<dyn EncoderOutput>,
    ) -> Result<Self> {
        Ok(Self {
            settings: Arc::new(settings),
            factory,
            output,
            inner: Arc::new(Mutex::new(Inner {
                state: EncoderState::Uninitialized,
                session: None,
                last_format: None,
                epoch: 0,
            })),
            queue: SerialQueue::new("avcap-video-encoder")?,
        })
    }

    pub fn settings(&self) -> &VideoEncoderSettings {
        &self.settings
    }

    pub fn state(&self) -> EncoderState {
        self.inner.lock().state
    }

    /// Prepares the compression session. Does nothing if one already exists.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.session.is_some() {
            log::debug!("compression session already prepared");
            return Ok(());
        }
        inner.ensure_session(self.factory.as_ref(), &self.settings)
    }

    /// Submits `frame` for compression.
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
                if let Err(e) = encode_locked(&mut inner, epoch, &frame, factory.as_ref(), &settings, &mut events) {
                    events.push(Emit::Dropped(frame.pts, e));
                }
            }
            emit(output.as_ref(), events);
        });

        if !submitted {
            self.output.sample_dropped(
                MediaKind::Video,
                pts,
                CapError::InvalidState("video encoder queue closed".into()),
            );
        }
    }

    /// Emits every frame the session is still holding for reordering.
    pub fn flush(&self) {
        let epoch = self.inner.lock().epoch;
        let inner = self.inner.clone();
        let output = self.output.clone();

        self.queue.dispatch(move || {
            let mut events = Vec::new();
            {
                let mut inner = inner.lock();
                if inner.epoch != epoch {
                    return;
                }
                let Some(session) = inner.session.as_mut() else {
                    return;
                };
                match session.complete_frames() {
                    Ok(frames) => inner.deliver(frames, &mut events),
                    Err(e) => log::warn!("failed to complete pending frames: {}", e),
                }
            }
            emit(output.as_ref(), events);
        });
    }

    /// Invalidates the session. Frames not yet encoded are reported dropped
    /// and later frames fail until the next [`start`](Self::start).
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(mut session) = inner.session.take() {
            session.invalidate();
            log::info!("compression session invalidated");
        }
        inner.state = EncoderState::Stopped;
        inner.last_format = None;
        inner.epoch += 1;
    }

    /// Resolves once everything submitted so far has been delivered.
    pub async fn drained(&self) {
        self.queue.drained().await
    }
}

fn encode_locked(
    inner: &mut Inner,
    epoch: u64,
    frame: &RawFrame,
    factory: &dyn CompressionSessionFactory,
    settings: &VideoEncoderSettings,
    events: &mut Vec<Emit>,
) -> Result<()> {
    if inner.epoch != epoch {
        return Err(CapError::InvalidState("session stopped before the frame was encoded".into()));
    }
    match inner.state {
        EncoderState::Stopped => {
            return Err(CapError::InvalidState("video encoder is stopped".into()));
        }
        EncoderState::Uninitialized => inner.ensure_session(factory, settings)?,
        EncoderState::Ready | EncoderState::Encoding => {}
    }
    if frame.image().is_none() {
        return Err(CapError::InvalidData("video encoder received an audio frame".into()));
    }

    let session = inner
        .session
        .as_mut()
        .ok_or_else(|| CapError::InvalidState("no compression session".into()))?;
    let frames = session
        .encode_frame(frame)
        .map_err(|e| CapError::Encode(e.to_string()))?;

    inner.state = EncoderState::Encoding;
    inner.deliver(frames, events);
    Ok(())
}
