//! Glue between a frame source, the two encoders and the outputs.
//!
//! ```text
//! RawFrame --> VideoEncoder --\                  /--> ContainerWriter
//!                              >--> Router ------<
//! RawFrame --> AudioEncoder --/                  \--> Packetizer --> PacketSink
//! ```

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

use crate::av::{EncodedSample, EncoderOutput, FormatDescription, MediaKind, MediaTime, RawFrame};
use crate::codec::aac::{AudioConverterFactory, AudioEncoder};
use crate::codec::h264::{CompressionSessionFactory, VideoEncoder};
use crate::config::Config;
use crate::error::{CapError, Result};
use crate::format::{AssetWriterFactory, ContainerWriter, PacketSink, Packetizer};

/// Fans encoder output out to the container writer and an optional packet sink.
pub struct Router {
    writer: ContainerWriter,
    packetizer: Packetizer,
    sink: Option<Arc<dyn PacketSink>>,
    formats: Mutex<HashMap<MediaKind, Arc<FormatDescription>>>,
    dropped: AtomicU64,
}

impl Router {
    pub fn new(writer: ContainerWriter, sink: Option<Arc<dyn PacketSink>>) -> Self {
        Self {
            writer,
            packetizer: Packetizer::new(),
            sink,
            formats: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Last format reported for `kind`.
    pub fn format(&self, kind: MediaKind) -> Option<Arc<FormatDescription>> {
        self.formats.lock().get(&kind).cloned()
    }

    /// Frames the encoders reported as dropped.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn declare_track(&self, kind: MediaKind, format: Arc<FormatDescription>) {
        match kind {
            MediaKind::Video => self.writer.add_video_track(format),
            MediaKind::Audio => self.writer.add_audio_track(format),
        }
    }
}

impl EncoderOutput for Router {
    fn format_changed(&self, kind: MediaKind, format: Arc<FormatDescription>) {
        log::info!("{} format: {:?}", kind, format);
        self.formats.lock().insert(kind, format.clone());
        self.declare_track(kind, format);
    }

    fn sample_encoded(&self, sample: EncodedSample) {
        if let Some(sink) = &self.sink {
            match self.packetizer.packetize(&sample) {
                Ok(packet) => {
                    if let Err(e) = sink.send_packet(packet) {
                        log::warn!("{} packet at {} not sent: {}", sample.kind, sample.pts, e);
                    }
                }
                Err(e) => log::warn!("cannot frame {} sample at {}: {}", sample.kind, sample.pts, e),
            }
        }
        self.writer.write_sample(sample);
    }

    fn sample_dropped(&self, kind: MediaKind, pts: MediaTime, error: CapError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        log::debug!("{} frame at {} dropped: {}", kind, pts, error);
    }
}

/// A complete capture chain: both encoders feeding one [`Router`].
pub struct Pipeline {
    video: VideoEncoder,
    audio: AudioEncoder,
    router: Arc<Router>,
    writer: ContainerWriter,
}

impl Pipeline {
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: &Config,
        sessions: Arc<dyn CompressionSessionFactory>,
        converters: Arc<dyn AudioConverterFactory>,
        assets: Arc<dyn AssetWriterFactory>,
        sink: Option<Arc<dyn PacketSink>>,
    ) -> Result<Self> {
        let writer = ContainerWriter::new(config.writer.clone(), assets);
        let router = Arc::new(Router::new(writer.clone(), sink));
        let video = VideoEncoder::new(config.video.clone(), sessions, router.clone())?;
        let audio = AudioEncoder::new(config.audio.clone(), converters, router.clone())?;
        Ok(Self {
            video,
            audio,
            router,
            writer,
        })
    }

    pub fn video_encoder(&self) -> &VideoEncoder {
        &self.video
    }

    pub fn audio_encoder(&self) -> &AudioEncoder {
        &self.audio
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn writer(&self) -> &ContainerWriter {
        &self.writer
    }

    /// Prepares both encoders. A video session that cannot be created is
    /// reported here; frames submitted anyway are dropped.
    pub fn start(&self) -> Result<()> {
        self.audio.start();
        self.video.start()
    }

    pub fn stop(&self) {
        self.video.stop();
        self.audio.stop();
    }

    /// Opens a new recording and declares the tracks for formats already known.
    pub fn start_recording(&self, url: Url) {
        self.writer.start(url);
        for kind in [MediaKind::Video, MediaKind::Audio] {
            if let Some(format) = self.router.format(kind) {
                self.router.declare_track(kind, format);
            }
        }
    }

    pub fn stop_recording(&self, on_complete: impl FnOnce(Result<Url>) + Send + 'static) {
        self.writer.stop(on_complete);
    }

    pub fn submit(&self, frame: RawFrame) {
        match frame.kind() {
            MediaKind::Video => self.video.encode(frame),
            MediaKind::Audio => self.audio.encode(frame),
        }
    }

    /// Feeds every frame from `frames`, then flushes the video encoder and
    /// waits until both encoders have delivered everything.
    pub async fn run<S>(&self, frames: S)
    where
        S: Stream<Item = RawFrame>,
    {
        let mut frames = std::pin::pin!(frames);
        let mut count = 0u64;
        while let Some(frame) = frames.next().await {
            self.submit(frame);
            count += 1;
        }
        self.video.flush();
        self.drained().await;
        log::debug!("frame source ended after {} frames", count);
    }

    /// Resolves once both encoders have delivered everything submitted so far.
    pub async fn drained(&self) {
        self.video.drained().await;
        self.audio.drained().await;
    }
}
