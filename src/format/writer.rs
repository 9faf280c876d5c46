//! The recording state machine.
//!
//! ```text
//! Idle --start--> TrackConfiguring --first video--> Started --write--> Writing
//!                                                   --stop--> Finishing --done--> Closed
//! ```
//!
//! Both encoders deliver into the same [`ContainerWriter`] from their own
//! threads. The handle only enqueues commands; a single task owns the
//! session and applies them in arrival order, so track setup, the session
//! anchor and sample writes never race.

use futures::future::OptionFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use url::Url;

use crate::av::{EncodedSample, FormatDescription, MediaKind, MediaTime};
use crate::config::WriterSettings;
use crate::error::{CapError, Result};
use crate::format::{AssetStatus, AssetWriter, AssetWriterFactory};

/// Called once finalization of a stopped session has completed.
pub type CompletionHandler = Box<dyn FnOnce(Result<Url>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    TrackConfiguring,
    Started,
    Writing,
    Finishing,
    Closed,
}

impl WriterState {
    /// Between `start` and `stop`.
    pub fn is_recording(self) -> bool {
        matches!(
            self,
            WriterState::TrackConfiguring | WriterState::Started | WriterState::Writing
        )
    }
}

/// Point-in-time view of the writer, taken in command order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSnapshot {
    pub state: WriterState,
    /// Presentation time of the first accepted video sample.
    pub session_start: Option<MediaTime>,
    pub video_samples: u64,
    pub audio_samples: u64,
    pub dropped_samples: u64,
    /// The current output is unusable and must be discarded.
    pub failed: bool,
}

enum Command {
    Start(Url),
    AddTrack(MediaKind, Arc<FormatDescription>),
    Write(EncodedSample),
    Stop(CompletionHandler),
    Snapshot(oneshot::Sender<WriterSnapshot>),
}

/// Cloneable handle to the writer task.
///
/// Every method returns immediately. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct ContainerWriter {
    commands: UnboundedSender<Command>,
}

impl ContainerWriter {
    pub fn new(settings: WriterSettings, factory: Arc<dyn AssetWriterFactory>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(WriterTask::new(settings, factory).run(rx));
        Self { commands }
    }

    /// Opens a new output at `url`. Ignored unless the writer is idle or closed.
    pub fn start(&self, url: Url) {
        self.send(Command::Start(url));
    }

    pub fn add_video_track(&self, hint: Arc<FormatDescription>) {
        self.send(Command::AddTrack(MediaKind::Video, hint));
    }

    /// Has no effect when audio is muted.
    pub fn add_audio_track(&self, hint: Arc<FormatDescription>) {
        self.send(Command::AddTrack(MediaKind::Audio, hint));
    }

    pub fn write_sample(&self, sample: EncodedSample) {
        self.send(Command::Write(sample));
    }

    /// Finishes the current output. `on_complete` runs after the container
    /// has been finalized; it is dropped without being called when nothing
    /// is recording.
    pub fn stop(&self, on_complete: impl FnOnce(Result<Url>) + Send + 'static) {
        self.send(Command::Stop(Box::new(on_complete)));
    }

    pub async fn snapshot(&self) -> Result<WriterSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await
            .map_err(|_| CapError::InvalidState("container writer task has exited".into()))
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("container writer task has exited; command dropped");
        }
    }
}

struct Session {
    url: Url,
    asset: Box<dyn AssetWriter>,
    formats: HashMap<MediaKind, Arc<FormatDescription>>,
    video_written: bool,
    failed: bool,
}

impl Session {
    fn new(url: Url, asset: Box<dyn AssetWriter>) -> Self {
        Self {
            url,
            asset,
            formats: HashMap::new(),
            video_written: false,
            failed: false,
        }
    }

    fn add_track(&mut self, kind: MediaKind, format: Arc<FormatDescription>) {
        if format.kind() != kind {
            log::warn!("{} track hint carries a {} format", kind, format.kind());
            return;
        }
        if self.asset.has_track(kind) {
            log::debug!("{} track already configured", kind);
            return;
        }
        if self.asset.status() != AssetStatus::Unknown {
            log::warn!("{} track added after writing began; ignored", kind);
            return;
        }
        match self.asset.add_track(kind, format.clone()) {
            Ok(()) => {
                log::info!("added {} track to {}", kind, self.url);
                self.formats.insert(kind, format);
            }
            Err(e) => log::warn!("cannot add {} track: {}", kind, e),
        }
    }

    /// Declares the track from a real sample before anything is written,
    /// replacing a hint that differs from what the encoder produced.
    fn confirm_track(&mut self, kind: MediaKind, format: Arc<FormatDescription>) {
        if !self.asset.has_track(kind) {
            self.add_track(kind, format);
            return;
        }
        if self.asset.status() != AssetStatus::Unknown
            || self.formats.get(&kind).is_some_and(|hint| hint.as_ref() == format.as_ref())
        {
            return;
        }
        match self.asset.replace_format(kind, format.clone()) {
            Ok(()) => {
                log::info!("{} track hint replaced by the stream format", kind);
                self.formats.insert(kind, format);
            }
            Err(e) => log::warn!("cannot replace {} track hint: {}", kind, e),
        }
    }
}

struct Finalizing {
    url: Url,
    on_complete: CompletionHandler,
    task: JoinHandle<Result<()>>,
}

enum Event {
    Command(Option<Command>),
    Finalized(std::result::Result<Result<()>, JoinError>),
}

struct WriterTask {
    settings: WriterSettings,
    factory: Arc<dyn AssetWriterFactory>,
    state: WriterState,
    session: Option<Session>,
    finalizing: Option<Finalizing>,
    session_start: Option<MediaTime>,
    video_samples: u64,
    audio_samples: u64,
    dropped_samples: u64,
    failed: bool,
}

impl WriterTask {
    fn new(settings: WriterSettings, factory: Arc<dyn AssetWriterFactory>) -> Self {
        Self {
            settings,
            factory,
            state: WriterState::Idle,
            session: None,
            finalizing: None,
            session_start: None,
            video_samples: 0,
            audio_samples: 0,
            dropped_samples: 0,
            failed: false,
        }
    }

    async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            let finalizing = OptionFuture::from(self.finalizing.as_mut().map(|f| &mut f.task));
            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                Some(done) = finalizing => Event::Finalized(done),
            };

            match event {
                Event::Command(Some(command)) => self.handle(command).await,
                Event::Command(None) => break,
                Event::Finalized(done) => self.finalized(done),
            }
        }

        // every handle is gone; still report a pending finalization
        if let Some(finalizing) = self.finalizing.as_mut() {
            let done = (&mut finalizing.task).await;
            self.finalized(done);
        }
        log::debug!("container writer task exiting");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(url) => self.start(url).await,
            Command::AddTrack(kind, hint) => self.add_track(kind, hint),
            Command::Write(sample) => self.write(sample).await,
            Command::Stop(on_complete) => self.stop(on_complete),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn start(&mut self, url: Url) {
        if !matches!(self.state, WriterState::Idle | WriterState::Closed) {
            log::warn!("start({}) ignored: writer is {:?}", url, self.state);
            return;
        }

        self.session_start = None;
        self.video_samples = 0;
        self.audio_samples = 0;
        self.dropped_samples = 0;
        self.failed = false;

        match self.factory.create(&url).await {
            Ok(asset) => {
                log::info!("recording to {}", url);
                self.session = Some(Session::new(url, asset));
                self.state = WriterState::TrackConfiguring;
            }
            Err(e) => {
                log::error!("cannot open {}: {}", url, e);
                self.failed = true;
            }
        }
    }

    fn add_track(&mut self, kind: MediaKind, hint: Arc<FormatDescription>) {
        if kind == MediaKind::Audio && self.settings.audio_muted {
            log::debug!("audio muted; no audio track");
            return;
        }
        if self.state != WriterState::TrackConfiguring {
            log::debug!("{} track ignored: writer is {:?}", kind, self.state);
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.add_track(kind, hint);
        }
    }

    async fn write(&mut self, sample: EncodedSample) {
        if !self.state.is_recording() {
            log::debug!("{} sample at {} ignored: writer is {:?}", sample.kind, sample.pts, self.state);
            return;
        }
        let muted = self.settings.audio_muted;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.failed {
            return;
        }

        let kind = sample.kind;
        if kind == MediaKind::Audio && !session.video_written {
            if !muted && session.asset.status() == AssetStatus::Unknown {
                session.confirm_track(MediaKind::Audio, sample.format.clone());
            }
            log::debug!("audio sample at {} discarded: no video yet", sample.pts);
            self.dropped_samples += 1;
            return;
        }
        if !sample.is_data_ready() {
            log::debug!("empty {} sample at {} skipped", kind, sample.pts);
            self.dropped_samples += 1;
            return;
        }

        if kind == MediaKind::Video && session.asset.status() == AssetStatus::Unknown {
            session.confirm_track(MediaKind::Video, sample.format.clone());
            if let Err(e) = session.asset.start_writing().await {
                log::error!("cannot begin writing {}: {}", session.url, e);
                session.failed = true;
                self.failed = true;
                return;
            }
            session.asset.start_session(sample.pts);
            self.session_start = Some(sample.pts);
            self.state = WriterState::Started;
            log::info!("session anchored at {}", sample.pts);
        }

        if session.asset.status() == AssetStatus::Failed {
            log::error!("output {} failed; writes disabled until the next start", session.url);
            session.failed = true;
            self.failed = true;
            return;
        }
        if kind == MediaKind::Audio && muted {
            return;
        }
        if kind == MediaKind::Audio && self.session_start.is_some_and(|start| sample.pts < start) {
            log::debug!("audio sample at {} precedes the session start", sample.pts);
            self.dropped_samples += 1;
            return;
        }

        let changed = session
            .formats
            .get(&kind)
            .is_some_and(|current| current.as_ref() != sample.format.as_ref());
        if changed {
            if let Err(e) = session.asset.update_format(kind, sample.format.clone()) {
                log::warn!("{} format change rejected: {}", kind, e);
                self.dropped_samples += 1;
                return;
            }
            log::info!("{} format changed at {}", kind, sample.pts);
            session.formats.insert(kind, sample.format.clone());
        }

        if !session.asset.is_ready_for_more_media_data(kind) {
            log::debug!("{} track not ready; sample at {} dropped", kind, sample.pts);
            self.dropped_samples += 1;
            return;
        }

        match session.asset.append(&sample).await {
            Ok(()) => {
                match kind {
                    MediaKind::Video => {
                        session.video_written = true;
                        self.video_samples += 1;
                    }
                    MediaKind::Audio => self.audio_samples += 1,
                }
                self.state = WriterState::Writing;
            }
            Err(e) if session.asset.status() == AssetStatus::Failed => {
                log::error!("output {} failed: {}", session.url, e);
                session.failed = true;
                self.failed = true;
            }
            Err(e) => {
                log::warn!("{} sample at {} not written: {}", kind, sample.pts, e);
                self.dropped_samples += 1;
            }
        }
    }

    fn stop(&mut self, on_complete: CompletionHandler) {
        if !self.state.is_recording() {
            log::warn!("stop ignored: writer is {:?}", self.state);
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };

        let Session { url, mut asset, failed, .. } = session;
        asset.mark_finished(MediaKind::Video);
        asset.mark_finished(MediaKind::Audio);
        let task = tokio::spawn(async move {
            if failed {
                return Err(CapError::Writer("output failed while recording".into()));
            }
            asset.finish().await
        });

        log::info!("finishing {}", url);
        self.state = WriterState::Finishing;
        self.finalizing = Some(Finalizing { url, on_complete, task });
    }

    fn finalized(&mut self, done: std::result::Result<Result<()>, JoinError>) {
        let Some(Finalizing { url, on_complete, .. }) = self.finalizing.take() else {
            return;
        };

        let result = match done {
            Ok(Ok(())) => {
                log::info!("finished {}", url);
                Ok(url)
            }
            Ok(Err(e)) => {
                log::error!("finishing {} failed: {}", url, e);
                Err(e)
            }
            Err(e) => {
                log::error!("finalization task for {} died: {}", url, e);
                Err(CapError::Writer(e.to_string()))
            }
        };
        self.failed |= result.is_err();
        self.state = WriterState::Closed;
        on_complete(result);
    }

    fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            state: self.state,
            session_start: self.session_start,
            video_samples: self.video_samples,
            audio_samples: self.audio_samples,
            dropped_samples: self.dropped_samples,
            failed: self.failed,
        }
    }
}
