//! # Output formats
//!
//! - [`ContainerWriter`]: the serialized recording state machine
//! - [`AssetWriter`]: the container backend it drives, with an MP4
//!   implementation in [`mp4`]
//! - [`es`]: Annex-B / ADTS packets for network sinks and raw stream files

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::av::{EncodedSample, FormatDescription, MediaKind, MediaTime};
use crate::Result;

pub mod es;
pub mod mp4;
pub mod writer;

/// Status of the underlying container output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    /// Tracks may still be added; nothing written yet.
    Unknown,
    Writing,
    Completed,
    /// Terminal. The partial output must be discarded.
    Failed,
}

/// A container output handle with one track per media kind.
#[async_trait]
pub trait AssetWriter: Send {
    fn status(&self) -> AssetStatus;

    /// Declares the track for `kind`. Only valid while status is `Unknown`.
    fn add_track(&mut self, kind: MediaKind, format: Arc<FormatDescription>) -> Result<()>;

    fn has_track(&self, kind: MediaKind) -> bool;

    /// Swaps the declared format of an existing track for `format`. Only
    /// valid while status is `Unknown`, so no sample has used the old one.
    fn replace_format(&mut self, kind: MediaKind, format: Arc<FormatDescription>) -> Result<()>;

    /// Writes the container header and moves to `Writing`.
    async fn start_writing(&mut self) -> Result<()>;

    /// Anchors the presentation timeline; earlier samples are not presented.
    fn start_session(&mut self, at: MediaTime);

    fn is_ready_for_more_media_data(&self, kind: MediaKind) -> bool;

    /// Registers a new sample description for `kind` used by later samples.
    fn update_format(&mut self, kind: MediaKind, format: Arc<FormatDescription>) -> Result<()>;

    async fn append(&mut self, sample: &EncodedSample) -> Result<()>;

    fn mark_finished(&mut self, kind: MediaKind);

    /// Writes the trailer. Moves to `Completed`, or `Failed` on error.
    async fn finish(&mut self) -> Result<()>;
}

/// Opens an [`AssetWriter`] for an output URL.
#[async_trait]
pub trait AssetWriterFactory: Send + Sync {
    async fn create(&self, url: &Url) -> Result<Box<dyn AssetWriter>>;
}

pub use es::{EsMuxer, PacketSink, Packetizer, StreamPacket};
pub use mp4::{Mp4AssetWriter, Mp4FileFactory};
pub use writer::{ContainerWriter, WriterSnapshot, WriterState};
