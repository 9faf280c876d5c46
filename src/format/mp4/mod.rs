//! ISO base media file output.
//!
//! Samples are appended to a single `mdat` as they arrive, one chunk per
//! sample. The sample tables, edit lists and codec configuration records are
//! written in a trailing `moov` when the file is finished.

mod boxes;
mod probe;
mod track;
mod writer;

pub use probe::{probe, Mp4Summary, TrackSummary};
pub use writer::{Mp4AssetWriter, Mp4FileFactory};
