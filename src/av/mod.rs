//! # Core audio/video types
//!
//! The data model shared by the encoders, the framers and the container writer:
//!
//! - [`RawFrame`]: an uncompressed picture or PCM buffer from the frame source
//! - [`EncodedSample`]: a compressed access unit with its timing and format
//! - [`FormatDescription`]: codec parameters, compared by value to detect changes
//! - [`EncoderOutput`]: the callback contract both encoders deliver through

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::codec::aac::ProfileType;
use crate::error::CapError;

mod frame;
mod packet;
mod time;

pub use frame::*;
pub use packet::*;
pub use time::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Wire name used by the upload transport's `av` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// H.264 stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// SPS units first, then PPS units, without start codes or length prefixes.
    pub parameter_sets: Vec<Bytes>,
    /// Size of the big-endian NAL length prefix in sample payloads.
    pub nal_length_size: u8,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, parameter_sets: Vec<Bytes>) -> Self {
        Self {
            width,
            height,
            parameter_sets,
            nal_length_size: 4,
        }
    }

    /// Parameter sets whose NAL type is SPS (7).
    pub fn sps(&self) -> impl Iterator<Item = &Bytes> {
        self.parameter_sets
            .iter()
            .filter(|ps| ps.first().map(|h| h & 0x1F) == Some(7))
    }

    /// Parameter sets whose NAL type is PPS (8).
    pub fn pps(&self) -> impl Iterator<Item = &Bytes> {
        self.parameter_sets
            .iter()
            .filter(|ps| ps.first().map(|h| h & 0x1F) == Some(8))
    }
}

/// AAC stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub profile: ProfileType,
    pub frames_per_packet: u32,
}

/// Codec configuration of one track. Immutable once produced; a new value
/// means the stream parameters changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatDescription {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl FormatDescription {
    pub fn kind(&self) -> MediaKind {
        match self {
            FormatDescription::Video(_) => MediaKind::Video,
            FormatDescription::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn video(&self) -> Option<&VideoFormat> {
        match self {
            FormatDescription::Video(v) => Some(v),
            FormatDescription::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioFormat> {
        match self {
            FormatDescription::Audio(a) => Some(a),
            FormatDescription::Video(_) => None,
        }
    }
}

/// Lifecycle of an encoder's private session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Uninitialized,
    Ready,
    Encoding,
    Stopped,
}

/// Receiver of everything an encoder produces. Calls arrive on the encoder's
/// own serial context; video and audio encoders may call concurrently.
pub trait EncoderOutput: Send + Sync + 'static {
    /// The encoder's output format changed (reported once per distinct value).
    fn format_changed(&self, kind: MediaKind, format: Arc<FormatDescription>);

    fn sample_encoded(&self, sample: EncodedSample);

    /// The frame presented at `pts` produced no sample.
    fn sample_dropped(&self, kind: MediaKind, pts: MediaTime, error: CapError);
}

/// Channel form of [`EncoderOutput`].
#[derive(Debug)]
pub enum EncoderEvent {
    FormatChanged {
        kind: MediaKind,
        format: Arc<FormatDescription>,
    },
    Encoded(EncodedSample),
    Dropped {
        kind: MediaKind,
        pts: MediaTime,
        error: CapError,
    },
}

impl EncoderOutput for UnboundedSender<EncoderEvent> {
    fn format_changed(&self, kind: MediaKind, format: Arc<FormatDescription>) {
        let _ = self.send(EncoderEvent::FormatChanged { kind, format });
    }

    fn sample_encoded(&self, sample: EncodedSample) {
        let _ = self.send(EncoderEvent::Encoded(sample));
    }

    fn sample_dropped(&self, kind: MediaKind, pts: MediaTime, error: CapError) {
        let _ = self.send(EncoderEvent::Dropped { kind, pts, error });
    }
}
