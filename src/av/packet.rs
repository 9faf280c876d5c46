use bytes::Bytes;
use std::sync::Arc;

use super::{FormatDescription, MediaKind, MediaTime};

/// A compressed access unit plus the format it was produced with.
///
/// Video payloads are AVCC (4-byte big-endian length prefixed NAL units),
/// audio payloads are raw AAC frames without ADTS headers.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Bytes,
    pub kind: MediaKind,
    pub pts: MediaTime,
    pub dts: Option<MediaTime>,
    pub duration: Option<MediaTime>,
    pub is_key: bool,
    pub format: Arc<FormatDescription>,
}

impl EncodedSample {
    pub fn new(
        kind: MediaKind,
        data: impl Into<Bytes>,
        pts: MediaTime,
        format: Arc<FormatDescription>,
    ) -> Self {
        Self {
            data: data.into(),
            kind,
            pts,
            dts: None,
            duration: None,
            is_key: false,
            format,
        }
    }

    pub fn with_dts(mut self, dts: MediaTime) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_duration(mut self, duration: MediaTime) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Decode timestamp, falling back to the presentation timestamp.
    pub fn decode_time(&self) -> MediaTime {
        self.dts.unwrap_or(self.pts)
    }

    /// A sample is ready once its payload has been produced.
    pub fn is_data_ready(&self) -> bool {
        !self.data.is_empty()
    }
}
