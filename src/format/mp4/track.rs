use std::sync::Arc;

use crate::av::{FormatDescription, MediaKind};

/// Where one sample landed in `mdat` and when it plays, in track ticks
/// relative to the session start.
#[derive(Debug, Clone)]
pub(crate) struct SampleRecord {
    pub offset: u64,
    pub size: u32,
    pub dts: i64,
    /// Composition offset (`pts - dts`), never negative.
    pub cts: i64,
    pub duration: Option<i64>,
    pub sync: bool,
    /// 1-based index into the track's sample descriptions.
    pub description: u32,
}

#[derive(Debug)]
pub(crate) struct Track {
    pub kind: MediaKind,
    pub id: u32,
    pub timescale: u32,
    pub descriptions: Vec<Arc<FormatDescription>>,
    pub samples: Vec<SampleRecord>,
    pub finished: bool,
}

impl Track {
    pub fn new(kind: MediaKind, id: u32, timescale: u32, format: Arc<FormatDescription>) -> Self {
        Self {
            kind,
            id,
            timescale,
            descriptions: vec![format],
            samples: Vec::new(),
            finished: false,
        }
    }

    pub fn current_description(&self) -> u32 {
        self.descriptions.len() as u32
    }

    /// Registers `format` as a new sample description unless it equals the
    /// current one. Returns true if a description was added.
    pub fn push_description(&mut self, format: Arc<FormatDescription>) -> bool {
        if self.descriptions.last().is_some_and(|last| **last == *format) {
            return false;
        }
        self.descriptions.push(format);
        true
    }

    /// Per-sample durations in track ticks. The last sample uses its own
    /// duration, then the previous delta, then `fallback`.
    pub fn durations(&self, fallback: i64) -> Vec<u32> {
        let n = self.samples.len();
        let mut out = Vec::with_capacity(n);
        for pair in self.samples.windows(2) {
            out.push((pair[1].dts - pair[0].dts).clamp(0, u32::MAX as i64) as u32);
        }
        if let Some(last) = self.samples.last() {
            let tail = last
                .duration
                .filter(|d| *d > 0)
                .or_else(|| out.last().map(|d| *d as i64))
                .unwrap_or(fallback);
            out.push(tail.clamp(0, u32::MAX as i64) as u32);
        }
        out
    }

    pub fn media_duration(&self, fallback: i64) -> i64 {
        self.durations(fallback).iter().map(|d| *d as i64).sum()
    }

    /// Earliest composition time measured from the first decode time.
    pub fn first_composition(&self) -> i64 {
        let Some(first) = self.samples.first() else {
            return 0;
        };
        self.samples
            .iter()
            .map(|s| s.dts - first.dts + s.cts)
            .min()
            .unwrap_or(0)
    }

    /// Ticks between the session start and the first presented sample.
    pub fn presentation_start(&self) -> i64 {
        self.samples
            .first()
            .map(|first| first.dts + self.first_composition())
            .unwrap_or(0)
    }

    pub fn has_composition_offsets(&self) -> bool {
        self.samples.iter().any(|s| s.cts != 0)
    }

    pub fn all_sync(&self) -> bool {
        self.samples.iter().all(|s| s.sync)
    }

    pub fn needs_co64(&self) -> bool {
        self.samples
            .last()
            .is_some_and(|s| s.offset > u32::MAX as u64)
    }
}

/// Collapses `values` into `(count, value)` runs.
pub(crate) fn run_lengths<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::VideoFormat;

    fn record(dts: i64, cts: i64, duration: Option<i64>) -> SampleRecord {
        SampleRecord {
            offset: 0,
            size: 1,
            dts,
            cts,
            duration,
            sync: cts == 0,
            description: 1,
        }
    }

    fn track() -> Track {
        let format = Arc::new(FormatDescription::Video(VideoFormat::new(16, 16, Vec::new())));
        Track::new(MediaKind::Video, 1, 90_000, format)
    }

    #[test]
    fn test_durations_use_deltas_then_hint() {
        let mut t = track();
        t.samples = vec![record(0, 0, None), record(1500, 0, None), record(3000, 0, Some(1400))];
        assert_eq!(t.durations(3000), vec![1500, 1500, 1400]);

        t.samples.last_mut().unwrap().duration = None;
        assert_eq!(t.durations(3000), vec![1500, 1500, 1500]);

        t.samples.truncate(1);
        assert_eq!(t.durations(3000), vec![3000]);
    }

    #[test]
    fn test_reordered_track_starts_at_anchor() {
        let mut t = track();
        // I P B B with decode times one frame early
        t.samples = vec![
            record(-1500, 1500, None),
            record(0, 4500, None),
            record(1500, 0, None),
            record(3000, 0, None),
        ];
        assert_eq!(t.first_composition(), 1500);
        assert_eq!(t.presentation_start(), 0);
        assert!(t.has_composition_offsets());
    }

    #[test]
    fn test_run_lengths() {
        assert_eq!(run_lengths([3, 3, 3, 1, 3]), vec![(3, 3), (1, 1), (1, 3)]);
        assert!(run_lengths(Vec::<u32>::new()).is_empty());
    }
}
