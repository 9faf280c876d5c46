use async_trait::async_trait;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};
use url::Url;

use super::boxes::{self, MovieInfo};
use super::track::{SampleRecord, Track};
use crate::av::{EncodedSample, FormatDescription, MediaKind, MediaTime};
use crate::config::WriterSettings;
use crate::error::{CapError, Result};
use crate::format::{AssetStatus, AssetWriter, AssetWriterFactory};

/// Progressive MP4 writer: `ftyp`, one growing `mdat`, then `moov` on finish.
pub struct Mp4AssetWriter<W> {
    out: W,
    status: AssetStatus,
    settings: WriterSettings,
    tracks: Vec<Track>,
    session_start: Option<MediaTime>,
    mdat_start: u64,
    position: u64,
}

impl<W: AsyncWrite + AsyncSeek + Unpin + Send> Mp4AssetWriter<W> {
    pub fn new(out: W, settings: WriterSettings) -> Self {
        Self {
            out,
            status: AssetStatus::Unknown,
            settings,
            tracks: Vec::new(),
            session_start: None,
            mdat_start: 0,
            position: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn track(&self, kind: MediaKind) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    fn track_mut(&mut self, kind: MediaKind) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.kind == kind)
    }

    fn fail(&mut self, error: impl std::fmt::Display) -> CapError {
        log::error!("mp4 output failed: {}", error);
        self.status = AssetStatus::Failed;
        CapError::Writer(error.to_string())
    }

    async fn write_trailer(&mut self) -> std::io::Result<()> {
        let mdat_size = self.position - self.mdat_start;
        self.out.seek(SeekFrom::Start(self.mdat_start + 8)).await?;
        self.out.write_u64(mdat_size).await?;
        self.out.seek(SeekFrom::Start(self.position)).await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + AsyncSeek + Unpin + Send> AssetWriter for Mp4AssetWriter<W> {
    fn status(&self) -> AssetStatus {
        self.status
    }

    fn add_track(&mut self, kind: MediaKind, format: Arc<FormatDescription>) -> Result<()> {
        if self.status != AssetStatus::Unknown {
            return Err(CapError::InvalidState(format!(
                "cannot add a {} track once writing has started",
                kind
            )));
        }
        if format.kind() != kind {
            return Err(CapError::InvalidData(format!("{} track given a {} format", kind, format.kind())));
        }
        if self.track(kind).is_some() {
            return Err(CapError::InvalidState(format!("{} track already exists", kind)));
        }

        let timescale = match format.as_ref() {
            FormatDescription::Video(_) => self.settings.video_timescale,
            FormatDescription::Audio(a) => a.sample_rate,
        };
        let id = self.tracks.len() as u32 + 1;
        log::debug!("mp4 track {}: {} at {} Hz", id, kind, timescale);
        self.tracks.push(Track::new(kind, id, timescale, format));
        Ok(())
    }

    fn has_track(&self, kind: MediaKind) -> bool {
        self.track(kind).is_some()
    }

    fn replace_format(&mut self, kind: MediaKind, format: Arc<FormatDescription>) -> Result<()> {
        if self.status != AssetStatus::Unknown {
            return Err(CapError::InvalidState(format!(
                "cannot replace the {} format once writing has started",
                kind
            )));
        }
        if format.kind() != kind {
            return Err(CapError::InvalidData(format!("{} track given a {} format", kind, format.kind())));
        }
        let track = self
            .track_mut(kind)
            .ok_or_else(|| CapError::InvalidState(format!("no {} track", kind)))?;
        track.descriptions = vec![format];
        Ok(())
    }

    async fn start_writing(&mut self) -> Result<()> {
        if self.status != AssetStatus::Unknown {
            return Err(CapError::InvalidState("writing already started".into()));
        }
        if self.tracks.is_empty() {
            return Err(CapError::InvalidState("no tracks to write".into()));
        }

        let ftyp = boxes::ftyp();
        let header = boxes::mdat_header();
        let result = async {
            self.out.write_all(&ftyp).await?;
            self.out.write_all(&header).await
        }
        .await;
        if let Err(e) = result {
            return Err(self.fail(e));
        }

        self.mdat_start = ftyp.len() as u64;
        self.position = self.mdat_start + header.len() as u64;
        self.status = AssetStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.session_start = Some(at);
    }

    fn is_ready_for_more_media_data(&self, kind: MediaKind) -> bool {
        self.status == AssetStatus::Writing
            && self.session_start.is_some()
            && self.track(kind).is_some_and(|t| !t.finished)
    }

    fn update_format(&mut self, kind: MediaKind, format: Arc<FormatDescription>) -> Result<()> {
        let track = self
            .track_mut(kind)
            .ok_or_else(|| CapError::InvalidState(format!("no {} track", kind)))?;
        if track.push_description(format) {
            log::info!("{} track now has {} sample descriptions", kind, track.descriptions.len());
        }
        Ok(())
    }

    async fn append(&mut self, sample: &EncodedSample) -> Result<()> {
        if self.status != AssetStatus::Writing {
            return Err(CapError::InvalidState(format!("cannot append while {:?}", self.status)));
        }
        let start = self
            .session_start
            .ok_or_else(|| CapError::InvalidState("session not started".into()))?;
        if sample.data.is_empty() {
            return Err(CapError::InvalidData("empty sample".into()));
        }

        let offset = self.position;
        let track = self
            .track_mut(sample.kind)
            .filter(|t| !t.finished)
            .ok_or_else(|| CapError::InvalidState(format!("{} track is not accepting samples", sample.kind)))?;

        track.push_description(sample.format.clone());
        let ts = track.timescale;
        let dts = sample.decode_time().rescale(ts) - start.rescale(ts);
        let pts = sample.pts.rescale(ts) - start.rescale(ts);
        let record = SampleRecord {
            offset,
            size: sample.data.len() as u32,
            dts,
            cts: (pts - dts).max(0),
            duration: sample.duration.map(|d| d.rescale(ts)),
            sync: sample.is_key,
            description: track.current_description(),
        };

        if let Err(e) = self.out.write_all(&sample.data).await {
            return Err(self.fail(e));
        }
        self.position += sample.data.len() as u64;
        if let Some(track) = self.track_mut(sample.kind) {
            track.samples.push(record);
        }
        Ok(())
    }

    fn mark_finished(&mut self, kind: MediaKind) {
        if let Some(track) = self.track_mut(kind) {
            track.finished = true;
        }
    }

    async fn finish(&mut self) -> Result<()> {
        if self.status != AssetStatus::Writing {
            return Err(CapError::InvalidState(format!("cannot finish while {:?}", self.status)));
        }

        self.tracks.retain(|t| {
            if t.samples.is_empty() {
                log::warn!("dropping empty {} track", t.kind);
            }
            !t.samples.is_empty()
        });

        let info = MovieInfo::now(self.settings.movie_timescale, self.settings.audio_priming_frames);
        let moov = match boxes::moov(&self.tracks, &info) {
            Ok(moov) => moov,
            Err(e) => return Err(self.fail(e)),
        };

        let result = async {
            self.write_trailer().await?;
            self.out.write_all(&moov).await?;
            self.out.flush().await
        }
        .await;
        if let Err(e) = result {
            return Err(self.fail(e));
        }

        self.status = AssetStatus::Completed;
        log::info!(
            "mp4 finished: {} bytes of media in {} tracks",
            self.position - self.mdat_start,
            self.tracks.len()
        );
        Ok(())
    }
}

/// Opens `file://` URLs as buffered MP4 files.
pub struct Mp4FileFactory {
    settings: WriterSettings,
}

impl Mp4FileFactory {
    pub fn new(settings: WriterSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AssetWriterFactory for Mp4FileFactory {
    async fn create(&self, url: &Url) -> Result<Box<dyn AssetWriter>> {
        let path = url
            .to_file_path()
            .map_err(|_| CapError::InvalidData(format!("not a file URL: {}", url)))?;
        let file = tokio::fs::File::create(&path).await?;
        log::debug!("writing mp4 to {}", path.display());
        Ok(Box::new(Mp4AssetWriter::new(BufWriter::new(file), self.settings.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioFormat, VideoFormat};
    use crate::codec::aac::ProfileType;
    use crate::codec::h264::parser::tests::high_profile_sps;
    use crate::format::mp4::probe;
    use bytes::Bytes;
    use std::io::Cursor;

    fn video_format() -> Arc<FormatDescription> {
        Arc::new(FormatDescription::Video(VideoFormat::new(
            1920,
            1080,
            vec![Bytes::from(high_profile_sps(1920, 1080)), Bytes::from_static(&[0x68, 0xEE, 0x3C, 0x80])],
        )))
    }

    fn audio_format() -> Arc<FormatDescription> {
        Arc::new(FormatDescription::Audio(AudioFormat {
            sample_rate: 44_100,
            channels: 1,
            profile: ProfileType::LC,
            frames_per_packet: 1024,
        }))
    }

    fn video(ms: i64, key: bool) -> EncodedSample {
        EncodedSample::new(MediaKind::Video, vec![0u8, 0, 0, 2, 0x65, ms as u8], MediaTime::new(ms, 1000), video_format())
            .with_key_flag(key)
    }

    fn audio(ms: i64) -> EncodedSample {
        EncodedSample::new(MediaKind::Audio, vec![0x21u8, 0x10], MediaTime::new(ms, 1000), audio_format())
            .with_key_flag(true)
            .with_duration(MediaTime::new(1024, 44_100))
    }

    #[tokio::test]
    async fn test_writes_playable_layout() {
        let mut writer = Mp4AssetWriter::new(Cursor::new(Vec::new()), WriterSettings::default());
        writer.add_track(MediaKind::Video, video_format()).unwrap();
        writer.add_track(MediaKind::Audio, audio_format()).unwrap();
        assert!(writer.add_track(MediaKind::Video, video_format()).is_err());

        writer.start_writing().await.unwrap();
        assert!(!writer.is_ready_for_more_media_data(MediaKind::Video));
        writer.start_session(MediaTime::new(1000, 1000));
        assert!(writer.is_ready_for_more_media_data(MediaKind::Video));

        writer.append(&video(1000, true)).await.unwrap();
        writer.append(&audio(1010)).await.unwrap();
        writer.append(&video(1033, false)).await.unwrap();
        writer.append(&audio(1033)).await.unwrap();
        writer.append(&video(1066, false)).await.unwrap();

        writer.mark_finished(MediaKind::Video);
        assert!(!writer.is_ready_for_more_media_data(MediaKind::Video));
        writer.mark_finished(MediaKind::Audio);
        writer.finish().await.unwrap();
        assert_eq!(writer.status(), AssetStatus::Completed);

        let file = writer.into_inner().into_inner();
        let summary = probe(&file).unwrap();
        assert_eq!(summary.major_brand, *b"isom");
        assert_eq!(summary.tracks.len(), 2);

        let video = summary.track(b"vide").unwrap();
        assert_eq!(video.sample_sizes, vec![6, 6, 6]);
        assert_eq!(video.sync_samples, Some(vec![1]));
        assert_eq!(video.sample(&file, 1), Some(&[0u8, 0, 0, 2, 0x65, (1033 % 256) as u8][..]));

        let audio = summary.track(b"soun").unwrap();
        assert_eq!(audio.timescale, 44_100);
        assert_eq!(audio.sample_sizes.len(), 2);
        // audio starts 10ms after the anchor
        assert_eq!(audio.edits[0], (10, -1));
    }

    #[tokio::test]
    async fn test_format_change_adds_description() {
        let mut writer = Mp4AssetWriter::new(Cursor::new(Vec::new()), WriterSettings::default());
        writer.add_track(MediaKind::Video, video_format()).unwrap();
        writer.start_writing().await.unwrap();
        writer.start_session(MediaTime::new(0, 1000));
        writer.append(&video(0, true)).await.unwrap();

        let changed = Arc::new(FormatDescription::Video(VideoFormat::new(
            1280,
            720,
            vec![Bytes::from(high_profile_sps(1280, 720)), Bytes::from_static(&[0x68, 0xEE])],
        )));
        writer.update_format(MediaKind::Video, changed.clone()).unwrap();
        let mut next = video(33, true);
        next.format = changed;
        writer.append(&next).await.unwrap();
        writer.finish().await.unwrap();

        let file = writer.into_inner().into_inner();
        let summary = probe(&file).unwrap();
        let video = summary.track(b"vide").unwrap();
        assert_eq!(video.descriptions, 2);
        assert_eq!(video.sync_samples, None);
    }

    #[tokio::test]
    async fn test_replaced_hint_is_the_only_description() {
        let mut writer = Mp4AssetWriter::new(Cursor::new(Vec::new()), WriterSettings::default());
        let hint = Arc::new(FormatDescription::Video(VideoFormat::new(640, 480, Vec::new())));
        writer.add_track(MediaKind::Video, hint).unwrap();
        assert!(writer.replace_format(MediaKind::Audio, audio_format()).is_err());
        writer.replace_format(MediaKind::Video, video_format()).unwrap();

        writer.start_writing().await.unwrap();
        assert!(writer.replace_format(MediaKind::Video, video_format()).is_err());
        writer.start_session(MediaTime::new(0, 1000));
        writer.append(&video(0, true)).await.unwrap();
        writer.finish().await.unwrap();

        let file = writer.into_inner().into_inner();
        let video = probe(&file).unwrap().tracks.remove(0);
        assert_eq!(video.descriptions, 1);
        assert_eq!((video.width, video.height), (1920, 1080));
    }

    #[tokio::test]
    async fn test_append_requires_writing() {
        let mut writer = Mp4AssetWriter::new(Cursor::new(Vec::new()), WriterSettings::default());
        assert!(writer.append(&video(0, true)).await.is_err());
        assert!(writer.start_writing().await.is_err());
        assert!(writer.finish().await.is_err());
        assert_eq!(writer.status(), AssetStatus::Unknown);
    }
}
