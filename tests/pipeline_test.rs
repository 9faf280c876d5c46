mod common;

use avcap::av::MediaKind;
use avcap::codec::h264::split_annex_b;
use avcap::config::Config;
use avcap::format::mp4::probe;
use avcap::format::{Mp4FileFactory, StreamPacket};
use avcap::pipeline::Pipeline;
use avcap::{CapError, Result};
use common::*;
use futures::stream;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use url::Url;

fn pipeline(config: &Config, sessions: FakeSessions) -> Result<(Pipeline, mpsc::UnboundedReceiver<StreamPacket>)> {
    let (tx, rx) = mpsc::unbounded_channel::<StreamPacket>();
    let pipeline = Pipeline::new(
        config,
        Arc::new(sessions),
        Arc::new(FakeConverters { fail_setup: false }),
        Arc::new(Mp4FileFactory::new(config.writer.clone())),
        Some(Arc::new(tx)),
    )?;
    Ok((pipeline, rx))
}

#[tokio::test]
async fn test_records_and_streams() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("capture.mp4");
    let url = Url::from_file_path(&path).unwrap();
    let config = Config::default();
    let (pipeline, mut packets) = pipeline(&config, FakeSessions::new())?;
    pipeline.start()?;

    // the audio format is known before recording starts
    pipeline.submit(audio_frame(0));
    pipeline.drained().await;
    assert!(pipeline.router().format(MediaKind::Audio).is_some());

    pipeline.start_recording(url.clone());
    pipeline.submit(video_frame(33));
    pipeline.drained().await;

    let mut frames = Vec::new();
    for i in 0..9 {
        frames.push(audio_frame(33 + i * 23));
        frames.push(video_frame(66 + i * 33));
    }
    pipeline.run(stream::iter(frames)).await;

    let snapshot = pipeline.writer().snapshot().await?;
    assert_eq!(snapshot.session_start, Some(ms(33)));
    assert_eq!((snapshot.video_samples, snapshot.audio_samples), (10, 9));

    let (tx, rx) = oneshot::channel();
    pipeline.stop_recording(move |result| {
        let _ = tx.send(result);
    });
    assert_eq!(rx.await.map_err(|_| CapError::InvalidState("no completion".into()))??, url);
    pipeline.stop();

    let file = std::fs::read(&path)?;
    let summary = probe(&file)?;
    let video = summary.track(b"vide").unwrap();
    assert_eq!(video.sample_sizes.len(), 10);
    assert_eq!(video.sync_samples, Some(vec![1]));
    let audio = summary.track(b"soun").unwrap();
    assert_eq!(audio.sample_sizes, vec![3; 9]);

    let mut sent = Vec::new();
    while let Ok(packet) = packets.try_recv() {
        sent.push(packet);
    }
    assert_eq!(sent.len(), 20);
    assert_eq!(sent.iter().filter(|p| p.kind == MediaKind::Video).count(), 10);

    let first_video = sent.iter().find(|p| p.kind == MediaKind::Video).unwrap();
    assert_eq!(first_video.query_string(), "av=video&pts=33");
    // SPS, PPS, then the key frame slice
    assert_eq!(split_annex_b(first_video.data.clone()).len(), 3);

    let first_audio = &sent[0];
    assert_eq!(first_audio.kind, MediaKind::Audio);
    assert_eq!(&first_audio.data[..2], &[0xFF, 0xF9]);
    Ok(())
}

#[tokio::test]
async fn test_failed_video_setup_records_nothing() -> Result<()> {
    init_logger();
    let config = Config::default();
    let (pipeline, _packets) = pipeline(&config, FakeSessions::failing())?;
    assert!(pipeline.start().is_err());

    let dir = tempfile::tempdir()?;
    pipeline.start_recording(Url::from_file_path(dir.path().join("none.mp4")).unwrap());
    pipeline
        .run(stream::iter((0..5).map(|i| video_frame(i * 33))))
        .await;

    assert_eq!(pipeline.router().dropped_frames(), 5);
    let snapshot = pipeline.writer().snapshot().await?;
    assert_eq!(snapshot.video_samples, 0);
    assert_eq!(snapshot.session_start, None);
    Ok(())
}
