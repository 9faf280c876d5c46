use bytes::{BufMut, Bytes, BytesMut};

use super::track::{run_lengths, Track};
use crate::av::{AudioFormat, FormatDescription, MediaKind, MediaTime, VideoFormat};
use crate::codec::aac::{AACConfig, AudioSpecificConfig};
use crate::codec::h264::types::has_avcc_extension;
use crate::codec::h264::{H264Parser, SPSInfo};
use crate::error::{CapError, Result};

/// Seconds between 1904-01-01 and 1970-01-01.
const MP4_EPOCH_OFFSET: i64 = 2_082_844_800;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

pub(crate) struct MovieInfo {
    pub timescale: u32,
    pub creation_time: u32,
    pub audio_priming_frames: u32,
}

impl MovieInfo {
    pub fn now(timescale: u32, audio_priming_frames: u32) -> Self {
        let secs = chrono::Utc::now().timestamp() + MP4_EPOCH_OFFSET;
        Self {
            timescale,
            creation_time: secs.clamp(0, u32::MAX as i64) as u32,
            audio_priming_frames,
        }
    }
}

pub(crate) fn write_box(buf: &mut BytesMut, kind: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

pub(crate) fn write_full_box(
    buf: &mut BytesMut,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(buf, kind, |buf| {
        buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        body(buf);
    });
}

pub(crate) fn ftyp() -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    write_box(&mut buf, b"ftyp", |buf| {
        buf.put_slice(b"isom");
        buf.put_u32(512);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            buf.put_slice(brand);
        }
    });
    buf.freeze()
}

/// Header of an `mdat` using the 64-bit size form; the size is patched in
/// once the payload length is known.
pub(crate) fn mdat_header() -> [u8; 16] {
    let mut header = [0u8; 16];
    header[..4].copy_from_slice(&1u32.to_be_bytes());
    header[4..8].copy_from_slice(b"mdat");
    header
}

fn fallback_duration(track: &Track) -> i64 {
    match track.descriptions.first().map(|f| f.as_ref()) {
        Some(FormatDescription::Audio(a)) => a.frames_per_packet as i64,
        _ => (track.timescale / 30) as i64,
    }
}

struct Timing {
    media_duration: i64,
    empty_edit: i64,
    media_time: i64,
    edit_duration: i64,
}

impl Timing {
    fn of(track: &Track, info: &MovieInfo) -> Self {
        let media_duration = track.media_duration(fallback_duration(track));
        let first_composition = track.first_composition();
        let trimmed = match track.kind {
            MediaKind::Video => 0,
            MediaKind::Audio => (info.audio_priming_frames as i64).min(media_duration),
        };
        let to_movie = |ticks: i64| MediaTime::new(ticks, track.timescale).rescale(info.timescale);

        Self {
            media_duration,
            empty_edit: to_movie(track.presentation_start().max(0)),
            media_time: first_composition + trimmed,
            edit_duration: to_movie(media_duration - trimmed),
        }
    }

    fn total(&self) -> i64 {
        self.empty_edit + self.edit_duration
    }
}

fn u32_clamped(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

pub(crate) fn moov(tracks: &[Track], info: &MovieInfo) -> Result<Bytes> {
    let timings: Vec<Timing> = tracks.iter().map(|t| Timing::of(t, info)).collect();
    let duration = timings.iter().map(Timing::total).max().unwrap_or(0);
    let next_track_id = tracks.iter().map(|t| t.id).max().unwrap_or(0) + 1;

    let mut trak_boxes = Vec::with_capacity(tracks.len());
    for (track, timing) in tracks.iter().zip(&timings) {
        trak_boxes.push(trak(track, timing, info)?);
    }

    let mut buf = BytesMut::new();
    write_box(&mut buf, b"moov", |buf| {
        write_full_box(buf, b"mvhd", 0, 0, |buf| {
            buf.put_u32(info.creation_time);
            buf.put_u32(info.creation_time);
            buf.put_u32(info.timescale);
            buf.put_u32(u32_clamped(duration));
            buf.put_u32(0x0001_0000); // rate 1.0
            buf.put_u16(0x0100); // volume 1.0
            buf.put_bytes(0, 10);
            for v in UNITY_MATRIX {
                buf.put_u32(v);
            }
            buf.put_bytes(0, 24);
            buf.put_u32(next_track_id);
        });
        for trak in &trak_boxes {
            buf.put_slice(trak);
        }
    });
    Ok(buf.freeze())
}

fn trak(track: &Track, timing: &Timing, info: &MovieInfo) -> Result<Bytes> {
    let stsd = stsd(track)?;

    let (width, height) = track
        .descriptions
        .first()
        .and_then(|f| f.video())
        .map(|v| (v.width, v.height))
        .unwrap_or((0, 0));

    let mut buf = BytesMut::new();
    write_box(&mut buf, b"trak", |buf| {
        write_full_box(buf, b"tkhd", 0, 0x3, |buf| {
            buf.put_u32(info.creation_time);
            buf.put_u32(info.creation_time);
            buf.put_u32(track.id);
            buf.put_u32(0);
            buf.put_u32(u32_clamped(timing.total()));
            buf.put_bytes(0, 8);
            buf.put_u16(0); // layer
            buf.put_u16(if track.kind == MediaKind::Audio { 1 } else { 0 }); // alternate group
            buf.put_u16(if track.kind == MediaKind::Audio { 0x0100 } else { 0 });
            buf.put_u16(0);
            for v in UNITY_MATRIX {
                buf.put_u32(v);
            }
            buf.put_u32(width << 16);
            buf.put_u32(height << 16);
        });

        write_box(buf, b"edts", |buf| {
            let entries = if timing.empty_edit > 0 { 2 } else { 1 };
            write_full_box(buf, b"elst", 0, 0, |buf| {
                buf.put_u32(entries);
                if timing.empty_edit > 0 {
                    buf.put_u32(u32_clamped(timing.empty_edit));
                    buf.put_i32(-1);
                    buf.put_u32(0x0001_0000);
                }
                buf.put_u32(u32_clamped(timing.edit_duration));
                buf.put_i32(timing.media_time.clamp(0, i32::MAX as i64) as i32);
                buf.put_u32(0x0001_0000);
            });
        });

        write_box(buf, b"mdia", |buf| {
            write_full_box(buf, b"mdhd", 0, 0, |buf| {
                buf.put_u32(info.creation_time);
                buf.put_u32(info.creation_time);
                buf.put_u32(track.timescale);
                buf.put_u32(u32_clamped(timing.media_duration));
                buf.put_u16(0x55C4); // 'und'
                buf.put_u16(0);
            });

            let (handler, name): (&[u8; 4], &[u8]) = match track.kind {
                MediaKind::Video => (b"vide", b"VideoHandler\0"),
                MediaKind::Audio => (b"soun", b"SoundHandler\0"),
            };
            write_full_box(buf, b"hdlr", 0, 0, |buf| {
                buf.put_u32(0);
                buf.put_slice(handler);
                buf.put_bytes(0, 12);
                buf.put_slice(name);
            });

            write_box(buf, b"minf", |buf| {
                match track.kind {
                    MediaKind::Video => write_full_box(buf, b"vmhd", 0, 1, |buf| buf.put_bytes(0, 8)),
                    MediaKind::Audio => write_full_box(buf, b"smhd", 0, 0, |buf| buf.put_u32(0)),
                }
                write_box(buf, b"dinf", |buf| {
                    write_full_box(buf, b"dref", 0, 0, |buf| {
                        buf.put_u32(1);
                        write_full_box(buf, b"url ", 0, 1, |_| {});
                    });
                });
                write_box(buf, b"stbl", |buf| {
                    buf.put_slice(&stsd);
                    sample_tables(buf, track);
                });
            });
        });
    });
    Ok(buf.freeze())
}

fn sample_tables(buf: &mut BytesMut, track: &Track) {
    let durations = track.durations(fallback_duration(track));

    let stts = run_lengths(durations.iter().copied());
    write_full_box(buf, b"stts", 0, 0, |buf| {
        buf.put_u32(stts.len() as u32);
        for (count, delta) in &stts {
            buf.put_u32(*count);
            buf.put_u32(*delta);
        }
    });

    if track.has_composition_offsets() {
        let ctts = run_lengths(track.samples.iter().map(|s| u32_clamped(s.cts)));
        write_full_box(buf, b"ctts", 0, 0, |buf| {
            buf.put_u32(ctts.len() as u32);
            for (count, offset) in &ctts {
                buf.put_u32(*count);
                buf.put_u32(*offset);
            }
        });
    }

    if track.kind == MediaKind::Video && !track.all_sync() {
        let sync: Vec<u32> = track
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.sync)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        write_full_box(buf, b"stss", 0, 0, |buf| {
            buf.put_u32(sync.len() as u32);
            for index in sync {
                buf.put_u32(index);
            }
        });
    }

    // One sample per chunk; a new entry whenever the description changes.
    let mut stsc: Vec<(u32, u32)> = Vec::new();
    for (i, sample) in track.samples.iter().enumerate() {
        if stsc.last().map(|(_, d)| *d) != Some(sample.description) {
            stsc.push((i as u32 + 1, sample.description));
        }
    }
    write_full_box(buf, b"stsc", 0, 0, |buf| {
        buf.put_u32(stsc.len() as u32);
        for (first_chunk, description) in &stsc {
            buf.put_u32(*first_chunk);
            buf.put_u32(1);
            buf.put_u32(*description);
        }
    });

    write_full_box(buf, b"stsz", 0, 0, |buf| {
        buf.put_u32(0);
        buf.put_u32(track.samples.len() as u32);
        for sample in &track.samples {
            buf.put_u32(sample.size);
        }
    });

    if track.needs_co64() {
        write_full_box(buf, b"co64", 0, 0, |buf| {
            buf.put_u32(track.samples.len() as u32);
            for sample in &track.samples {
                buf.put_u64(sample.offset);
            }
        });
    } else {
        write_full_box(buf, b"stco", 0, 0, |buf| {
            buf.put_u32(track.samples.len() as u32);
            for sample in &track.samples {
                buf.put_u32(sample.offset as u32);
            }
        });
    }
}

fn stsd(track: &Track) -> Result<Bytes> {
    let mut entries = Vec::with_capacity(track.descriptions.len());
    for format in &track.descriptions {
        entries.push(match format.as_ref() {
            FormatDescription::Video(v) => avc1(v)?,
            FormatDescription::Audio(a) => mp4a(a)?,
        });
    }

    let mut buf = BytesMut::new();
    write_full_box(&mut buf, b"stsd", 0, 0, |buf| {
        buf.put_u32(entries.len() as u32);
        for entry in &entries {
            buf.put_slice(entry);
        }
    });
    Ok(buf.freeze())
}

fn avc1(format: &VideoFormat) -> Result<Bytes> {
    let avcc = avcc(format)?;
    let mut buf = BytesMut::new();
    write_box(&mut buf, b"avc1", |buf| {
        buf.put_bytes(0, 6);
        buf.put_u16(1); // data_reference_index
        buf.put_bytes(0, 16);
        buf.put_u16(format.width as u16);
        buf.put_u16(format.height as u16);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0);
        buf.put_u16(1); // frame_count
        buf.put_bytes(0, 32); // compressor name
        buf.put_u16(0x0018);
        buf.put_i16(-1);
        buf.put_slice(&avcc);
    });
    Ok(buf.freeze())
}

/// AVCDecoderConfigurationRecord.
pub(crate) fn avcc(format: &VideoFormat) -> Result<Bytes> {
    let sps: Vec<_> = format.sps().collect();
    let pps: Vec<_> = format.pps().collect();
    let first = sps
        .first()
        .ok_or_else(|| CapError::Writer("video format has no SPS".into()))?;
    if first.len() < 4 {
        return Err(CapError::Writer("SPS too short".into()));
    }

    let info = H264Parser::new().parse_sps(first).unwrap_or_else(|e| {
        log::warn!("could not parse SPS ({}), using header bytes only", e);
        SPSInfo {
            profile_idc: first[1],
            profile_compatibility: first[2],
            level_idc: first[3],
            chroma_format_idc: 1,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            ..SPSInfo::default()
        }
    });

    let length_size = format.nal_length_size.clamp(1, 4);
    let mut buf = BytesMut::new();
    write_box(&mut buf, b"avcC", |buf| {
        buf.put_u8(1);
        buf.put_u8(info.profile_idc);
        buf.put_u8(info.profile_compatibility);
        buf.put_u8(info.level_idc);
        buf.put_u8(0xFC | (length_size - 1));
        buf.put_u8(0xE0 | sps.len() as u8);
        for unit in &sps {
            buf.put_u16(unit.len() as u16);
            buf.put_slice(unit);
        }
        buf.put_u8(pps.len() as u8);
        for unit in &pps {
            buf.put_u16(unit.len() as u16);
            buf.put_slice(unit);
        }
        if has_avcc_extension(info.profile_idc) {
            buf.put_u8(0xFC | (info.chroma_format_idc as u8 & 0x03));
            buf.put_u8(0xF8 | (info.bit_depth_luma.saturating_sub(8) & 0x07));
            buf.put_u8(0xF8 | (info.bit_depth_chroma.saturating_sub(8) & 0x07));
            buf.put_u8(0); // no SPS extensions
        }
    });
    Ok(buf.freeze())
}

fn mp4a(format: &AudioFormat) -> Result<Bytes> {
    let asc = AudioSpecificConfig::from_config(&AACConfig::from_format(format)?).to_bytes();
    let mut buf = BytesMut::new();
    write_box(&mut buf, b"mp4a", |buf| {
        buf.put_bytes(0, 6);
        buf.put_u16(1);
        buf.put_bytes(0, 8);
        buf.put_u16(format.channels as u16);
        buf.put_u16(16);
        buf.put_u32(0);
        buf.put_u32((format.sample_rate & 0xFFFF) << 16);

        write_full_box(buf, b"esds", 0, 0, |buf| {
            // ES_Descriptor
            buf.put_u8(0x03);
            buf.put_u8(25);
            buf.put_u16(0); // ES_ID
            buf.put_u8(0);
            // DecoderConfigDescriptor
            buf.put_u8(0x04);
            buf.put_u8(17);
            buf.put_u8(0x40); // MPEG-4 audio
            buf.put_u8(0x15); // audio stream
            buf.put_slice(&[0, 0, 0]); // bufferSizeDB
            buf.put_u32(0); // maxBitrate
            buf.put_u32(0); // avgBitrate
            // DecoderSpecificInfo
            buf.put_u8(0x05);
            buf.put_u8(asc.len() as u8);
            buf.put_slice(&asc);
            // SLConfigDescriptor
            buf.put_u8(0x06);
            buf.put_u8(1);
            buf.put_u8(0x02);
        });
    });
    Ok(buf.freeze())
}
