use crate::error::{CapError, Result};

/// What a finished MP4 declares about one track.
#[derive(Debug, Clone, Default)]
pub struct TrackSummary {
    pub track_id: u32,
    /// Presentation size from `tkhd`, integer part only.
    pub width: u32,
    pub height: u32,
    pub handler: [u8; 4],
    pub timescale: u32,
    pub media_duration: u32,
    pub descriptions: u32,
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
    /// `None` when every sample is a sync sample.
    pub sync_samples: Option<Vec<u32>>,
    /// `(segment_duration, media_time)` pairs from the edit list.
    pub edits: Vec<(u32, i32)>,
    /// Per-sample decode durations, expanded from `stts`.
    pub sample_durations: Vec<u32>,
}

impl TrackSummary {
    /// Payload of sample `index` inside `file`. Assumes one sample per chunk.
    pub fn sample<'a>(&self, file: &'a [u8], index: usize) -> Option<&'a [u8]> {
        let offset = *self.chunk_offsets.get(index)? as usize;
        let size = *self.sample_sizes.get(index)? as usize;
        file.get(offset..offset + size)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mp4Summary {
    pub major_brand: [u8; 4],
    pub movie_timescale: u32,
    pub duration: u32,
    pub tracks: Vec<TrackSummary>,
}

impl Mp4Summary {
    pub fn track(&self, handler: &[u8; 4]) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| &t.handler == handler)
    }
}

/// Walks the box tree of a complete MP4 file.
pub fn probe(data: &[u8]) -> Result<Mp4Summary> {
    let mut summary = Mp4Summary::default();

    for (kind, body) in children(data)? {
        match &kind {
            b"ftyp" => summary.major_brand = fourcc(body, 0)?,
            b"moov" => {
                for (kind, body) in children(body)? {
                    match &kind {
                        b"mvhd" => {
                            summary.movie_timescale = be_u32(body, 12)?;
                            summary.duration = be_u32(body, 16)?;
                        }
                        b"trak" => summary.tracks.push(probe_trak(body)?),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(summary)
}

fn probe_trak(data: &[u8]) -> Result<TrackSummary> {
    let mut track = TrackSummary::default();

    for (kind, body) in children(data)? {
        match &kind {
            b"tkhd" => {
                track.track_id = be_u32(body, 12)?;
                // width and height close the box as 16.16 fixed point
                let size_at = body
                    .len()
                    .checked_sub(8)
                    .ok_or_else(|| CapError::InvalidData("tkhd too short".into()))?;
                track.width = be_u32(body, size_at)? >> 16;
                track.height = be_u32(body, size_at + 4)? >> 16;
            }
            b"edts" => {
                if let Some(elst) = find(body, b"elst")? {
                    let count = be_u32(elst, 4)? as usize;
                    for i in 0..count {
                        let at = 8 + i * 12;
                        track.edits.push((be_u32(elst, at)?, be_u32(elst, at + 4)? as i32));
                    }
                }
            }
            b"mdia" => {
                for (kind, body) in children(body)? {
                    match &kind {
                        b"mdhd" => {
                            track.timescale = be_u32(body, 12)?;
                            track.media_duration = be_u32(body, 16)?;
                        }
                        b"hdlr" => track.handler = fourcc(body, 8)?,
                        b"minf" => {
                            let stbl = find(body, b"stbl")?
                                .ok_or_else(|| CapError::InvalidData("minf without stbl".into()))?;
                            probe_stbl(stbl, &mut track)?;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(track)
}

fn probe_stbl(data: &[u8], track: &mut TrackSummary) -> Result<()> {
    for (kind, body) in children(data)? {
        match &kind {
            b"stsd" => track.descriptions = be_u32(body, 4)?,
            b"stts" => {
                let count = be_u32(body, 4)? as usize;
                for i in 0..count {
                    let run = be_u32(body, 8 + i * 8)?;
                    let delta = be_u32(body, 12 + i * 8)?;
                    track.sample_durations.extend(std::iter::repeat(delta).take(run as usize));
                }
            }
            b"stss" => {
                let count = be_u32(body, 4)? as usize;
                let mut sync = Vec::with_capacity(count);
                for i in 0..count {
                    sync.push(be_u32(body, 8 + i * 4)?);
                }
                track.sync_samples = Some(sync);
            }
            b"stsz" => {
                let count = be_u32(body, 8)? as usize;
                for i in 0..count {
                    track.sample_sizes.push(be_u32(body, 12 + i * 4)?);
                }
            }
            b"stco" => {
                let count = be_u32(body, 4)? as usize;
                for i in 0..count {
                    track.chunk_offsets.push(be_u32(body, 8 + i * 4)? as u64);
                }
            }
            b"co64" => {
                let count = be_u32(body, 4)? as usize;
                for i in 0..count {
                    let hi = be_u32(body, 8 + i * 8)? as u64;
                    let lo = be_u32(body, 12 + i * 8)? as u64;
                    track.chunk_offsets.push((hi << 32) | lo);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn children(data: &[u8]) -> Result<Vec<([u8; 4], &[u8])>> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset + 8 <= data.len() {
        let size = be_u32(data, offset)? as u64;
        let kind = fourcc(data, offset + 4)?;
        let (header, size) = match size {
            0 => (8, (data.len() - offset) as u64),
            1 => {
                let hi = be_u32(data, offset + 8)? as u64;
                let lo = be_u32(data, offset + 12)? as u64;
                (16, (hi << 32) | lo)
            }
            n => (8, n),
        };

        let end = offset as u64 + size;
        if size < header as u64 || end > data.len() as u64 {
            return Err(CapError::InvalidData(format!(
                "box {} at {} overruns its parent",
                String::from_utf8_lossy(&kind),
                offset
            )));
        }
        out.push((kind, &data[offset + header..end as usize]));
        offset = end as usize;
    }

    Ok(out)
}

fn find<'a>(data: &'a [u8], kind: &[u8; 4]) -> Result<Option<&'a [u8]>> {
    Ok(children(data)?.into_iter().find(|(k, _)| k == kind).map(|(_, body)| body))
}

fn be_u32(data: &[u8], at: usize) -> Result<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| CapError::InvalidData(format!("truncated box field at {}", at)))
}

fn fourcc(data: &[u8], at: usize) -> Result<[u8; 4]> {
    data.get(at..at + 4)
        .map(|b| [b[0], b[1], b[2], b[3]])
        .ok_or_else(|| CapError::InvalidData(format!("truncated fourcc at {}", at)))
}
