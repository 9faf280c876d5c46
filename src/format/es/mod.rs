//! Elementary stream packets for network sinks.
//!
//! Video leaves as Annex-B access units, audio as ADTS frames. Each packet
//! carries its kind and the raw capture clock ticks of its presentation
//! time, which an upload transport sends as the `av` and `pts` query
//! parameters.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::av::{EncodedSample, FormatDescription, MediaKind};
use crate::codec::aac::{to_adts_with, AACConfig};
use crate::codec::h264::to_annex_b;
use crate::error::{CapError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub kind: MediaKind,
    pub pts: i64,
    pub data: Bytes,
}

impl StreamPacket {
    pub fn query_string(&self) -> String {
        format!("av={}&pts={}", self.kind.as_str(), self.pts)
    }

    /// `endpoint` with the packet's `av` and `pts` appended.
    pub fn upload_url(&self, endpoint: &Url) -> Url {
        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .append_pair("av", self.kind.as_str())
            .append_pair("pts", &self.pts.to_string());
        url
    }

    pub fn extension(&self) -> &'static str {
        match self.kind {
            MediaKind::Video => "h264",
            MediaKind::Audio => "aac",
        }
    }

    /// `<kind>/<pts>.<ext>`, the layout an upload receiver stores packets in.
    pub fn storage_path(&self) -> String {
        format!("{}/{}.{}", self.kind.as_str(), self.pts, self.extension())
    }
}

/// Frames encoded samples for the wire.
#[derive(Debug, Default, Clone, Copy)]
pub struct Packetizer;

impl Packetizer {
    pub fn new() -> Self {
        Self
    }

    pub fn packetize(&self, sample: &EncodedSample) -> Result<StreamPacket> {
        let data = match sample.format.as_ref() {
            FormatDescription::Video(_) => to_annex_b(sample)?,
            FormatDescription::Audio(format) => {
                to_adts_with(&AACConfig::from_format(format)?, &sample.data)?
            }
        };
        Ok(StreamPacket {
            kind: sample.kind,
            pts: sample.pts.value,
            data,
        })
    }
}

/// Receiver of outgoing packets, typically a network transport.
pub trait PacketSink: Send + Sync {
    fn send_packet(&self, packet: StreamPacket) -> Result<()>;
}

impl PacketSink for UnboundedSender<StreamPacket> {
    fn send_packet(&self, packet: StreamPacket) -> Result<()> {
        self.send(packet)
            .map_err(|_| CapError::InvalidState("packet sink closed".into()))
    }
}

/// Appends packets of one kind to a raw `.h264` or `.aac` stream.
pub struct EsMuxer<W: AsyncWrite + Unpin + Send> {
    writer: BufWriter<W>,
    kind: MediaKind,
    packets: u64,
}

impl<W: AsyncWrite + Unpin + Send> EsMuxer<W> {
    pub fn new(writer: W, kind: MediaKind) -> Self {
        Self {
            writer: BufWriter::new(writer),
            kind,
            packets: 0,
        }
    }

    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    pub async fn write_packet(&mut self, packet: &StreamPacket) -> Result<()> {
        if packet.kind != self.kind {
            return Err(CapError::InvalidData(format!(
                "{} packet written to a {} stream",
                packet.kind, self.kind
            )));
        }
        self.writer.write_all(&packet.data).await?;
        self.packets += 1;
        Ok(())
    }

    pub async fn write_trailer(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}
