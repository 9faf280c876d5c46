#![doc(html_root_url = "https://docs.rs/avcap/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # avcap - capture-side encoding and muxing
//!
//! `avcap` turns raw camera and microphone frames into H.264 and AAC, and
//! writes them either into an MP4 file or as self-contained packets for a
//! network uploader.
//!
//! ## Features
//!
//! ### Encoding
//! - Video and audio encoders that each run on a private serial queue and
//!   report results through an [`EncoderOutput`](av::EncoderOutput)
//! - Hardware sessions and converters plug in behind traits
//!
//! ### Framing
//! - AVCC to Annex-B conversion with parameter sets on key frames
//! - ADTS headers for raw AAC
//!
//! ### Recording
//! - A serialized container writer that anchors the session on the first
//!   video frame and drops audio that would precede it
//! - Progressive MP4 output with a trailing `moov`
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! avcap = "0.1.0"
//! ```
//!
//! ### Framing an AAC payload
//!
//! ```rust
//! use avcap::codec::aac::{to_adts, AACParser};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = to_adts(&[0x21, 0x10, 0x04])?;
//! assert_eq!(frame.len(), 10);
//!
//! let header = AACParser::new().parse_adts_header(&frame)?;
//! assert_eq!(header.frame_length, 10);
//! # Ok(())
//! # }
//! ```
//!
//! ### Recording
//!
//! ```rust,no_run
//! use avcap::config;
//! use avcap::format::Mp4FileFactory;
//! use avcap::pipeline::Pipeline;
//! # use avcap::codec::{aac::AudioConverterFactory, h264::CompressionSessionFactory};
//! # use std::sync::Arc;
//! # async fn record(
//! #     sessions: Arc<dyn CompressionSessionFactory>,
//! #     converters: Arc<dyn AudioConverterFactory>,
//! #     frames: impl futures::Stream<Item = avcap::av::RawFrame>,
//! # ) -> avcap::Result<()> {
//! let config = config::get();
//! let assets = Arc::new(Mp4FileFactory::new(config.writer.clone()));
//! let pipeline = Pipeline::new(&config, sessions, converters, assets, None)?;
//!
//! pipeline.start()?;
//! pipeline.start_recording(url::Url::parse("file:///tmp/capture.mp4")?);
//! pipeline.run(frames).await;
//! pipeline.stop_recording(|result| log::info!("recording finished: {:?}", result));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: frames, samples, timestamps and format descriptions
//! - `codec`: H.264 and AAC framing, parsing and encoder drivers
//! - `format`: the container writer, MP4 output and elementary stream packets
//! - `pipeline`: wiring from frame source to outputs
//! - `config`: TOML and environment configuration
//! - `error`: error type and `Result` alias
//! - `utils`: bit-level I/O and serial queues
//!
/// Audio/Video base types
pub mod av;

/// H.264 and AAC codecs
pub mod codec;

/// Error types and utilities
pub mod error;

/// Container and packet output
pub mod format;

/// Encoder-to-output wiring
pub mod pipeline;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{CapError, Result};
