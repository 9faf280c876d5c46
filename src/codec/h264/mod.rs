//! # H.264/AVC
//!
//! - [`H264Parser`]: SPS/PPS parsing for container metadata
//! - [`to_annex_b`] / [`split_annex_b`]: AVCC to start-code framing and back
//! - [`VideoEncoder`]: drives a hardware [`CompressionSession`] on its own
//!   serial queue
//!
//! ## Example: reframing a key frame
//!
//! ```rust
//! use avcap::av::{EncodedSample, FormatDescription, MediaKind, MediaTime, VideoFormat};
//! use avcap::codec::h264::{split_annex_b, to_annex_b, to_avcc};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let format = Arc::new(FormatDescription::Video(VideoFormat::new(
//!     1920,
//!     1080,
//!     vec![Bytes::from_static(&[0x67, 0x64, 0x28]), Bytes::from_static(&[0x68, 0xEE])],
//! )));
//! let sample = EncodedSample::new(
//!     MediaKind::Video,
//!     to_avcc([&[0x65u8, 0x88][..]]),
//!     MediaTime::new(0, 90_000),
//!     format,
//! )
//! .with_key_flag(true);
//!
//! let stream = to_annex_b(&sample)?;
//! assert_eq!(split_annex_b(stream).len(), 3);
//! # Ok(())
//! # }
//! ```

/// Annex-B framing
pub mod annexb;
/// Hardware compression session driver
pub mod encoder;
/// Parameter set parsing
pub mod parser;
/// NAL unit and parameter set types
pub mod types;

#[doc(inline)]
pub use annexb::*;
#[doc(inline)]
pub use encoder::*;
#[doc(inline)]
pub use parser::H264Parser;
#[doc(inline)]
pub use types::*;
