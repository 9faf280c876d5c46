//! # AAC
//!
//! ADTS framing and parsing, the MPEG-4 AudioSpecificConfig, and the
//! [`AudioEncoder`] that drives a PCM to AAC [`AudioConverter`].

/// ADTS framing of raw AAC payloads
pub mod adts;
/// AAC encoder and converter seam
pub mod encoder;
/// ADTS parsing
pub mod parser;
/// Header and configuration types
pub mod types;

pub use adts::{to_adts, to_adts_with};
pub use encoder::*;
pub use parser::AACParser;
pub use types::*;
