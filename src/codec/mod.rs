pub mod aac;
pub mod h264;

pub use aac::{to_adts, AudioEncoder};
pub use h264::{to_annex_b, NALUnit, VideoEncoder};
