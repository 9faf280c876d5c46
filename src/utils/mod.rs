//! # Utilities
//!
//! - [`BitReader`] and [`BitWriter`]: MSB-first bitstream access for
//!   parameter sets and ADTS headers
//! - [`SerialQueue`]: a dedicated worker thread executing jobs in order
//!
//! ```rust
//! use avcap::utils::{BitReader, BitWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = BitWriter::new();
//! writer.write_golomb(5);
//! let bytes = writer.into_bytes();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_golomb()?, 5);
//! # Ok(())
//! # }
//! ```

/// Bitstream reading and writing
pub mod bits;

/// Ordered execution on a dedicated thread
pub mod queue;

pub use bits::*;
pub use queue::SerialQueue;
