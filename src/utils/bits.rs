use crate::error::{CapError, Result};

/// MSB-first bit reader over an RBSP.
///
/// Covers the syntax elements needed to walk an H.264 sequence parameter
/// set: fixed-width fields, `ue(v)` and `se(v)`.
///
/// ```
/// use avcap::utils::BitReader;
///
/// let data = [0b1011_0011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let Some(byte) = self.data.get(self.byte_offset) else {
            return Err(CapError::InvalidData("bitstream exhausted".into()));
        };

        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads `n` bits as a big-endian unsigned value. `n` is at most 32.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(CapError::InvalidData(format!("cannot read {} bits at once", n)));
        }

        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// `ue(v)`: M leading zeros, a one, then M info bits; value = 2^M + info - 1.
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(CapError::InvalidData("exp-golomb code too long".into()));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let info = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) + info as u64 - 1) as u32)
    }

    /// `se(v)`: odd codes map to positive values, even codes to negative.
    pub fn read_signed_golomb(&mut self) -> Result<i32> {
        let k = self.read_golomb()?;
        let magnitude = ((k as i64 + 1) >> 1) as i32;
        Ok(if k & 1 == 1 { magnitude } else { -magnitude })
    }

    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    pub fn align_byte(&mut self) {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
    }

    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset) * 8).saturating_sub(self.bit_offset as usize)
    }
}

/// MSB-first bit writer, the inverse of [`BitReader`].
///
/// Used to pack bit-granular headers such as ADTS.
#[derive(Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_offset: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            bit_offset: 0,
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_offset == 0 {
            self.data.push(0);
        }
        if bit {
            if let Some(last) = self.data.last_mut() {
                *last |= 1 << (7 - self.bit_offset);
            }
        }
        self.bit_offset = (self.bit_offset + 1) % 8;
    }

    /// Writes the low `n` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        for i in (0..n.min(32)).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_golomb(&mut self, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros();
        for _ in 0..len - 1 {
            self.write_bit(false);
        }
        for i in (0..len).rev() {
            self.write_bit((code >> i) & 1 == 1);
        }
    }

    pub fn write_signed_golomb(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_golomb(code);
    }

    pub fn bit_len(&self) -> usize {
        match self.bit_offset {
            0 => self.data.len() * 8,
            n => (self.data.len() - 1) * 8 + n as usize,
        }
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_offset == 0
    }

    /// Returns the written bytes; a partial last byte is zero padded.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits() {
        let data = [0b1011_0011, 0b0101_1010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(8).unwrap(), 0b1001_1010);
        assert_eq!(reader.read_bits(0).unwrap(), 0);
        assert_eq!(reader.available_bits(), 5);

        let mut reader = BitReader::new(&data);
        assert!(reader.read_bits(33).is_err());
    }

    #[test]
    fn test_read_golomb() {
        let cases: [(u8, u32); 6] = [
            (0b1000_0000, 0),
            (0b0100_0000, 1),
            (0b0110_0000, 2),
            (0b0010_0000, 3),
            (0b0011_0000, 5),
            (0b0001_0010, 8),
        ];
        for (input, expected) in cases {
            let data = [input];
            let mut reader = BitReader::new(&data);
            assert_eq!(reader.read_golomb().unwrap(), expected, "pattern {:08b}", input);
        }

        let zeros = [0u8; 5];
        assert!(BitReader::new(&zeros).read_golomb().is_err());
    }

    #[test]
    fn test_signed_golomb() {
        // 1 | 010 | 011 | 00100
        let data = [0b1010_0110, 0b0100_0000];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_signed_golomb().unwrap(), 0);
        assert_eq!(reader.read_signed_golomb().unwrap(), 1);
        assert_eq!(reader.read_signed_golomb().unwrap(), -1);
        assert_eq!(reader.read_signed_golomb().unwrap(), 2);
    }

    #[test]
    fn test_align_and_exhaustion() {
        let data = [0xFF, 0x00];
        let mut reader = BitReader::new(&data);
        reader.read_bits(3).unwrap();
        reader.align_byte();
        assert_eq!(reader.read_bits(8).unwrap(), 0);
        assert!(reader.read_bit().is_err());
    }

    #[test]
    fn test_writer_packs_msb_first() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        writer.write_bits(0b10011, 5);
        writer.write_bit(true);
        assert_eq!(writer.bit_len(), 9);
        assert!(!writer.is_byte_aligned());
        assert_eq!(writer.into_bytes(), vec![0b1011_0011, 0b1000_0000]);
    }

    #[quickcheck]
    fn prop_golomb_written_then_read(values: Vec<u16>, signed: Vec<i16>) -> bool {
        let mut writer = BitWriter::new();
        for &v in &values {
            writer.write_golomb(v as u32);
        }
        for &v in &signed {
            writer.write_signed_golomb(v as i32);
        }
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);

        values.iter().all(|&v| reader.read_golomb().ok() == Some(v as u32))
            && signed.iter().all(|&v| reader.read_signed_golomb().ok() == Some(v as i32))
    }
}
