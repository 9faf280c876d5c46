use bytes::{BufMut, Bytes, BytesMut};

use crate::av::EncodedSample;
use crate::error::{CapError, Result};

pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Reframes a length-prefixed video sample as an Annex-B byte stream.
///
/// Key frames are preceded by every parameter set of the sample's format.
pub fn to_annex_b(sample: &EncodedSample) -> Result<Bytes> {
    let format = sample
        .format
        .video()
        .ok_or_else(|| CapError::Codec("sample has no video format".into()))?;

    let parameter_sets: &[Bytes] = if sample.is_key {
        &format.parameter_sets
    } else {
        &[]
    };
    avcc_to_annex_b(&sample.data, parameter_sets, format.nal_length_size as usize)
}

/// Converts `data`, a run of big-endian `length_size`-byte prefixed NAL units,
/// into start-code delimited form after emitting `parameter_sets`.
///
/// Iteration stops once fewer than `length_size` bytes remain. Zero length
/// units are skipped; a length running past the buffer is an error.
pub fn avcc_to_annex_b(data: &[u8], parameter_sets: &[Bytes], length_size: usize) -> Result<Bytes> {
    if !(1..=4).contains(&length_size) {
        return Err(CapError::Codec(format!("invalid NAL length size {}", length_size)));
    }

    let ps_len: usize = parameter_sets.iter().map(|ps| ps.len() + START_CODE.len()).sum();
    let mut out = BytesMut::with_capacity(ps_len + data.len() + data.len() / 16);

    for ps in parameter_sets {
        out.put_slice(&START_CODE);
        out.put_slice(ps);
    }

    let mut offset = 0;
    while offset + length_size <= data.len() {
        let nal_len = data[offset..offset + length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        offset += length_size;

        if nal_len == 0 {
            continue;
        }
        let end = offset
            .checked_add(nal_len)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                CapError::Codec(format!(
                    "NAL length {} at offset {} exceeds buffer of {} bytes",
                    nal_len,
                    offset - length_size,
                    data.len()
                ))
            })?;

        out.put_slice(&START_CODE);
        out.put_slice(&data[offset..end]);
        offset = end;
    }

    Ok(out.freeze())
}

/// Splits an Annex-B stream into NAL unit payloads. Accepts both 3 and 4
/// byte start codes; bytes before the first start code are ignored.
pub fn split_annex_b(data: impl Into<Bytes>) -> Vec<Bytes> {
    let data: Bytes = data.into();
    let mut units = Vec::new();
    let mut start: Option<usize> = None;
    let mut i = 0;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if let Some(s) = start {
                let mut end = i;
                if end > s && data[end - 1] == 0 {
                    end -= 1;
                }
                if end > s {
                    units.push(data.slice(s..end));
                }
            }
            i += 3;
            start = Some(i);
            continue;
        }
        i += 1;
    }

    if let Some(s) = start {
        if s < data.len() {
            units.push(data.slice(s..));
        }
    }

    units
}

/// Packs NAL units into the 4-byte length prefixed layout used in samples.
pub fn to_avcc<I, B>(units: I) -> Bytes
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for unit in units {
        let unit = unit.as_ref();
        out.put_u32(unit.len() as u32);
        out.put_slice(unit);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{FormatDescription, MediaKind, MediaTime, VideoFormat};
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use std::sync::Arc;

    fn sample(data: Bytes, is_key: bool) -> EncodedSample {
        let format = Arc::new(FormatDescription::Video(VideoFormat::new(
            16,
            16,
            vec![Bytes::from_static(&[0x67, 0x42, 0x0A]), Bytes::from_static(&[0x68, 0xCE])],
        )));
        EncodedSample::new(MediaKind::Video, data, MediaTime::new(0, 90_000), format)
            .with_key_flag(is_key)
    }

    #[test]
    fn test_key_frame_gets_parameter_sets() {
        let data = to_avcc([&[0x65, 0x88, 0x84][..]]);
        let out = to_annex_b(&sample(data, true)).unwrap();
        assert_eq!(
            &out[..],
            &[
                0, 0, 0, 1, 0x67, 0x42, 0x0A, //
                0, 0, 0, 1, 0x68, 0xCE, //
                0, 0, 0, 1, 0x65, 0x88, 0x84,
            ]
        );
    }

    #[test]
    fn test_delta_frame_has_no_parameter_sets() {
        let data = to_avcc([&[0x41, 0x9A][..], &[0x41, 0x9B, 0x01][..]]);
        let out = to_annex_b(&sample(data, false)).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x41, 0x9A, 0, 0, 0, 1, 0x41, 0x9B, 0x01]);
    }

    #[test]
    fn test_trailing_bytes_shorter_than_prefix_are_ignored() {
        let mut data = to_avcc([&[0x41, 0x01][..]]).to_vec();
        data.extend_from_slice(&[0x00, 0x00, 0x01]);
        let out = avcc_to_annex_b(&data, &[], 4).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x41, 0x01]);
    }

    #[test]
    fn test_zero_length_units_are_skipped() {
        let data = [0, 0, 0, 0, 0, 0, 0, 1, 0x09];
        let out = avcc_to_annex_b(&data, &[], 4).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x09]);
    }

    #[test]
    fn test_overlong_length_is_an_error() {
        let data = [0, 0, 0, 9, 0x41, 0x01];
        assert!(avcc_to_annex_b(&data, &[], 4).is_err());
        assert!(avcc_to_annex_b(&data, &[], 5).is_err());
    }

    #[test]
    fn test_audio_sample_is_rejected() {
        let format = Arc::new(FormatDescription::Audio(crate::av::AudioFormat {
            sample_rate: 44_100,
            channels: 1,
            profile: crate::codec::aac::ProfileType::LC,
            frames_per_packet: 1024,
        }));
        let s = EncodedSample::new(MediaKind::Audio, vec![1u8, 2], MediaTime::new(0, 1), format);
        assert!(to_annex_b(&s).is_err());
    }

    #[test]
    fn test_split_handles_three_byte_start_codes() {
        let units = split_annex_b(vec![0xAA, 0, 0, 1, 0x67, 0x01, 0, 0, 0, 1, 0x68, 0, 0, 1, 0x65]);
        assert_eq!(
            units,
            vec![
                Bytes::from_static(&[0x67, 0x01]),
                Bytes::from_static(&[0x68]),
                Bytes::from_static(&[0x65]),
            ]
        );
    }

    #[quickcheck]
    fn prop_annex_b_split_recovers_units(units: Vec<Vec<u8>>, key: bool) -> bool {
        // Start codes never occur inside a NAL unit payload.
        let units: Vec<Vec<u8>> = units
            .into_iter()
            .filter(|u| !u.is_empty())
            .map(|u| u.into_iter().map(|b| b | 0x01).collect())
            .collect();

        let s = sample(to_avcc(&units), key);
        let Ok(stream) = to_annex_b(&s) else {
            return false;
        };
        let split = split_annex_b(stream);

        let mut expected: Vec<Vec<u8>> = Vec::new();
        if key {
            expected.push(vec![0x67, 0x42, 0x0A]);
            expected.push(vec![0x68, 0xCE]);
        }
        expected.extend(units);

        split.iter().map(|b| b.to_vec()).collect::<Vec<_>>() == expected
    }
}
