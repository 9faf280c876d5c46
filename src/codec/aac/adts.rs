use bytes::{BufMut, Bytes, BytesMut};

use super::types::{AACConfig, ADTSHeader, ADTS_HEADER_LEN};
use crate::error::{CapError, Result};

/// Prefixes a raw AAC-LC 44.1 kHz mono frame with its ADTS header.
pub fn to_adts(payload: &[u8]) -> Result<Bytes> {
    to_adts_with(&AACConfig::default(), payload)
}

/// Prefixes a raw AAC frame with an ADTS header describing `config`.
pub fn to_adts_with(config: &AACConfig, payload: &[u8]) -> Result<Bytes> {
    if payload.is_empty() {
        return Err(CapError::Codec("empty AAC payload".into()));
    }

    let header = ADTSHeader::for_payload(config, payload.len())?;
    let mut out = BytesMut::with_capacity(ADTS_HEADER_LEN + payload.len());
    out.put_slice(&header.to_bytes()?);
    out.put_slice(payload);
    Ok(out.freeze())
}
