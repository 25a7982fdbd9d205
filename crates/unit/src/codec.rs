//! Binary encoding of units: `GRFT` magic, little-endian `u16` format
//! version, then the MessagePack-encoded [`Unit`].

use crate::types::Unit;
use crate::verify::{verify, VerifyError};

pub const MAGIC: [u8; 4] = *b"GRFT";
pub const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too short for unit header ({0} bytes)")]
    TooShort(usize),

    #[error("bad magic: not a unit file")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
}

/// Verify and serialize a unit.
pub fn encode(unit: &Unit) -> Result<Vec<u8>, CodecError> {
    verify(unit)?;
    let body = rmp_serde::to_vec_named(unit)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse and verify a unit.
pub fn decode(bytes: &[u8]) -> Result<Unit, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TooShort(bytes.len()));
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let unit: Unit = rmp_serde::from_slice(&bytes[HEADER_LEN..])?;
    verify(&unit)?;
    Ok(unit)
}
