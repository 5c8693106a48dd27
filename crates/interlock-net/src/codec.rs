//! Wire codec. Every packet is [`postcard`]-encoded and prefixed with a
//! protocol version byte.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Current wire-protocol version. Prepended to every encoded packet.
pub const PROTOCOL_VERSION: u8 = 1;

/// Errors that can occur while encoding or decoding a packet.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The buffer was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard failed to encode or decode the body.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Encodes `packet` with the version prefix.
pub fn encode<T: Serialize>(packet: &T) -> Result<Vec<u8>, CodecError> {
    let body = postcard::to_allocvec(packet)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a packet produced by [`encode`].
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let (&version, body) = data.split_first().ok_or(CodecError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
