//! MessagePack encoding for event payloads.
//!
//! Payloads are written as maps with named fields so that producers in
//! other languages can read them without a shared schema.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a value as a MessagePack map
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a MessagePack payload
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(payload)?)
}
