//! Text encoding, one JSON object per frame.

use crate::error::DecodeError;
use crate::gateway_structs::Payload;

pub fn decode(bytes: &[u8]) -> Result<Payload, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode(payload: &Payload) -> Result<String, DecodeError> {
    Ok(serde_json::to_string(payload)?)
}
