//! Wire codec for gateway frames.
//!
//! Inbound frames pass an optional decompression stage ([`zlib::ZlibStream`]) and are then decoded
//! with the negotiated [`Encoding`] into a [`Payload`]. Outbound payloads are only encoded, the
//! gateway never expects compressed client frames.

pub mod etf;
pub mod json;
pub mod zlib;

use serde_json::Value;

use crate::error::DecodeError;
use crate::gateway_structs::Payload;
use zlib::ZlibStream;

/// Payload encoding negotiated through the `encoding` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Etf,
}

impl Encoding {
    /// Name used in the gateway query string.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Etf => "etf",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Encoding::Json),
            "etf" => Some(Encoding::Etf),
            _ => None,
        }
    }
}

/// Transport compression negotiated through the `compress` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    ZlibStream,
}

impl Compression {
    /// Name used in the gateway query string, `None` when no parameter is sent.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::ZlibStream => Some("zlib-stream"),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "none" => Some(Compression::None),
            "zlib-stream" => Some(Compression::ZlibStream),
            _ => None,
        }
    }
}

/// A raw websocket frame, independent of the websocket library.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Stateful codec for one gateway connection.
pub struct WireCodec {
    encoding: Encoding,
    compression: Compression,
    inflater: Option<ZlibStream>,
}

impl WireCodec {
    pub fn new(encoding: Encoding, compression: Compression) -> Self {
        let mut codec = Self { encoding, compression, inflater: None };
        codec.reset();
        codec
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Starts a fresh inflate context. Must be called for every new socket.
    pub fn reset(&mut self) {
        self.inflater = match self.compression {
            Compression::ZlibStream => Some(ZlibStream::new()),
            Compression::None => None,
        };
    }

    /// Decodes one inbound frame.
    ///
    /// Returns `Ok(None)` while a compressed message is still incomplete.
    pub fn decode(&mut self, frame: Frame) -> Result<Option<Payload>, DecodeError> {
        let bytes = match (&mut self.inflater, frame) {
            (Some(inflater), Frame::Binary(bytes)) => match inflater.push(&bytes)? {
                Some(inflated) => inflated,
                None => return Ok(None),
            },
            (_, Frame::Text(text)) => {
                if self.encoding == Encoding::Etf {
                    return Err(DecodeError::UnexpectedFrame("text"));
                }
                text.into_bytes()
            }
            (None, Frame::Binary(bytes)) => bytes,
        };

        let payload = match self.encoding {
            Encoding::Json => json::decode(&bytes)?,
            Encoding::Etf => {
                let value = etf::decode(&bytes)?;
                serde_json::from_value(value)?
            }
        };
        Ok(Some(payload))
    }

    /// Encodes an outbound payload into the frame type of the negotiated encoding.
    pub fn encode(&self, payload: &Payload<Value>) -> Result<Frame, DecodeError> {
        match self.encoding {
            Encoding::Json => Ok(Frame::Text(json::encode(payload)?)),
            Encoding::Etf => {
                let value = serde_json::to_value(payload)?;
                Ok(Frame::Binary(etf::encode(&value)))
            }
        }
    }
}

/// Converts integer values stored under `id` or `*_id` keys into strings, recursively.
pub fn normalize_ids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let id_key = key == "id" || key.ends_with("_id");
                let integer = match entry {
                    Value::Number(number) if number.is_u64() || number.is_i64() => Some(number.to_string()),
                    _ => None,
                };
                match integer {
                    Some(text) if id_key => *entry = Value::String(text),
                    _ => normalize_ids(entry),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_ids),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn representative() -> Payload {
        Payload {
            opcode: 0,
            data: json!({
                "id": 175928847299117063u64,
                "guild_id": 41771983423143937u64,
                "content": "hello",
                "pinned": false,
                "edited_timestamp": null,
                "ratio": 0.5,
                "mentions": [{"id": 80351110224678912u64, "username": "Nelly"}],
                "nested": {"channel_id": 7, "count": 3},
            }),
            sequence_number: Some(42),
            event_name: Some("MESSAGE_CREATE".into()),
        }
    }

    #[test]
    fn json_round_trip_is_identity() {
        let mut codec = WireCodec::new(Encoding::Json, Compression::None);
        let payload = representative();
        let frame = codec.encode(&payload).unwrap();
        assert!(matches!(frame, Frame::Text(_)));
        assert_eq!(codec.decode(frame).unwrap(), Some(payload));
    }

    #[test]
    fn etf_round_trip_stringifies_ids() {
        let mut codec = WireCodec::new(Encoding::Etf, Compression::None);
        let payload = representative();
        let frame = codec.encode(&payload).unwrap();
        assert!(matches!(frame, Frame::Binary(_)));

        let decoded = codec.decode(frame).unwrap().unwrap();
        let mut expected = payload;
        normalize_ids(&mut expected.data);
        assert_eq!(decoded, expected);
        assert_eq!(decoded.data["id"], json!("175928847299117063"));
        assert_eq!(decoded.data["mentions"][0]["id"], json!("80351110224678912"));
        assert_eq!(decoded.data["nested"]["channel_id"], json!("7"));
        assert_eq!(decoded.data["nested"]["count"], json!(3));
    }

    #[test]
    fn etf_rejects_text_frames() {
        let mut codec = WireCodec::new(Encoding::Etf, Compression::None);
        let result = codec.decode(Frame::Text("{}".into()));
        assert!(matches!(result, Err(DecodeError::UnexpectedFrame("text"))));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mut codec = WireCodec::new(Encoding::Json, Compression::None);
        assert!(codec.decode(Frame::Text("{\"op\":".into())).is_err());
    }

    #[test]
    fn names_match_query_parameters() {
        assert_eq!(Encoding::from_name("etf"), Some(Encoding::Etf));
        assert_eq!(Encoding::Json.name(), "json");
        assert_eq!(Compression::ZlibStream.name(), Some("zlib-stream"));
        assert_eq!(Compression::from_name("gzip"), None);
    }
}
