//! Binary encoding using the Erlang external term format.
//!
//! Terms map onto [`Value`] the same way the gateway's own encoder maps JSON onto terms:
//! maps with binary keys, binaries for strings, `nil`/`true`/`false` atoms for null and booleans.

use serde_json::{Map, Number, Value};

use super::normalize_ids;
use crate::error::DecodeError;

const FORMAT_VERSION: u8 = 131;

const NEW_FLOAT_EXT: u8 = 70;
const SMALL_INTEGER_EXT: u8 = 97;
const INTEGER_EXT: u8 = 98;
const FLOAT_EXT: u8 = 99;
const ATOM_EXT: u8 = 100;
const SMALL_TUPLE_EXT: u8 = 104;
const LARGE_TUPLE_EXT: u8 = 105;
const NIL_EXT: u8 = 106;
const STRING_EXT: u8 = 107;
const LIST_EXT: u8 = 108;
const BINARY_EXT: u8 = 109;
const SMALL_BIG_EXT: u8 = 110;
const LARGE_BIG_EXT: u8 = 111;
const SMALL_ATOM_EXT: u8 = 115;
const MAP_EXT: u8 = 116;
const ATOM_UTF8_EXT: u8 = 118;
const SMALL_ATOM_UTF8_EXT: u8 = 119;

/// Decodes a term and normalizes integer ids to strings.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut reader = Reader { bytes, position: 0 };
    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(etf_error(format!("unsupported format version {version}")));
    }

    let mut value = reader.term()?;
    if reader.position != bytes.len() {
        return Err(etf_error("trailing bytes after term"));
    }

    normalize_ids(&mut value);
    Ok(value)
}

/// Encodes a value as a term, prefixed with the format version.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = vec![FORMAT_VERSION];
    write_term(&mut out, value);
    out
}

fn etf_error(message: impl Into<String>) -> DecodeError {
    DecodeError::Etf(message.into())
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = self.bytes;
        let end = self.position.checked_add(len).filter(|end| *end <= bytes.len())
            .ok_or_else(|| etf_error("unexpected end of term"))?;
        let slice = &bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn text(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| etf_error("string is not valid utf-8"))
    }

    fn term(&mut self) -> Result<Value, DecodeError> {
        let tag = self.u8()?;
        match tag {
            SMALL_INTEGER_EXT => Ok(Value::from(self.u8()?)),
            INTEGER_EXT => Ok(Value::from(self.u32()? as i32)),
            NEW_FLOAT_EXT => {
                let bytes = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                float(f64::from_be_bytes(raw))
            }
            FLOAT_EXT => {
                let text = self.text(31)?;
                let parsed = text.trim_end_matches('\0').trim().parse::<f64>()
                    .map_err(|_| etf_error("malformed float"))?;
                float(parsed)
            }
            ATOM_EXT | ATOM_UTF8_EXT => {
                let len = self.u16()? as usize;
                Ok(atom(self.text(len)?))
            }
            SMALL_ATOM_EXT | SMALL_ATOM_UTF8_EXT => {
                let len = self.u8()? as usize;
                Ok(atom(self.text(len)?))
            }
            SMALL_TUPLE_EXT => {
                let arity = self.u8()? as usize;
                self.sequence(arity)
            }
            LARGE_TUPLE_EXT => {
                let arity = self.u32()? as usize;
                self.sequence(arity)
            }
            NIL_EXT => Ok(Value::Array(Vec::new())),
            STRING_EXT => {
                let len = self.u16()? as usize;
                Ok(Value::String(self.text(len)?))
            }
            LIST_EXT => {
                let len = self.u32()? as usize;
                let list = self.sequence(len)?;
                // proper lists end in an empty list
                match self.term()? {
                    Value::Array(tail) if tail.is_empty() => Ok(list),
                    _ => Err(etf_error("improper lists are not supported")),
                }
            }
            BINARY_EXT => {
                let len = self.u32()? as usize;
                Ok(Value::String(self.text(len)?))
            }
            SMALL_BIG_EXT => {
                let len = self.u8()? as usize;
                self.big(len)
            }
            LARGE_BIG_EXT => {
                let len = self.u32()? as usize;
                self.big(len)
            }
            MAP_EXT => {
                let arity = self.u32()? as usize;
                let mut map = Map::new();
                for _ in 0..arity {
                    let key = match self.term()? {
                        Value::String(key) => key,
                        Value::Number(number) => number.to_string(),
                        Value::Bool(flag) => flag.to_string(),
                        Value::Null => "nil".to_owned(),
                        _ => return Err(etf_error("map keys must be atoms, binaries or integers")),
                    };
                    let value = self.term()?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
            other => Err(etf_error(format!("unsupported term tag {other}"))),
        }
    }

    fn sequence(&mut self, len: usize) -> Result<Value, DecodeError> {
        // never trust the declared length for the allocation
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.term()?);
        }
        Ok(Value::Array(items))
    }

    fn big(&mut self, len: usize) -> Result<Value, DecodeError> {
        let sign = self.u8()?;
        let digits = self.take(len)?;
        if len > 8 {
            return Err(etf_error("integers wider than 64 bits are not supported"));
        }

        let magnitude = digits.iter().rev().fold(0u64, |acc, digit| (acc << 8) | u64::from(*digit));
        if sign == 0 {
            return Ok(Value::from(magnitude));
        }

        match i64::try_from(magnitude) {
            Ok(positive) => Ok(Value::from(-positive)),
            Err(_) if magnitude == 1u64 << 63 => Ok(Value::from(i64::MIN)),
            Err(_) => Err(etf_error("negative integer out of range")),
        }
    }
}

fn float(value: f64) -> Result<Value, DecodeError> {
    Number::from_f64(value).map(Value::Number).ok_or_else(|| etf_error("non-finite float"))
}

fn atom(name: String) -> Value {
    match name.as_str() {
        "nil" | "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(name),
    }
}

fn write_term(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => write_atom(out, "nil"),
        Value::Bool(flag) => write_atom(out, if *flag { "true" } else { "false" }),
        Value::Number(number) => write_number(out, number),
        Value::String(text) => write_binary(out, text),
        Value::Array(items) => {
            if items.is_empty() {
                out.push(NIL_EXT);
                return;
            }
            out.push(LIST_EXT);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                write_term(out, item);
            }
            out.push(NIL_EXT);
        }
        Value::Object(map) => {
            out.push(MAP_EXT);
            out.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for (key, entry) in map {
                write_binary(out, key);
                write_term(out, entry);
            }
        }
    }
}

fn write_atom(out: &mut Vec<u8>, name: &str) {
    out.push(SMALL_ATOM_UTF8_EXT);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

fn write_binary(out: &mut Vec<u8>, text: &str) {
    out.push(BINARY_EXT);
    out.extend_from_slice(&(text.len() as u32).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
}

fn write_number(out: &mut Vec<u8>, number: &Number) {
    if let Some(unsigned) = number.as_u64() {
        if unsigned <= u64::from(u8::MAX) {
            out.push(SMALL_INTEGER_EXT);
            out.push(unsigned as u8);
        } else if unsigned <= i32::MAX as u64 {
            out.push(INTEGER_EXT);
            out.extend_from_slice(&(unsigned as i32).to_be_bytes());
        } else {
            write_big(out, 0, unsigned);
        }
    } else if let Some(signed) = number.as_i64() {
        if signed >= i64::from(i32::MIN) {
            out.push(INTEGER_EXT);
            out.extend_from_slice(&(signed as i32).to_be_bytes());
        } else {
            write_big(out, 1, signed.unsigned_abs());
        }
    } else if let Some(float) = number.as_f64() {
        out.push(NEW_FLOAT_EXT);
        out.extend_from_slice(&float.to_be_bytes());
    }
}

fn write_big(out: &mut Vec<u8>, sign: u8, magnitude: u64) {
    let digits: Vec<u8> = magnitude.to_le_bytes().into_iter().rev().skip_while(|byte| *byte == 0).collect();
    out.push(SMALL_BIG_EXT);
    out.push(digits.len() as u8);
    out.push(sign);
    out.extend(digits.into_iter().rev());
}
