//! Encodings for string entries written to the coordination service.
//!
//! Brokers read every entry as plain UTF-8 JSON. An entry written with
//! [`ObjectStreamSerializer`] carries a binary stream header in front of the JSON,
//! so a broker cannot decode it: the node exists, but the topic it describes is
//! never served.

use std::fmt;

use crate::error::CoordinationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFormat {
    /// Raw UTF-8 bytes.
    Utf8,
    /// Length-prefixed string inside an object-stream frame.
    ObjectStream,
}

impl fmt::Display for EntryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryFormat::Utf8 => write!(f, "utf8"),
            EntryFormat::ObjectStream => write!(f, "object-stream"),
        }
    }
}

pub trait EntrySerializer: Send + Sync + fmt::Debug {
    fn format(&self) -> EntryFormat;

    fn serialize(&self, value: &str) -> Vec<u8>;

    fn deserialize(&self, bytes: &[u8]) -> Result<String, CoordinationError>;
}

/// Plain UTF-8, the format brokers read.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl EntrySerializer for StringSerializer {
    fn format(&self) -> EntryFormat {
        EntryFormat::Utf8
    }

    fn serialize(&self, value: &str) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, CoordinationError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CoordinationError::from_parse_error(e, "decode utf8 entry"))
    }
}

const STREAM_MAGIC: [u8; 2] = [0xAC, 0xED];
const STREAM_VERSION: [u8; 2] = [0x00, 0x05];
const TC_STRING: u8 = 0x74;
const TC_LONGSTRING: u8 = 0x7C;
const HEADER_LEN: usize = 4;

/// Object-stream framing: magic, version, then a tagged, length-prefixed string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectStreamSerializer;

impl EntrySerializer for ObjectStreamSerializer {
    fn format(&self) -> EntryFormat {
        EntryFormat::ObjectStream
    }

    fn serialize(&self, value: &str) -> Vec<u8> {
        let bytes = value.as_bytes();
        let mut out = Vec::with_capacity(HEADER_LEN + 9 + bytes.len());
        out.extend_from_slice(&STREAM_MAGIC);
        out.extend_from_slice(&STREAM_VERSION);
        match u16::try_from(bytes.len()) {
            Ok(len) => {
                out.push(TC_STRING);
                out.extend_from_slice(&len.to_be_bytes());
            }
            Err(_) => {
                out.push(TC_LONGSTRING);
                out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
            }
        }
        out.extend_from_slice(bytes);
        out
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, CoordinationError> {
        let context = "decode object-stream entry";
        if bytes.len() < HEADER_LEN + 1
            || bytes[..2] != STREAM_MAGIC
            || bytes[2..HEADER_LEN] != STREAM_VERSION
        {
            return Err(CoordinationError::from_parse_error(
                "missing stream header",
                context,
            ));
        }

        let (len, body) = match bytes[HEADER_LEN] {
            TC_STRING => {
                let raw = bytes
                    .get(HEADER_LEN + 1..HEADER_LEN + 3)
                    .ok_or_else(|| CoordinationError::from_parse_error("truncated length", context))?;
                (
                    u16::from_be_bytes([raw[0], raw[1]]) as usize,
                    &bytes[HEADER_LEN + 3..],
                )
            }
            TC_LONGSTRING => {
                let raw: [u8; 8] = bytes
                    .get(HEADER_LEN + 1..HEADER_LEN + 9)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| CoordinationError::from_parse_error("truncated length", context))?;
                (u64::from_be_bytes(raw) as usize, &bytes[HEADER_LEN + 9..])
            }
            tag => {
                return Err(CoordinationError::from_parse_error(
                    format!("unexpected type tag 0x{tag:02x}"),
                    context,
                ));
            }
        };

        if body.len() != len {
            return Err(CoordinationError::from_parse_error(
                format!("expected {len} bytes, found {}", body.len()),
                context,
            ));
        }
        String::from_utf8(body.to_vec()).map_err(|e| CoordinationError::from_parse_error(e, context))
    }
}
