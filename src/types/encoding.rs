//! Text encodings declared through the reserved instance variables.
//!
//! Two attribute keys are reserved on serialized strings and regexps:
//! `E` (true for UTF-8, false for US-ASCII) and `encoding`, a raw byte
//! string naming anything else (`UTF-16`, `Shift_JIS`, ...). The UTF
//! families are transcoded here; every other name falls back to a
//! byte-preserving Latin-1 mapping so the original wire bytes survive a
//! decode/encode round trip even when the host cannot interpret them.

use crate::error::Error;
use crate::types::{Attributes, RubyValue};

/// Reserved attribute key for the UTF-8/US-ASCII short form.
pub const ATTR_SHORT_FORM: &str = "E";

/// Reserved attribute key naming any other encoding.
pub const ATTR_ENCODING: &str = "encoding";

/// A text encoding a serialized string declares for its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// US-ASCII and unmarked payloads: every byte maps to the code point
    /// of the same value, which round-trips arbitrary bytes.
    Binary,
    /// BOM-aware UTF-16; encodes little-endian with a BOM.
    Utf16,
    Utf16Le,
    Utf16Be,
    /// BOM-aware UTF-32; encodes little-endian with a BOM.
    Utf32,
    Utf32Le,
    Utf32Be,
    /// Any other declared name; treated as Latin-1 so the bytes are kept.
    Other(String),
}

impl Encoding {
    pub fn from_name(name: &str) -> Encoding {
        if name.eq_ignore_ascii_case("UTF-8") {
            Encoding::Utf8
        } else if name.eq_ignore_ascii_case("US-ASCII")
            || name.eq_ignore_ascii_case("ASCII-8BIT")
            || name.eq_ignore_ascii_case("BINARY")
        {
            Encoding::Binary
        } else if name.eq_ignore_ascii_case("UTF-16") {
            Encoding::Utf16
        } else if name.eq_ignore_ascii_case("UTF-16LE") {
            Encoding::Utf16Le
        } else if name.eq_ignore_ascii_case("UTF-16BE") {
            Encoding::Utf16Be
        } else if name.eq_ignore_ascii_case("UTF-32") {
            Encoding::Utf32
        } else if name.eq_ignore_ascii_case("UTF-32LE") {
            Encoding::Utf32Le
        } else if name.eq_ignore_ascii_case("UTF-32BE") {
            Encoding::Utf32Be
        } else {
            Encoding::Other(name.to_string())
        }
    }

    /// Derives the payload encoding from an attribute list.
    ///
    /// Attributes are scanned in wire order and the last encoding key
    /// wins; a list without any encoding key means an unmarked byte
    /// string.
    pub fn from_attributes(attributes: &Attributes) -> Encoding {
        let mut encoding = Encoding::Binary;
        for (name, value) in attributes.iter() {
            if name.get_name() == ATTR_SHORT_FORM {
                encoding = match value {
                    RubyValue::Bool(true) => Encoding::Utf8,
                    _ => Encoding::Binary,
                };
            } else if name.get_name() == ATTR_ENCODING {
                match value {
                    RubyValue::Bytes(bytes) => {
                        let name: String =
                            bytes.borrow().iter().map(|b| *b as char).collect();
                        encoding = Encoding::from_name(&name);
                    }
                    RubyValue::String(text) => {
                        encoding = Encoding::from_name(text.borrow().get_text());
                    }
                    _ => {}
                }
            }
        }
        encoding
    }

    /// Decodes payload bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, Error> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::EncodingFailure("payload is not valid UTF-8".to_string())),
            Encoding::Binary | Encoding::Other(_) => {
                Ok(bytes.iter().map(|b| *b as char).collect())
            }
            Encoding::Utf16 => match bytes {
                [0xFE, 0xFF, rest @ ..] => decode_utf16_units(rest, false),
                [0xFF, 0xFE, rest @ ..] => decode_utf16_units(rest, true),
                _ => decode_utf16_units(bytes, true),
            },
            Encoding::Utf16Le => decode_utf16_units(bytes, true),
            Encoding::Utf16Be => decode_utf16_units(bytes, false),
            Encoding::Utf32 => match bytes {
                [0x00, 0x00, 0xFE, 0xFF, rest @ ..] => decode_utf32_units(rest, false),
                [0xFF, 0xFE, 0x00, 0x00, rest @ ..] => decode_utf32_units(rest, true),
                _ => decode_utf32_units(bytes, true),
            },
            Encoding::Utf32Le => decode_utf32_units(bytes, true),
            Encoding::Utf32Be => decode_utf32_units(bytes, false),
        }
    }

    /// Encodes text back into payload bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, Error> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Binary => encode_latin1(text, "US-ASCII"),
            Encoding::Other(name) => encode_latin1(text, name),
            Encoding::Utf16 => {
                let mut out = vec![0xFF, 0xFE];
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                Ok(out)
            }
            Encoding::Utf16Le => {
                Ok(text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect())
            }
            Encoding::Utf16Be => {
                Ok(text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect())
            }
            Encoding::Utf32 => {
                let mut out = vec![0xFF, 0xFE, 0x00, 0x00];
                for ch in text.chars() {
                    out.extend_from_slice(&(ch as u32).to_le_bytes());
                }
                Ok(out)
            }
            Encoding::Utf32Le => Ok(text.chars().flat_map(|c| (c as u32).to_le_bytes()).collect()),
            Encoding::Utf32Be => Ok(text.chars().flat_map(|c| (c as u32).to_be_bytes()).collect()),
        }
    }
}

fn decode_utf16_units(bytes: &[u8], little_endian: bool) -> Result<String, Error> {
    if bytes.len() % 2 != 0 {
        return Err(Error::EncodingFailure(
            "UTF-16 payload has an odd byte count".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            if little_endian {
                u16::from_le_bytes(pair)
            } else {
                u16::from_be_bytes(pair)
            }
        })
        .collect();
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| Error::EncodingFailure("payload is not valid UTF-16".to_string()))
}

fn decode_utf32_units(bytes: &[u8], little_endian: bool) -> Result<String, Error> {
    if bytes.len() % 4 != 0 {
        return Err(Error::EncodingFailure(
            "UTF-32 payload is not a multiple of four bytes".to_string(),
        ));
    }
    bytes
        .chunks_exact(4)
        .map(|quad| {
            let quad = [quad[0], quad[1], quad[2], quad[3]];
            let unit = if little_endian {
                u32::from_le_bytes(quad)
            } else {
                u32::from_be_bytes(quad)
            };
            char::from_u32(unit).ok_or_else(|| {
                Error::EncodingFailure("payload is not valid UTF-32".to_string())
            })
        })
        .collect()
}

fn encode_latin1(text: &str, name: &str) -> Result<Vec<u8>, Error> {
    text.chars()
        .map(|ch| {
            u8::try_from(ch as u32).map_err(|_| {
                Error::EncodingFailure(format!("cannot encode {:?} as {}", ch, name))
            })
        })
        .collect()
}
