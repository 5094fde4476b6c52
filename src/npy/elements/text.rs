//! Trait implementations for fixed-width text (`U` and `S` type codes).

use super::check_for_extra_bytes;
use crate::npy::{ReadDataError, ReadableElement};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use py_literal::Value as PyValue;
use std::error::Error;
use std::fmt;
use std::io;

#[derive(Debug)]
enum ParseTextError {
    CodePoint(u32),
    Utf8(std::string::FromUtf8Error),
}

impl Error for ParseTextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseTextError::CodePoint(_) => None,
            ParseTextError::Utf8(err) => Some(err),
        }
    }
}

impl fmt::Display for ParseTextError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseTextError::CodePoint(c) => write!(f, "invalid code point {:#x}", c),
            ParseTextError::Utf8(err) => write!(f, "byte string is not UTF-8: {}", err),
        }
    }
}

impl From<ParseTextError> for ReadDataError {
    fn from(err: ParseTextError) -> ReadDataError {
        ReadDataError::ParseData(Box::new(err))
    }
}

enum TextLayout {
    Ucs4Little(usize),
    Ucs4Big(usize),
    Bytes(usize),
}

impl TextLayout {
    fn from_descr(descr: &str) -> Option<TextLayout> {
        let (order, rest) = match descr.as_bytes().first()? {
            b'<' | b'>' | b'|' | b'=' => descr.split_at(1),
            _ => ("", descr),
        };
        let code = rest.get(..1)?;
        let width: usize = rest.get(1..)?.parse().ok()?;
        match (order, code) {
            ("<", "U") => Some(TextLayout::Ucs4Little(width)),
            (">", "U") => Some(TextLayout::Ucs4Big(width)),
            ("=", "U") | ("", "U") => Some(if cfg!(target_endian = "big") {
                TextLayout::Ucs4Big(width)
            } else {
                TextLayout::Ucs4Little(width)
            }),
            ("|", "S") | ("", "S") => Some(TextLayout::Bytes(width)),
            _ => None,
        }
    }

    fn item_size(&self) -> usize {
        match *self {
            TextLayout::Ucs4Little(width) | TextLayout::Ucs4Big(width) => width * 4,
            TextLayout::Bytes(width) => width,
        }
    }

    /// Decodes one element. NumPy pads short strings with NULs, which are
    /// stripped.
    fn decode(&self, item: &[u8]) -> Result<String, ParseTextError> {
        match *self {
            TextLayout::Ucs4Little(_) | TextLayout::Ucs4Big(_) => {
                let mut out = String::new();
                for unit in item.chunks_exact(4) {
                    let code = match *self {
                        TextLayout::Ucs4Big(_) => BigEndian::read_u32(unit),
                        _ => LittleEndian::read_u32(unit),
                    };
                    if code == 0 {
                        break;
                    }
                    out.push(char::from_u32(code).ok_or(ParseTextError::CodePoint(code))?);
                }
                Ok(out)
            }
            TextLayout::Bytes(_) => {
                let end = item.iter().position(|&b| b == 0).unwrap_or(item.len());
                String::from_utf8(item[..end].to_vec()).map_err(ParseTextError::Utf8)
            }
        }
    }
}

impl ReadableElement for String {
    fn read_to_end_exact_vec<R: io::Read>(
        mut reader: R,
        type_desc: &PyValue,
        len: usize,
    ) -> Result<Vec<Self>, ReadDataError> {
        let layout = match *type_desc {
            PyValue::String(ref s) => TextLayout::from_descr(s),
            _ => None,
        }
        .ok_or_else(|| ReadDataError::WrongDescriptor(type_desc.clone()))?;
        let total = len
            .checked_mul(layout.item_size())
            .ok_or(ReadDataError::LengthOverflow)?;
        let mut bytes = vec![0; total];
        reader.read_exact(&mut bytes)?;
        check_for_extra_bytes(&mut reader)?;
        if layout.item_size() == 0 {
            return Ok(vec![String::new(); len]);
        }
        Ok(bytes
            .chunks_exact(layout.item_size())
            .map(|item| layout.decode(item))
            .collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ucs4_le(items: &[&str], width: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for item in items {
            let mut chars: Vec<u32> = item.chars().map(|c| c as u32).collect();
            chars.resize(width, 0);
            for c in chars {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn read_unicode_little_endian() {
        let bytes = ucs4_le(&["ap", "dv", "lr"], 2);
        let desc = PyValue::String("<U2".into());
        let out = String::read_to_end_exact_vec(&bytes[..], &desc, 3).unwrap();
        assert_eq!(out, vec!["ap", "dv", "lr"]);
    }

    #[test]
    fn strip_padding() {
        let bytes = ucs4_le(&["VISp", "CA1", ""], 5);
        let desc = PyValue::String("<U5".into());
        let out = String::read_to_end_exact_vec(&bytes[..], &desc, 3).unwrap();
        assert_eq!(out, vec!["VISp", "CA1", ""]);
    }

    #[test]
    fn read_byte_strings() {
        let desc = PyValue::String("|S3".into());
        let out = String::read_to_end_exact_vec(&b"MOsab\0"[..], &desc, 2).unwrap();
        assert_eq!(out, vec!["MOs", "ab"]);
    }

    #[test]
    fn reject_numeric_descriptor() {
        let desc = PyValue::String("<f8".into());
        assert!(matches!(
            String::read_to_end_exact_vec(&[0u8; 8][..], &desc, 1),
            Err(ReadDataError::WrongDescriptor(_))
        ));
    }
}
