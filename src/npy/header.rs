//! The `.npy` preamble: magic string, version, and the header dict.

use byteorder::{ByteOrder, LittleEndian};
use num_traits::ToPrimitive;
use py_literal::{ParseError as PyValueParseError, Value as PyValue};
use std::error::Error;
use std::fmt;
use std::io;

const MAGIC_STRING: &[u8] = b"\x93NUMPY";

/// Bytes after the magic string: major and minor version.
const VERSION_LEN: usize = 2;

#[derive(Debug)]
pub enum ParseHeaderError {
    MagicString,
    Version { major: u8, minor: u8 },
    /// Version 1.0 and 2.0 headers must be ASCII.
    NonAscii,
    Utf8(std::str::Utf8Error),
    Dict(PyValueParseError),
    NotADict(PyValue),
    MissingKey(&'static str),
    UnknownKey(PyValue),
    IllegalValue { key: &'static str, value: PyValue },
    MissingNewline,
}

impl Error for ParseHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseHeaderError::Utf8(err) => Some(err),
            ParseHeaderError::Dict(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ParseHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseHeaderError::MagicString => write!(f, "not an .npy file (bad magic string)"),
            ParseHeaderError::Version { major, minor } => {
                write!(f, "unsupported .npy version {}.{}", major, minor)
            }
            ParseHeaderError::NonAscii => {
                write!(f, "header of a version 1.0 or 2.0 file is not ASCII")
            }
            ParseHeaderError::Utf8(err) => write!(f, "header is not UTF-8: {}", err),
            ParseHeaderError::Dict(err) => write!(f, "cannot parse header dict: {}", err),
            ParseHeaderError::NotADict(value) => write!(f, "header is not a dict: {}", value),
            ParseHeaderError::MissingKey(key) => write!(f, "header has no '{}'", key),
            ParseHeaderError::UnknownKey(key) => write!(f, "unexpected header key {}", key),
            ParseHeaderError::IllegalValue { key, value } => {
                write!(f, "illegal value for '{}': {}", key, value)
            }
            ParseHeaderError::MissingNewline => write!(f, "header does not end with a newline"),
        }
    }
}

impl From<std::str::Utf8Error> for ParseHeaderError {
    fn from(err: std::str::Utf8Error) -> ParseHeaderError {
        ParseHeaderError::Utf8(err)
    }
}

impl From<PyValueParseError> for ParseHeaderError {
    fn from(err: PyValueParseError) -> ParseHeaderError {
        ParseHeaderError::Dict(err)
    }
}

#[derive(Debug)]
pub enum ReadHeaderError {
    Io(io::Error),
    Parse(ParseHeaderError),
}

impl Error for ReadHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadHeaderError::Io(err) => Some(err),
            ReadHeaderError::Parse(err) => Some(err),
        }
    }
}

impl fmt::Display for ReadHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadHeaderError::Io(err) => write!(f, "I/O error: {}", err),
            ReadHeaderError::Parse(err) => write!(f, "{}", err),
        }
    }
}

impl From<io::Error> for ReadHeaderError {
    fn from(err: io::Error) -> ReadHeaderError {
        ReadHeaderError::Io(err)
    }
}

impl From<ParseHeaderError> for ReadHeaderError {
    fn from(err: ParseHeaderError) -> ReadHeaderError {
        ReadHeaderError::Parse(err)
    }
}

/// Width of the little-endian `HEADER_LEN` field for a version, and whether
/// the header may be UTF-8 rather than ASCII.
fn length_field(major: u8, minor: u8) -> Result<(usize, bool), ParseHeaderError> {
    match (major, minor) {
        (1, 0) => Ok((2, false)),
        (2, 0) => Ok((4, false)),
        (3, 0) => Ok((4, true)),
        _ => Err(ParseHeaderError::Version { major, minor }),
    }
}

/// The dictionary at the start of an `.npy` file.
#[derive(Clone, Debug)]
pub struct Header {
    pub type_descriptor: PyValue,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

fn key_name(key: &PyValue) -> Option<&'static str> {
    match key {
        PyValue::String(k) => ["descr", "fortran_order", "shape"]
            .into_iter()
            .find(|name| *name == k.as_str()),
        _ => None,
    }
}

fn parse_shape(value: &PyValue) -> Option<Vec<usize>> {
    value
        .as_tuple()?
        .iter()
        .map(|len| len.as_integer()?.to_usize())
        .collect()
}

impl Header {
    fn from_py_value(value: PyValue) -> Result<Self, ParseHeaderError> {
        let entries = match value {
            PyValue::Dict(entries) => entries,
            other => return Err(ParseHeaderError::NotADict(other)),
        };
        let (mut descr, mut fortran_order, mut shape) = (None, None, None);
        for (key, value) in entries {
            match key_name(&key) {
                Some("descr") => descr = Some(value),
                Some("fortran_order") => match value {
                    PyValue::Boolean(b) => fortran_order = Some(b),
                    value => {
                        return Err(ParseHeaderError::IllegalValue {
                            key: "fortran_order",
                            value,
                        })
                    }
                },
                Some(_shape) => match parse_shape(&value) {
                    Some(dims) => shape = Some(dims),
                    None => return Err(ParseHeaderError::IllegalValue { key: "shape", value }),
                },
                None => return Err(ParseHeaderError::UnknownKey(key)),
            }
        }
        Ok(Header {
            type_descriptor: descr.ok_or(ParseHeaderError::MissingKey("descr"))?,
            fortran_order: fortran_order.ok_or(ParseHeaderError::MissingKey("fortran_order"))?,
            shape: shape.ok_or(ParseHeaderError::MissingKey("shape"))?,
        })
    }

    /// Reads the preamble, leaving `reader` at the first byte of data.
    pub fn from_reader<R: io::Read>(mut reader: R) -> Result<Self, ReadHeaderError> {
        let mut preamble = [0; MAGIC_STRING.len() + VERSION_LEN];
        reader.read_exact(&mut preamble)?;
        let (magic, version) = preamble.split_at(MAGIC_STRING.len());
        if magic != MAGIC_STRING {
            return Err(ParseHeaderError::MagicString.into());
        }
        let (width, utf8) = length_field(version[0], version[1])?;

        let mut len = [0; 4];
        reader.read_exact(&mut len[..width])?;
        let len = match width {
            2 => LittleEndian::read_u16(&len) as usize,
            _ => LittleEndian::read_u32(&len) as usize,
        };

        let mut dict = vec![0; len];
        reader.read_exact(&mut dict)?;
        let dict = match dict.split_last() {
            Some((&b'\n', rest)) => rest,
            _ => return Err(ParseHeaderError::MissingNewline.into()),
        };
        if !utf8 && !dict.is_ascii() {
            return Err(ParseHeaderError::NonAscii.into());
        }
        let dict = std::str::from_utf8(dict).map_err(ParseHeaderError::from)?;
        let value: PyValue = dict.parse().map_err(ParseHeaderError::from)?;
        Ok(Header::from_py_value(value)?)
    }

    /// Returns the type descriptor as a string, e.g. `"<f8"` or `"|O"`.
    ///
    /// Structured (record) descriptors are lists, not strings, and return
    /// `None`.
    pub fn descr(&self) -> Option<&str> {
        match self.type_descriptor {
            PyValue::String(ref s) => Some(s),
            _ => None,
        }
    }

    /// Number of elements described by `shape`, or `None` on overflow.
    pub fn num_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &len| acc.checked_mul(len))
    }
}
