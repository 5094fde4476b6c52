//! Trait implementations for `bool`.

use super::check_for_extra_bytes;
use crate::npy::{ReadDataError, ReadableElement};
use py_literal::Value as PyValue;
use std::error::Error;
use std::fmt;
use std::io;

/// An error parsing a `bool` from a byte.
#[derive(Debug)]
struct ParseBoolError {
    bad_value: u8,
}

impl Error for ParseBoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl fmt::Display for ParseBoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error parsing value {:#04x} as a bool", self.bad_value)
    }
}

impl From<ParseBoolError> for ReadDataError {
    fn from(err: ParseBoolError) -> ReadDataError {
        ReadDataError::ParseData(Box::new(err))
    }
}

fn parse_bool(byte: u8) -> Result<bool, ParseBoolError> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        bad_value => Err(ParseBoolError { bad_value }),
    }
}

impl ReadableElement for bool {
    fn read_to_end_exact_vec<R: io::Read>(
        mut reader: R,
        type_desc: &PyValue,
        len: usize,
    ) -> Result<Vec<Self>, ReadDataError> {
        match *type_desc {
            PyValue::String(ref s) if s == "|b1" || s == "b1" || s == "?" => {
                let mut bytes: Vec<u8> = vec![0; len];
                reader.read_exact(&mut bytes)?;
                check_for_extra_bytes(&mut reader)?;
                Ok(bytes
                    .into_iter()
                    .map(parse_bool)
                    .collect::<Result<_, _>>()?)
            }
            ref other => Err(ReadDataError::WrongDescriptor(other.clone())),
        }
    }
}
