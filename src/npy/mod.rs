mod array;
mod elements;
pub mod header;

pub use self::array::{ElementKind, NpyArray, NpyData};
pub(crate) use self::array::wrap_to_i8;

use self::header::{Header, ParseHeaderError, ReadHeaderError};
use crate::pickle::{PyObject, UnpickleError, Unpickler};
use ndarray::ShapeError;
use py_literal::Value as PyValue;
use std::error::Error;
use std::fmt;
use std::io;

/// An error reading array data.
#[derive(Debug)]
pub enum ReadDataError {
    /// An error caused by I/O.
    Io(io::Error),
    /// The type descriptor does not match the element type.
    WrongDescriptor(PyValue),
    /// The number of bytes needed overflows `usize`.
    LengthOverflow,
    /// The file does not contain all the data described in the header.
    MissingData,
    /// Extra bytes are present between the end of the data and the end of the
    /// file.
    ExtraBytes(usize),
    /// An error parsing the data.
    ParseData(Box<dyn Error + Send + Sync>),
}

impl Error for ReadDataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadDataError::Io(err) => Some(err),
            ReadDataError::WrongDescriptor(_) => None,
            ReadDataError::LengthOverflow => None,
            ReadDataError::MissingData => None,
            ReadDataError::ExtraBytes(_) => None,
            ReadDataError::ParseData(err) => Some(&**err),
        }
    }
}

impl fmt::Display for ReadDataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadDataError::Io(err) => write!(f, "I/O error: {}", err),
            ReadDataError::WrongDescriptor(desc) => {
                write!(f, "incorrect descriptor ({}) for this type", desc)
            }
            ReadDataError::LengthOverflow => write!(f, "data length overflows usize"),
            ReadDataError::MissingData => write!(f, "reached EOF before reading all data"),
            ReadDataError::ExtraBytes(num_extra_bytes) => {
                write!(f, "file had {} extra bytes before EOF", num_extra_bytes)
            }
            ReadDataError::ParseData(err) => write!(f, "error parsing data: {}", err),
        }
    }
}

impl From<io::Error> for ReadDataError {
    /// Performs the conversion.
    ///
    /// If the error kind is `UnexpectedEof`, the `MissingData` variant is
    /// returned. Otherwise, the `Io` variant is returned.
    fn from(err: io::Error) -> ReadDataError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ReadDataError::MissingData
        } else {
            ReadDataError::Io(err)
        }
    }
}

/// An array element type that can be decoded from the raw bytes of an `.npy`
/// file or a pickled NumPy array.
pub trait ReadableElement: Sized {
    /// Reads exactly `len` elements laid out as described by `type_desc`.
    ///
    /// Returns `Err` if `reader` holds fewer or more bytes than that.
    fn read_to_end_exact_vec<R: io::Read>(
        reader: R,
        type_desc: &PyValue,
        len: usize,
    ) -> Result<Vec<Self>, ReadDataError>;
}

/// An error reading an `.npy` file or decoding a NumPy array.
#[derive(Debug)]
pub enum ReadNpyError {
    /// An error caused by I/O.
    Io(io::Error),
    /// An error parsing the file header.
    ParseHeader(ParseHeaderError),
    /// An error parsing the data.
    ParseData(Box<dyn Error + Send + Sync>),
    /// An error interpreting the pickle stream of an object array.
    Unpickle(UnpickleError),
    /// Overflow while computing the length of the array from the shape
    /// described in the file header.
    LengthOverflow,
    /// The type descriptor does not match the requested element type.
    WrongDescriptor(PyValue),
    /// The file does not contain all the data described in the header.
    MissingData,
    /// Extra bytes are present between the end of the data and the end of the
    /// file.
    ExtraBytes(usize),
    /// The data does not fit the shape in the header.
    Shape(ShapeError),
    /// An element of an object array has the wrong Python type.
    ObjectElement {
        expected: &'static str,
        found: &'static str,
    },
    /// The pickle stream of an object array did not hold an array.
    NotAnArray(&'static str),
}

impl Error for ReadNpyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadNpyError::Io(err) => Some(err),
            ReadNpyError::ParseHeader(err) => Some(err),
            ReadNpyError::ParseData(err) => Some(&**err),
            ReadNpyError::Unpickle(err) => Some(err),
            ReadNpyError::LengthOverflow => None,
            ReadNpyError::WrongDescriptor(_) => None,
            ReadNpyError::MissingData => None,
            ReadNpyError::ExtraBytes(_) => None,
            ReadNpyError::Shape(err) => Some(err),
            ReadNpyError::ObjectElement { .. } => None,
            ReadNpyError::NotAnArray(_) => None,
        }
    }
}

impl fmt::Display for ReadNpyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadNpyError::Io(err) => write!(f, "I/O error: {}", err),
            ReadNpyError::ParseHeader(err) => write!(f, "error parsing header: {}", err),
            ReadNpyError::ParseData(err) => write!(f, "error parsing data: {}", err),
            ReadNpyError::Unpickle(err) => write!(f, "error reading object array: {}", err),
            ReadNpyError::LengthOverflow => write!(f, "overflow computing length from shape"),
            ReadNpyError::WrongDescriptor(desc) => {
                write!(f, "incorrect descriptor ({}) for this type", desc)
            }
            ReadNpyError::MissingData => write!(f, "reached EOF before reading all data"),
            ReadNpyError::ExtraBytes(num_extra_bytes) => {
                write!(f, "file had {} extra bytes before EOF", num_extra_bytes)
            }
            ReadNpyError::Shape(err) => write!(f, "data does not match shape: {}", err),
            ReadNpyError::ObjectElement { expected, found } => {
                write!(f, "expected {} in object array, found {}", expected, found)
            }
            ReadNpyError::NotAnArray(found) => {
                write!(f, "object array payload unpickled to {}, not an ndarray", found)
            }
        }
    }
}

impl From<io::Error> for ReadNpyError {
    fn from(err: io::Error) -> ReadNpyError {
        ReadNpyError::Io(err)
    }
}

impl From<ReadHeaderError> for ReadNpyError {
    fn from(err: ReadHeaderError) -> ReadNpyError {
        match err {
            ReadHeaderError::Io(err) => ReadNpyError::Io(err),
            ReadHeaderError::Parse(err) => ReadNpyError::ParseHeader(err),
        }
    }
}

impl From<ReadDataError> for ReadNpyError {
    fn from(err: ReadDataError) -> ReadNpyError {
        match err {
            ReadDataError::Io(err) => ReadNpyError::Io(err),
            ReadDataError::WrongDescriptor(desc) => ReadNpyError::WrongDescriptor(desc),
            ReadDataError::LengthOverflow => ReadNpyError::LengthOverflow,
            ReadDataError::MissingData => ReadNpyError::MissingData,
            ReadDataError::ExtraBytes(nbytes) => ReadNpyError::ExtraBytes(nbytes),
            ReadDataError::ParseData(err) => ReadNpyError::ParseData(err),
        }
    }
}

impl From<UnpickleError> for ReadNpyError {
    fn from(err: UnpickleError) -> ReadNpyError {
        ReadNpyError::Unpickle(err)
    }
}

impl From<ShapeError> for ReadNpyError {
    fn from(err: ShapeError) -> ReadNpyError {
        ReadNpyError::Shape(err)
    }
}

/// Reads an `.npy` file whose element type is only known at runtime.
///
/// Object arrays (descriptor `|O`) carry a pickle stream after the header;
/// it is interpreted and the array it describes is returned. Every other
/// descriptor is returned as raw bytes, to be decoded with
/// [`NpyArray::read`] or one of the widening conversions.
pub fn read_npy<R: io::Read>(mut reader: R) -> Result<NpyArray, ReadNpyError> {
    let header = Header::from_reader(&mut reader)?;
    let descr = match header.descr() {
        Some(descr) => descr.to_owned(),
        None => return Err(ReadNpyError::WrongDescriptor(header.type_descriptor)),
    };
    if array::element_kind(&descr) == ElementKind::Object {
        return match Unpickler::new(reader).load()? {
            PyObject::Array(array) => Ok(array),
            other => Err(ReadNpyError::NotAnArray(other.type_name())),
        };
    }
    header.num_elements().ok_or(ReadNpyError::LengthOverflow)?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(NpyArray::from_raw(
        header.shape,
        header.fortran_order,
        descr,
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::header::tests::header_bytes;
    use super::*;
    use ndarray::array;

    #[test]
    fn read_numeric_npy() {
        let mut bytes = header_bytes("{'descr': '<i4', 'fortran_order': False, 'shape': (2, 2), }");
        for value in [1i32, 2, 3, 4] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let arr = read_npy(&bytes[..]).unwrap();
        assert_eq!(arr.shape(), &[2, 2]);
        assert_eq!(arr.kind(), ElementKind::Int(4));
        let read = arr.read::<i32>().unwrap();
        assert_eq!(read, array![[1, 2], [3, 4]].into_dyn());
        let widened = arr.to_f64().unwrap();
        assert_eq!(widened, array![[1., 2.], [3., 4.]].into_dyn());
    }

    #[test]
    fn read_fortran_npy() {
        let mut bytes = header_bytes("{'descr': '|u1', 'fortran_order': True, 'shape': (2, 3), }");
        bytes.extend_from_slice(&[1, 4, 2, 5, 3, 6]);
        let arr = read_npy(&bytes[..]).unwrap().read::<u8>().unwrap();
        assert_eq!(arr, array![[1u8, 2, 3], [4, 5, 6]].into_dyn());
    }

    #[test]
    fn missing_data_is_reported() {
        let mut bytes = header_bytes("{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }");
        bytes.extend_from_slice(&1f64.to_le_bytes());
        let arr = read_npy(&bytes[..]).unwrap();
        assert!(matches!(arr.read::<f64>(), Err(ReadNpyError::MissingData)));
    }
}
