use crate::npy::{read_npy, NpyArray, ReadNpyError};
use std::error::Error;
use std::fmt;
use std::io::{Read, Seek};
use zip::result::ZipError;
use zip::ZipArchive;

/// An error reading a `.npz` file.
#[derive(Debug)]
pub enum ReadNpzError {
    /// An error caused by the zip archive.
    Zip(ZipError),
    /// An error decoding the member `member`.
    Npy { member: String, source: ReadNpyError },
}

impl Error for ReadNpzError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadNpzError::Zip(err) => Some(err),
            ReadNpzError::Npy { source, .. } => Some(source),
        }
    }
}

impl fmt::Display for ReadNpzError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadNpzError::Zip(err) => write!(f, "zip file error: {}", err),
            ReadNpzError::Npy { member, source } => {
                write!(f, "cannot decode member '{}': {}", member, source)
            }
        }
    }
}

impl From<ZipError> for ReadNpzError {
    fn from(err: ZipError) -> ReadNpzError {
        ReadNpzError::Zip(err)
    }
}

/// Reader for `.npz` files.
///
/// # Example
///
/// ```no_run
/// use steinmetz_convert::NpzReader;
/// use std::fs::File;
///
/// let mut npz = NpzReader::new(File::open("data/raw/steinmetz_part0.npz")?)?;
/// let dat = npz.by_name("dat")?;
/// println!("{} sessions", dat.len());
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// ```
pub struct NpzReader<R: Read + Seek> {
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> NpzReader<R> {
    /// Creates a new `.npz` file reader.
    pub fn new(reader: R) -> Result<NpzReader<R>, ReadNpzError> {
        Ok(NpzReader {
            zip: ZipArchive::new(reader)?,
        })
    }

    /// Reads an array by name.
    ///
    /// `numpy.savez` stores the array `dat` as the member `dat.npy`; both
    /// spellings are accepted.
    pub fn by_name(&mut self, name: &str) -> Result<NpyArray, ReadNpzError> {
        let member = if self.zip.file_names().any(|n| n == name) {
            name.to_owned()
        } else {
            format!("{}.npy", name)
        };
        let file = self.zip.by_name(&member)?;
        read_npy(file).map_err(|source| ReadNpzError::Npy { member, source })
    }
}
