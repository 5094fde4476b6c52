//! Raw session archives: `.npz` files holding a pickled array of dicts.

use crate::npy::ReadNpyError;
use crate::npz::{NpzReader, ReadNpzError};
use crate::pickle::PyObject;
use crate::record::SessionRecord;
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the member holding the session records.
pub const RECORDS_MEMBER: &str = "dat";

/// Extension of raw archive files.
pub const ARCHIVE_EXTENSION: &str = "npz";

/// An error reading a raw archive.
#[derive(Debug)]
pub enum ReadArchiveError {
    Io { path: PathBuf, source: io::Error },
    Npz { path: PathBuf, source: ReadNpzError },
    /// The records member is not an object array.
    NotObjectArray { path: PathBuf },
    /// An element of the records array is not a `dict`.
    NotARecord {
        path: PathBuf,
        index: usize,
        found: &'static str,
    },
    Record {
        path: PathBuf,
        index: usize,
        source: ReadNpyError,
    },
}

impl Error for ReadArchiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadArchiveError::Io { source, .. } => Some(source),
            ReadArchiveError::Npz { source, .. } => Some(source),
            ReadArchiveError::NotObjectArray { .. } => None,
            ReadArchiveError::NotARecord { .. } => None,
            ReadArchiveError::Record { source, .. } => Some(source),
        }
    }
}

impl fmt::Display for ReadArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadArchiveError::Io { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ReadArchiveError::Npz { path, source } => {
                write!(f, "cannot read '{}' from {}: {}", RECORDS_MEMBER, path.display(), source)
            }
            ReadArchiveError::NotObjectArray { path } => write!(
                f,
                "'{}' in {} is not an object array",
                RECORDS_MEMBER,
                path.display()
            ),
            ReadArchiveError::NotARecord { path, index, found } => write!(
                f,
                "record {} in {} is a {}, not a dict",
                index,
                path.display(),
                found
            ),
            ReadArchiveError::Record {
                path,
                index,
                source,
            } => write!(f, "record {} in {}: {}", index, path.display(), source),
        }
    }
}

/// Reads the ordered session records of the archive at `path`.
pub fn read_archive(path: impl AsRef<Path>) -> Result<Vec<SessionRecord>, ReadArchiveError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ReadArchiveError::Io {
        path: path.to_owned(),
        source,
    })?;
    let npz_err = |source| ReadArchiveError::Npz {
        path: path.to_owned(),
        source,
    };
    let mut npz = NpzReader::new(BufReader::new(file)).map_err(npz_err)?;
    let dat = npz.by_name(RECORDS_MEMBER).map_err(npz_err)?;
    let objects = dat
        .into_objects()
        .ok_or_else(|| ReadArchiveError::NotObjectArray {
            path: path.to_owned(),
        })?;
    debug!(path = %path.display(), records = objects.len(), "read archive");

    objects
        .into_iter()
        .enumerate()
        .map(|(index, obj)| match obj {
            PyObject::Dict(pairs) => {
                SessionRecord::from_py_dict(pairs).map_err(|source| ReadArchiveError::Record {
                    path: path.to_owned(),
                    index,
                    source,
                })
            }
            other => Err(ReadArchiveError::NotARecord {
                path: path.to_owned(),
                index,
                found: other.type_name(),
            }),
        })
        .collect()
}

/// Lists the archives directly inside `dir`, sorted by path.
pub fn list_archives(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == ARCHIVE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::npy::header::tests::header_bytes;
    use crate::npz::tests::npz_bytes;
    use crate::pickle::op;
    use crate::pickle::tests::PickleWriter;

    pub(crate) fn object_npy(pickle: Vec<u8>, len: usize) -> Vec<u8> {
        let mut bytes = header_bytes(&format!(
            "{{'descr': '|O', 'fortran_order': False, 'shape': ({},), }}",
            len
        ));
        bytes.extend(pickle);
        bytes
    }

    #[test]
    fn read_records_in_order() {
        let mut writer = PickleWriter::new();
        writer
            .begin_array(&[2])
            .dtype("O8", "|")
            .op(op::NEWFALSE)
            .op(op::MARK);
        for (mouse, bin_size) in [("Cori", 0.01), ("Lederberg", 0.02)] {
            writer
                .op(op::EMPTY_DICT)
                .op(op::MARK)
                .str("mouse_name")
                .str(mouse)
                .str("bin_size")
                .float(bin_size)
                .str("wheel")
                .f64_array(&[1, 2, 3], &[0., 1., -1., 2., 0., 0.])
                .op(op::SETITEMS);
        }
        let pickle = writer.op(op::LIST).end_array().stop();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steinmetz_part0.npz");
        fs::write(&path, npz_bytes(&[("dat.npy", object_npy(pickle, 2))])).unwrap();

        let records = read_archive(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text("mouse_name").unwrap(), "Cori");
        assert_eq!(records[1].text("mouse_name").unwrap(), "Lederberg");
        assert_eq!(records[1].scalar("bin_size").unwrap(), 0.02);
        assert_eq!(records[0].floats("wheel").unwrap().shape(), &[1, 2, 3]);
    }

    #[test]
    fn numeric_dat_is_rejected() {
        let mut npy = header_bytes("{'descr': '<f8', 'fortran_order': False, 'shape': (1,), }");
        npy.extend(0f64.to_le_bytes());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.npz");
        fs::write(&path, npz_bytes(&[("dat.npy", npy)])).unwrap();
        assert!(matches!(
            read_archive(&path),
            Err(ReadArchiveError::NotObjectArray { .. })
        ));
    }

    #[test]
    fn list_only_archives_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["steinmetz_part2.npz", "notes.txt", "steinmetz_part0.npz"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<_> = list_archives(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["steinmetz_part0.npz", "steinmetz_part2.npz"]);
    }
}
