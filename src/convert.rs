//! Converting every raw archive in a directory.

use crate::archive::{list_archives, read_archive, ReadArchiveError};
use crate::store::{output_path, write_dataset, WriteDatasetError, WriteOptions};
use crate::transcode::{transcode, TranscodeError};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// An error converting raw archives.
#[derive(Debug)]
pub enum ConvertError {
    Io { path: PathBuf, source: io::Error },
    Archive(ReadArchiveError),
    Transcode {
        archive: PathBuf,
        index: usize,
        source: TranscodeError,
    },
    Write(WriteDatasetError),
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConvertError::Io { source, .. } => Some(source),
            ConvertError::Archive(err) => Some(err),
            ConvertError::Transcode { source, .. } => Some(source),
            ConvertError::Write(err) => Some(err),
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvertError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ConvertError::Archive(err) => write!(f, "{}", err),
            ConvertError::Transcode {
                archive,
                index,
                source,
            } => write!(
                f,
                "cannot transcode record {} of {}: {}",
                index,
                archive.display(),
                source
            ),
            ConvertError::Write(err) => write!(f, "{}", err),
        }
    }
}

impl From<ReadArchiveError> for ConvertError {
    fn from(err: ReadArchiveError) -> ConvertError {
        ConvertError::Archive(err)
    }
}

impl From<WriteDatasetError> for ConvertError {
    fn from(err: WriteDatasetError) -> ConvertError {
        ConvertError::Write(err)
    }
}

/// What [`convert_all`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub archives: usize,
    /// One store per session, in processing order.
    pub outputs: Vec<PathBuf>,
}

impl ConvertSummary {
    /// Number of session stores written.
    pub fn datasets(&self) -> usize {
        self.outputs.len()
    }
}

/// Converts every session of every archive in `raw_dir` into a store in
/// `out_dir`.
///
/// Archives are processed in path order, and the sessions of an archive in
/// their stored order. The first error aborts the run.
pub fn convert_all(
    raw_dir: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<ConvertSummary, ConvertError> {
    let (raw_dir, out_dir) = (raw_dir.as_ref(), out_dir.as_ref());
    fs::create_dir_all(out_dir).map_err(|source| ConvertError::Io {
        path: out_dir.to_owned(),
        source,
    })?;
    let archives = list_archives(raw_dir).map_err(|source| ConvertError::Io {
        path: raw_dir.to_owned(),
        source,
    })?;
    info!(count = archives.len(), dir = %raw_dir.display(), "found raw archives");

    let mut summary = ConvertSummary::default();
    for archive in archives {
        let records = read_archive(&archive)?;
        info!(archive = %archive.display(), sessions = records.len(), "converting archive");
        for (index, record) in records.iter().enumerate() {
            let dataset = transcode(record).map_err(|source| ConvertError::Transcode {
                archive: archive.clone(),
                index,
                source,
            })?;
            let path = output_path(out_dir, &dataset.identity);
            write_dataset(&path, &dataset, options)?;
            info!(
                mouse = %dataset.identity.mouse,
                date = %dataset.identity.session_date,
                path = %path.display(),
                "wrote session"
            );
            summary.outputs.push(path);
        }
        summary.archives += 1;
    }
    Ok(summary)
}
