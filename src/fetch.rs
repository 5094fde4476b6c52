//! Downloading the raw archives.

use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::info;

/// A remote file and the name it is saved under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resource {
    pub url: &'static str,
    pub file_name: &'static str,
}

/// The three parts of the Steinmetz et al. (2019) Neuropixels dataset.
pub const DEFAULT_RESOURCES: [Resource; 3] = [
    Resource {
        url: "https://osf.io/agvxh/download",
        file_name: "steinmetz_part0.npz",
    },
    Resource {
        url: "https://osf.io/uv3mw/download",
        file_name: "steinmetz_part1.npz",
    },
    Resource {
        url: "https://osf.io/ehmw2/download",
        file_name: "steinmetz_part2.npz",
    },
];

pub type RetrieveError = Box<dyn Error + Send + Sync>;

/// A source of remote files.
pub trait Retrieve {
    /// Starts retrieving `url` and returns its body. Fails without reading
    /// any of the body if the source reports an error.
    fn open(&self, url: &str) -> Result<Box<dyn Read>, RetrieveError>;
}

/// Retrieves over HTTP(S), following redirects, with no timeout.
#[cfg(feature = "fetch")]
pub struct HttpRetriever {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "fetch")]
impl HttpRetriever {
    pub fn new() -> Result<Self, RetrieveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()?;
        Ok(HttpRetriever { client })
    }
}

#[cfg(feature = "fetch")]
impl Retrieve for HttpRetriever {
    fn open(&self, url: &str) -> Result<Box<dyn Read>, RetrieveError> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(Box::new(response))
    }
}

/// An error fetching the raw archives.
#[derive(Debug)]
pub enum FetchError {
    CreateDir { path: PathBuf, source: io::Error },
    Retrieve { url: String, source: RetrieveError },
    Write { path: PathBuf, source: io::Error },
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FetchError::CreateDir { source, .. } => Some(source),
            FetchError::Retrieve { source, .. } => Some(&**source),
            FetchError::Write { source, .. } => Some(source),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchError::CreateDir { path, source } => {
                write!(f, "cannot create {}: {}", path.display(), source)
            }
            FetchError::Retrieve { url, source } => write!(f, "cannot retrieve {}: {}", url, source),
            FetchError::Write { path, source } => {
                write!(f, "cannot write {}: {}", path.display(), source)
            }
        }
    }
}

/// Files handled by [`fetch_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: Vec<PathBuf>,
    /// Files that already existed.
    pub skipped: Vec<PathBuf>,
}

/// Makes sure every resource exists in `dir`, retrieving the missing ones in
/// order.
///
/// The first failure aborts the run. Files retrieved before it stay in place
/// and are skipped next time.
pub fn fetch_all<R: Retrieve + ?Sized>(
    resources: &[Resource],
    dir: impl AsRef<Path>,
    retriever: &R,
) -> Result<FetchSummary, FetchError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| FetchError::CreateDir {
        path: dir.to_owned(),
        source,
    })?;

    let mut summary = FetchSummary::default();
    for (i, resource) in resources.iter().enumerate() {
        let path = dir.join(resource.file_name);
        if path.exists() {
            info!(file = %path.display(), "already present, skipping");
            summary.skipped.push(path);
            continue;
        }

        info!(
            url = resource.url,
            file = %path.display(),
            "downloading {}/{}",
            i + 1,
            resources.len()
        );
        let mut body = retriever
            .open(resource.url)
            .map_err(|source| FetchError::Retrieve {
                url: resource.url.to_owned(),
                source,
            })?;
        let write_err = |source| FetchError::Write {
            path: path.clone(),
            source,
        };
        let mut file = File::create(&path).map_err(write_err)?;
        let bytes = io::copy(&mut body, &mut file).map_err(write_err)?;
        info!(file = %path.display(), bytes, "saved");
        summary.downloaded.push(path);
    }
    Ok(summary)
}
