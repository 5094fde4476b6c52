//! This crate converts the Steinmetz et al. (2019) Neuropixels recordings
//! from their distributed [`.npz`] archives into one labeled, compressed
//! [Zarr] store per recording session.
//!
//! [`.npz`]: https://numpy.org/doc/stable/reference/generated/numpy.savez.html
//! [Zarr]: https://zarr-specs.readthedocs.io/en/latest/v3/core/v3.0.html
//!
//! The pipeline has two stages, each with its own binary:
//!
//! * `steinmetz-fetch` downloads the three raw archives with [`fetch_all`],
//!   skipping any that are already present.
//!
//! * `steinmetz-convert` reads every archive with [`read_archive`], maps
//!   each session record to a [`LabeledDataset`] with [`transcode`] and
//!   writes it with [`write_dataset`]. [`convert_all`] runs the whole stage.
//!
//! Each archive holds a single object array `dat` of Python dictionaries,
//! one per session. Reading it needs a small [pickle] interpreter that
//! understands the NumPy objects the archives contain; see [`PyObject`].
//!
//! [pickle]: https://docs.python.org/3/library/pickle.html
//!
//! # Limitations
//!
//! * Only the pickle opcodes and globals that NumPy emits for arrays,
//!   dtypes, scalars and plain containers are understood. Any other global
//!   is rejected rather than resolved.
//!
//! * Output stores use Zarr format 3 only.

pub mod archive;
pub mod config;
pub mod convert;
pub mod dataset;
pub mod fetch;
mod npy;
mod npz;
mod pickle;
pub mod record;
pub mod schema;
pub mod store;
pub mod transcode;

pub use crate::archive::{list_archives, read_archive, ReadArchiveError};
pub use crate::convert::{convert_all, ConvertError, ConvertSummary};
pub use crate::dataset::{
    Coordinate, Dim, LabeledDataset, SessionIdentity, SizeConflict, Variable, VariableData,
};
#[cfg(feature = "fetch")]
pub use crate::fetch::HttpRetriever;
pub use crate::fetch::{fetch_all, FetchError, FetchSummary, Resource, Retrieve, DEFAULT_RESOURCES};
pub use crate::npy::{
    read_npy, ElementKind, NpyArray, NpyData, ReadDataError, ReadNpyError, ReadableElement,
};
pub use crate::npz::{NpzReader, ReadNpzError};
pub use crate::pickle::{PyObject, UnpickleError, Unpickler};
pub use crate::record::{Field, RecordError, SessionRecord};
pub use crate::store::{
    output_path, read_dataset, write_dataset, ReadDatasetError, WriteDatasetError, WriteOptions,
};
pub use crate::transcode::{transcode, TranscodeError};
