//! Persisting labeled datasets as Zarr v3 hierarchies.
//!
//! A session is one directory store. The root group carries the scalar
//! attributes. The identifying dimensions `mouse` and `session_date` and the
//! coordinates `trial`, `time` and `cell` are one-dimensional arrays named
//! after their dimension. Every variable is an array of shape
//! `[1, 1, ...]` whose dimension names start with `mouse` and
//! `session_date`.

use crate::config::{MAX_COMPRESSION_LEVEL, OUTPUT_EXTENSION, OUTPUT_PREFIX};
use crate::dataset::{
    Coordinate, Dim, LabeledDataset, SessionIdentity, Variable, VariableData,
};
use ndarray::prelude::*;
use ndarray::ShapeError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zarrs::array::codec::GzipCodec;
use zarrs::array::{Array, ArrayBuilder, DataType, Element, ElementOwned, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{
    ListableStorageTraits, ReadableWritableListableStorage, ReadableWritableListableStorageTraits,
    StorePrefix,
};

type ZarrError = Box<dyn Error + Send + Sync>;

/// The path of the store for `identity` inside `out_dir`.
pub fn output_path(out_dir: impl AsRef<Path>, identity: &SessionIdentity) -> PathBuf {
    out_dir.as_ref().join(format!(
        "{}_{}_{}.{}",
        OUTPUT_PREFIX, identity.session_date, identity.mouse, OUTPUT_EXTENSION
    ))
}

/// Settings for [`write_dataset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Gzip level for non-text variables, `0..=9`.
    pub compression_level: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            compression_level: crate::config::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// An error writing a dataset store.
#[derive(Debug)]
pub enum WriteDatasetError {
    Io { path: PathBuf, source: io::Error },
    /// The gzip level is outside `0..=9`.
    CompressionLevel(u32),
    Zarr {
        path: PathBuf,
        array: String,
        source: ZarrError,
    },
}

impl Error for WriteDatasetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WriteDatasetError::Io { source, .. } => Some(source),
            WriteDatasetError::CompressionLevel(_) => None,
            WriteDatasetError::Zarr { source, .. } => Some(&**source),
        }
    }
}

impl fmt::Display for WriteDatasetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteDatasetError::Io { path, source } => {
                write!(f, "cannot write {}: {}", path.display(), source)
            }
            WriteDatasetError::CompressionLevel(level) => write!(
                f,
                "compression level {} is not in 0..={}",
                level, MAX_COMPRESSION_LEVEL
            ),
            WriteDatasetError::Zarr {
                path,
                array,
                source,
            } => write!(f, "cannot write '{}' to {}: {}", array, path.display(), source),
        }
    }
}

/// An error reading a dataset store.
#[derive(Debug)]
pub enum ReadDatasetError {
    /// A node is missing, has invalid metadata or cannot be decoded.
    Zarr { node: String, source: ZarrError },
    /// A required array is absent.
    MissingArray(&'static str),
    UnsupportedDataType { array: String, data_type: String },
    /// Dimension names or lengths that do not fit the dataset layout.
    Layout { array: String, detail: String },
    Shape(ShapeError),
}

impl Error for ReadDatasetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadDatasetError::Zarr { source, .. } => Some(&**source),
            ReadDatasetError::Shape(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ReadDatasetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadDatasetError::Zarr { node, source } => {
                write!(f, "cannot read node '{}': {}", node, source)
            }
            ReadDatasetError::MissingArray(name) => write!(f, "missing array '{}'", name),
            ReadDatasetError::UnsupportedDataType { array, data_type } => {
                write!(f, "array '{}' has unsupported data type {}", array, data_type)
            }
            ReadDatasetError::Layout { array, detail } => {
                write!(f, "array '{}' does not fit the layout: {}", array, detail)
            }
            ReadDatasetError::Shape(err) => write!(f, "data does not match shape: {}", err),
        }
    }
}

impl From<ShapeError> for ReadDatasetError {
    fn from(err: ShapeError) -> ReadDatasetError {
        ReadDatasetError::Shape(err)
    }
}

/// One array to be written.
struct ArraySpec<'a> {
    name: &'a str,
    shape: Vec<usize>,
    dims: Vec<&'a str>,
    gzip_level: Option<u32>,
}

fn write_array<T: Element>(
    store: &ReadableWritableListableStorage,
    spec: ArraySpec<'_>,
    data_type: DataType,
    fill_value: FillValue,
    values: &[T],
) -> Result<(), ZarrError> {
    let shape: Vec<u64> = spec.shape.iter().map(|&len| len as u64).collect();
    // Chunk extents must be nonzero even for empty dimensions.
    let chunk_shape: Vec<u64> = shape.iter().map(|&len| len.max(1)).collect();
    let mut builder = ArrayBuilder::new(shape, data_type, chunk_shape.try_into()?, fill_value);
    if let Some(level) = spec.gzip_level {
        builder.bytes_to_bytes_codecs(vec![Arc::new(GzipCodec::new(level)?)]);
    }
    builder.dimension_names(Some(spec.dims));
    let array = builder.build(store.clone(), &format!("/{}", spec.name))?;
    array.store_metadata()?;
    if !values.is_empty() {
        array.store_array_subset_elements::<T>(&array.subset_all(), values)?;
    }
    Ok(())
}

fn row_major<A: Clone>(arr: &ArrayD<A>) -> Vec<A> {
    arr.iter().cloned().collect()
}

fn write_variable(
    store: &ReadableWritableListableStorage,
    var: &Variable,
    gzip_level: u32,
) -> Result<(), ZarrError> {
    let mut shape = vec![1, 1];
    shape.extend_from_slice(var.data.shape());
    let mut dims = vec![SessionIdentity::MOUSE_DIM, SessionIdentity::SESSION_DATE_DIM];
    dims.extend(var.dims.iter().map(|dim| dim.name()));
    let spec = ArraySpec {
        name: &var.name,
        shape,
        dims,
        gzip_level: if var.data.is_text() {
            None
        } else {
            Some(gzip_level)
        },
    };
    match &var.data {
        VariableData::Int8(arr) => write_array(
            store,
            spec,
            DataType::Int8,
            FillValue::from(0i8),
            &row_major(arr),
        ),
        VariableData::Float64(arr) => write_array(
            store,
            spec,
            DataType::Float64,
            FillValue::from(f64::NAN),
            &row_major(arr),
        ),
        VariableData::Bool(arr) => write_array(
            store,
            spec,
            DataType::Bool,
            FillValue::from(false),
            &row_major(arr),
        ),
        VariableData::Text(arr) => write_array(
            store,
            spec,
            DataType::String,
            FillValue::from(""),
            &row_major(arr),
        ),
    }
}

fn write_coordinate(
    store: &ReadableWritableListableStorage,
    dim: Dim,
    coord: &Coordinate,
) -> Result<(), ZarrError> {
    let spec = ArraySpec {
        name: dim.name(),
        shape: vec![coord.len()],
        dims: vec![dim.name()],
        gzip_level: None,
    };
    match coord {
        Coordinate::Int64(values) => write_array(
            store,
            spec,
            DataType::Int64,
            FillValue::from(0i64),
            &values.to_vec(),
        ),
        Coordinate::Float64(values) => write_array(
            store,
            spec,
            DataType::Float64,
            FillValue::from(f64::NAN),
            &values.to_vec(),
        ),
    }
}

fn write_label(
    store: &ReadableWritableListableStorage,
    dim: &str,
    value: &str,
) -> Result<(), ZarrError> {
    let spec = ArraySpec {
        name: dim,
        shape: vec![1],
        dims: vec![dim],
        gzip_level: None,
    };
    write_array(
        store,
        spec,
        DataType::String,
        FillValue::from(""),
        &[value.to_owned()],
    )
}

fn root_attributes(dataset: &LabeledDataset) -> Map<String, Value> {
    dataset
        .attrs
        .iter()
        .map(|(name, &value)| (name.clone(), Value::from(value)))
        .collect()
}

/// Writes `dataset` as a Zarr v3 store at `path`, replacing any existing
/// store there.
pub fn write_dataset(
    path: impl AsRef<Path>,
    dataset: &LabeledDataset,
    options: &WriteOptions,
) -> Result<(), WriteDatasetError> {
    let path = path.as_ref();
    if options.compression_level > MAX_COMPRESSION_LEVEL {
        return Err(WriteDatasetError::CompressionLevel(
            options.compression_level,
        ));
    }
    let io_err = |source| WriteDatasetError::Io {
        path: path.to_owned(),
        source,
    };
    if path.is_dir() {
        fs::remove_dir_all(path).map_err(io_err)?;
    } else if path.exists() {
        fs::remove_file(path).map_err(io_err)?;
    }
    fs::create_dir_all(path).map_err(io_err)?;

    let zarr_err = |array: &str| {
        let array = array.to_owned();
        move |source| WriteDatasetError::Zarr {
            path: path.to_owned(),
            array,
            source,
        }
    };
    let store: ReadableWritableListableStorage = Arc::new(
        FilesystemStore::new(path).map_err(|err| zarr_err("/")(Box::new(err) as ZarrError))?,
    );

    let root = GroupBuilder::new()
        .attributes(root_attributes(dataset))
        .build(store.clone(), "/")
        .map_err(|err| zarr_err("/")(Box::new(err) as ZarrError))?;
    root.store_metadata()
        .map_err(|err| zarr_err("/")(Box::new(err) as ZarrError))?;

    let identity = &dataset.identity;
    write_label(&store, SessionIdentity::MOUSE_DIM, &identity.mouse)
        .map_err(zarr_err(SessionIdentity::MOUSE_DIM))?;
    write_label(
        &store,
        SessionIdentity::SESSION_DATE_DIM,
        &identity.session_date,
    )
    .map_err(zarr_err(SessionIdentity::SESSION_DATE_DIM))?;
    for (&dim, coord) in &dataset.coords {
        write_coordinate(&store, dim, coord).map_err(zarr_err(dim.name()))?;
    }
    for var in &dataset.variables {
        write_variable(&store, var, options.compression_level).map_err(zarr_err(var.name.as_str()))?;
        debug!(variable = %var.name, shape = ?var.data.shape(), "stored variable");
    }
    Ok(())
}

fn read_error(node: &str, err: impl Error + Send + Sync + 'static) -> ReadDatasetError {
    ReadDatasetError::Zarr {
        node: node.to_owned(),
        source: Box::new(err),
    }
}

/// Values of an array in the store, typed by its data type.
enum Stored {
    Int8(ArrayD<i8>),
    Int64(ArrayD<i64>),
    Float64(ArrayD<f64>),
    Bool(ArrayD<bool>),
    Text(ArrayD<String>),
}

/// An array of the store with its dimension names.
struct StoredArray {
    dims: Vec<String>,
    values: Stored,
}

type StoreArray = Array<dyn ReadableWritableListableStorageTraits>;

fn retrieve<T: ElementOwned>(
    array: &StoreArray,
    name: &str,
    shape: &[usize],
) -> Result<ArrayD<T>, ReadDatasetError> {
    let values = array
        .retrieve_array_subset_elements::<T>(&array.subset_all())
        .map_err(|err| read_error(name, err))?;
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
}

fn read_array(
    store: &ReadableWritableListableStorage,
    name: &str,
) -> Result<StoredArray, ReadDatasetError> {
    let array = Array::open(store.clone(), &format!("/{}", name))
        .map_err(|err| read_error(name, err))?;
    let dims = match array.dimension_names() {
        Some(names) => names
            .iter()
            .map(|dim| {
                dim.as_deref()
                    .map(str::to_owned)
                    .ok_or_else(|| layout_error(name, "unnamed dimension"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => return Err(layout_error(name, "no dimension names")),
    };
    let shape: Vec<usize> = array.shape().iter().map(|&len| len as usize).collect();
    let values = match array.data_type() {
        DataType::Int8 => Stored::Int8(retrieve(&array, name, &shape)?),
        DataType::Int64 => Stored::Int64(retrieve(&array, name, &shape)?),
        DataType::Float64 => Stored::Float64(retrieve(&array, name, &shape)?),
        DataType::Bool => Stored::Bool(retrieve(&array, name, &shape)?),
        DataType::String => Stored::Text(retrieve(&array, name, &shape)?),
        other => {
            return Err(ReadDatasetError::UnsupportedDataType {
                array: name.to_owned(),
                data_type: format!("{:?}", other),
            })
        }
    };
    Ok(StoredArray { dims, values })
}

fn layout_error(array: &str, detail: impl Into<String>) -> ReadDatasetError {
    ReadDatasetError::Layout {
        array: array.to_owned(),
        detail: detail.into(),
    }
}

fn read_label(labels: &mut BTreeMap<String, Stored>, dim: &'static str) -> Result<String, ReadDatasetError> {
    match labels.remove(dim) {
        Some(Stored::Text(arr)) if arr.len() == 1 => arr
            .iter()
            .next()
            .cloned()
            .ok_or(ReadDatasetError::MissingArray(dim)),
        Some(_) => Err(layout_error(dim, "expected a single string")),
        None => Err(ReadDatasetError::MissingArray(dim)),
    }
}

fn into_coordinate(dim: Dim, stored: Stored) -> Result<Coordinate, ReadDatasetError> {
    let to_1d = |shape: &[usize]| -> Result<(), ReadDatasetError> {
        if shape.len() == 1 {
            Ok(())
        } else {
            Err(layout_error(dim.name(), "coordinates must be one-dimensional"))
        }
    };
    match stored {
        Stored::Int64(arr) => {
            to_1d(arr.shape())?;
            Ok(Coordinate::Int64(arr.iter().copied().collect()))
        }
        Stored::Float64(arr) => {
            to_1d(arr.shape())?;
            Ok(Coordinate::Float64(arr.iter().copied().collect()))
        }
        _ => Err(layout_error(dim.name(), "coordinates must be int64 or float64")),
    }
}

/// Removes the two leading singleton axes a variable is stored under.
fn unbroadcast<A>(name: &str, arr: ArrayD<A>) -> Result<ArrayD<A>, ReadDatasetError> {
    if arr.ndim() < 2 || arr.shape()[0] != 1 || arr.shape()[1] != 1 {
        return Err(layout_error(
            name,
            format!("expected leading singleton axes, found shape {:?}", arr.shape()),
        ));
    }
    Ok(arr.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0))
}

fn into_variable(name: String, stored: StoredArray) -> Result<Variable, ReadDatasetError> {
    let expected_prefix = [SessionIdentity::MOUSE_DIM, SessionIdentity::SESSION_DATE_DIM];
    if stored.dims.len() < 2 || stored.dims[..2] != expected_prefix {
        return Err(layout_error(
            &name,
            format!("dimension names {:?} do not start with {:?}", stored.dims, expected_prefix),
        ));
    }
    let dims = stored.dims[2..]
        .iter()
        .map(|dim| {
            dim.parse::<Dim>()
                .map_err(|dim| layout_error(&name, format!("unknown dimension '{}'", dim)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let data = match stored.values {
        Stored::Int8(arr) => VariableData::Int8(unbroadcast(&name, arr)?),
        Stored::Float64(arr) => VariableData::Float64(unbroadcast(&name, arr)?),
        Stored::Bool(arr) => VariableData::Bool(unbroadcast(&name, arr)?),
        Stored::Text(arr) => VariableData::Text(unbroadcast(&name, arr)?),
        Stored::Int64(_) => {
            return Err(ReadDatasetError::UnsupportedDataType {
                array: name,
                data_type: "int64".to_owned(),
            })
        }
    };
    Ok(Variable { name, dims, data })
}

/// Names of the nodes directly below the root, sorted.
fn child_names(store: &ReadableWritableListableStorage) -> Result<Vec<String>, ReadDatasetError> {
    let children = store
        .list_dir(&StorePrefix::root())
        .map_err(|err| read_error("/", err))?;
    let mut names: Vec<String> = children
        .prefixes()
        .iter()
        .map(|prefix| prefix.as_str().trim_end_matches('/').to_owned())
        .collect();
    names.sort();
    Ok(names)
}

/// Reads a store written by [`write_dataset`].
///
/// Every node below the root must be an array. Variables are returned
/// sorted by name.
pub fn read_dataset(path: impl AsRef<Path>) -> Result<LabeledDataset, ReadDatasetError> {
    let store: ReadableWritableListableStorage = Arc::new(
        FilesystemStore::new(path.as_ref()).map_err(|err| read_error("/", err))?,
    );
    let root = Group::open(store.clone(), "/").map_err(|err| read_error("/", err))?;
    let attrs = root
        .attributes()
        .iter()
        .filter_map(|(name, value)| match value {
            Value::Number(n) => n.as_f64().map(|x| (name.clone(), x)),
            Value::Null => Some((name.clone(), f64::NAN)),
            _ => None,
        })
        .collect();

    let mut labels = BTreeMap::new();
    let mut coords = BTreeMap::new();
    let mut variables = Vec::new();
    for name in child_names(&store)? {
        let stored = read_array(&store, &name)?;
        if name == SessionIdentity::MOUSE_DIM || name == SessionIdentity::SESSION_DATE_DIM {
            labels.insert(name, stored.values);
        } else if let Ok(dim) = name.parse::<Dim>() {
            coords.insert(dim, into_coordinate(dim, stored.values)?);
        } else {
            variables.push(into_variable(name, stored)?);
        }
    }

    Ok(LabeledDataset {
        identity: SessionIdentity {
            mouse: read_label(&mut labels, SessionIdentity::MOUSE_DIM)?,
            session_date: read_label(&mut labels, SessionIdentity::SESSION_DATE_DIM)?,
        },
        variables,
        coords,
        attrs,
    })
}
