use crate::sample_record;
use ndarray::prelude::*;
use std::fs;
use std::path::Path;
use steinmetz_convert::{
    output_path, read_dataset, transcode, write_dataset, LabeledDataset, ReadDatasetError,
    VariableData, WriteOptions,
};

/// Equality that treats NaN as equal to NaN.
fn same_data(a: &VariableData, b: &VariableData) -> bool {
    match (a, b) {
        (VariableData::Float64(a), VariableData::Float64(b)) => {
            a.shape() == b.shape()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
        }
        (a, b) => a == b,
    }
}

fn array_metadata(store: &Path, array: &str) -> serde_json::Value {
    let text = fs::read_to_string(store.join(array).join("zarr.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn written(dir: &Path, dataset: &LabeledDataset) -> std::path::PathBuf {
    let path = output_path(dir, &dataset.identity);
    write_dataset(&path, dataset, &WriteOptions::default()).unwrap();
    path
}

#[test]
fn round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let path = written(dir.path(), &dataset);
    assert_eq!(
        path.file_name().unwrap(),
        "steinmetz_2016-12-14_Cori.zarr"
    );

    let read = read_dataset(&path).unwrap();
    assert_eq!(read.identity, dataset.identity);
    assert_eq!(read.coords, dataset.coords);
    assert_eq!(read.attrs, dataset.attrs);
    assert_eq!(read.variables.len(), dataset.variables.len());
    for var in &dataset.variables {
        let stored = read
            .variable(&var.name)
            .unwrap_or_else(|| panic!("missing {}", var.name));
        assert_eq!(stored.dims, var.dims, "{}", var.name);
        assert!(same_data(&stored.data, &var.data), "{}", var.name);
    }
    assert_eq!(
        read.variable("contrast_left").unwrap().data.as_i8().unwrap(),
        &array![0, 25, 0].into_dyn()
    );
}

#[test]
fn variables_carry_the_session_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let path = written(dir.path(), &dataset);

    let spks = array_metadata(&path, "spks");
    assert_eq!(spks["shape"], serde_json::json!([1, 1, 2, 3, 3]));
    assert_eq!(
        spks["dimension_names"],
        serde_json::json!(["mouse", "session_date", "cell", "trial", "time"])
    );
    assert_eq!(spks["data_type"], "int8");

    let mouse = array_metadata(&path, "mouse");
    assert_eq!(mouse["shape"], serde_json::json!([1]));
}

#[test]
fn only_non_text_variables_are_compressed() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let path = written(dir.path(), &dataset);

    let uses_gzip = |array: &str| {
        array_metadata(&path, array)["codecs"]
            .as_array()
            .unwrap()
            .iter()
            .any(|codec| codec["name"] == "gzip")
    };
    assert!(uses_gzip("spks"));
    assert!(uses_gzip("gocue"));
    assert!(uses_gzip("active_trials"));
    assert!(!uses_gzip("brain_area"));
    assert!(!uses_gzip("trial"));
}

#[test]
fn missing_attribute_values_survive() {
    let dir = tempfile::tempdir().unwrap();
    let record = sample_record(1, 1, 2, 1).with("stim_onset", f64::NAN);
    let dataset = transcode(&record).unwrap();
    let path = written(dir.path(), &dataset);

    let read = read_dataset(&path).unwrap();
    assert!(read.attr("stim_onset").unwrap().is_nan());
    assert_eq!(read.attr("bin_size"), Some(0.01));
}

#[test]
fn rewriting_replaces_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let first = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let path = written(dir.path(), &first);
    fs::write(path.join("stale.txt"), b"left over").unwrap();

    let second = transcode(&sample_record(1, 1, 3, 2)).unwrap();
    assert_eq!(written(dir.path(), &second), path);
    assert!(!path.join("stale.txt").exists());
    assert_eq!(read_dataset(&path).unwrap().dim_len(steinmetz_convert::Dim::Trial), Some(2));
}

#[test]
fn broken_array_metadata_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let path = written(dir.path(), &dataset);
    fs::write(path.join("gocue").join("zarr.json"), b"{\"shape\": [1, 1, ").unwrap();

    match read_dataset(&path) {
        Err(ReadDatasetError::Zarr { node, .. }) => assert_eq!(node, "gocue"),
        other => panic!("expected a zarr error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_root_metadata_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let path = written(dir.path(), &dataset);
    fs::remove_file(path.join("zarr.json")).unwrap();

    match read_dataset(&path) {
        Err(ReadDatasetError::Zarr { node, .. }) => assert_eq!(node, "/"),
        other => panic!("expected a zarr error, got {:?}", other.map(|_| ())),
    }
}
