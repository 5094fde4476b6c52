//! Session records: one recording session's bundle of named arrays.

use crate::npy::{wrap_to_i8, ElementKind, NpyArray, ReadNpyError};
use crate::pickle::PyObject;
use ndarray::prelude::*;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use tracing::debug;

/// One value of a [`SessionRecord`].
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    /// An array in the element type it was stored with. Accessors decode it
    /// on each call.
    Array(NpyArray),
    /// A Python number.
    Scalar(f64),
    Str(String),
}

impl Field {
    fn kind_name(&self) -> &'static str {
        match self {
            Field::Array(arr) => match arr.kind() {
                ElementKind::Bool => "a bool array",
                ElementKind::Int(_) | ElementKind::UInt(_) => "an int array",
                ElementKind::Float(_) => "a float array",
                ElementKind::Text => "a text array",
                ElementKind::Object => "an object array",
                ElementKind::Unsupported => "an array of unsupported type",
            },
            Field::Scalar(_) => "a number",
            Field::Str(_) => "a string",
        }
    }

    /// Converts a decoded Python value, or returns `None` for values that
    /// have no field representation (`None`, lists, dicts, ...).
    pub fn from_py_object(obj: PyObject) -> Option<Field> {
        match obj {
            PyObject::Bool(b) => Some(Field::Scalar(if b { 1. } else { 0. })),
            PyObject::Int(i) => Some(Field::Scalar(i as f64)),
            PyObject::Float(x) => Some(Field::Scalar(x)),
            PyObject::Str(s) => Some(Field::Str(s)),
            PyObject::Array(arr) => Some(Field::Array(arr)),
            _ => None,
        }
    }
}

impl From<NpyArray> for Field {
    fn from(arr: NpyArray) -> Field {
        Field::Array(arr)
    }
}

impl From<ArrayD<f64>> for Field {
    fn from(arr: ArrayD<f64>) -> Field {
        Field::Array(arr.into())
    }
}

impl From<ArrayD<i64>> for Field {
    fn from(arr: ArrayD<i64>) -> Field {
        Field::Array(arr.into())
    }
}

impl From<ArrayD<bool>> for Field {
    fn from(arr: ArrayD<bool>) -> Field {
        Field::Array(arr.into())
    }
}

impl From<ArrayD<String>> for Field {
    fn from(arr: ArrayD<String>) -> Field {
        Field::Array(arr.into())
    }
}

impl From<f64> for Field {
    fn from(x: f64) -> Field {
        Field::Scalar(x)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Field {
        Field::Str(s.to_owned())
    }
}

/// An error looking up a field of a [`SessionRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    MissingField(String),
    WrongKind {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    /// The field's elements cannot be decoded as requested.
    Decode { field: String, detail: String },
}

impl Error for RecordError {}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordError::MissingField(field) => write!(f, "missing field '{}'", field),
            RecordError::WrongKind {
                field,
                expected,
                found,
            } => write!(f, "field '{}' should be {}, found {}", field, expected, found),
            RecordError::Decode { field, detail } => {
                write!(f, "cannot decode field '{}': {}", field, detail)
            }
        }
    }
}

/// A mapping from field names to values describing one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionRecord {
    fields: BTreeMap<String, Field>,
}

impl SessionRecord {
    pub fn new() -> Self {
        SessionRecord::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Field>) -> Option<Field> {
        self.fields.insert(name.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Field>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn field(&self, name: &str) -> Result<&Field, RecordError> {
        self.get(name)
            .ok_or_else(|| RecordError::MissingField(name.to_owned()))
    }

    fn wrong_kind(name: &str, expected: &'static str, found: &Field) -> RecordError {
        RecordError::WrongKind {
            field: name.to_owned(),
            expected,
            found: found.kind_name(),
        }
    }

    fn decode_error(name: &str, err: ReadNpyError) -> RecordError {
        RecordError::Decode {
            field: name.to_owned(),
            detail: err.to_string(),
        }
    }

    /// The shape of a field without decoding it. Scalars have shape `[]`.
    pub fn shape(&self, name: &str) -> Result<&[usize], RecordError> {
        match self.field(name)? {
            Field::Array(arr) => Ok(arr.shape()),
            Field::Scalar(_) => Ok(&[]),
            other => Err(Self::wrong_kind(name, "numeric", other)),
        }
    }

    /// A numeric field widened to `f64`. Bool arrays and scalars are accepted
    /// (a scalar is a 0-d array).
    pub fn floats(&self, name: &str) -> Result<ArrayD<f64>, RecordError> {
        match self.field(name)? {
            Field::Array(arr) if arr.kind() != ElementKind::Text => {
                arr.to_f64().map_err(|err| Self::decode_error(name, err))
            }
            Field::Scalar(x) => Ok(arr0(*x).into_dyn()),
            other => Err(Self::wrong_kind(name, "numeric", other)),
        }
    }

    /// A numeric field multiplied by `scale` and converted to `i8`,
    /// truncating toward zero and wrapping out-of-range values.
    pub fn int8s(&self, name: &str, scale: f64) -> Result<ArrayD<i8>, RecordError> {
        match self.field(name)? {
            Field::Array(arr) if arr.kind() != ElementKind::Text => arr
                .to_i8_wrapping(scale)
                .map_err(|err| Self::decode_error(name, err)),
            Field::Scalar(x) => Ok(arr0(wrap_to_i8(x * scale)).into_dyn()),
            other => Err(Self::wrong_kind(name, "numeric", other)),
        }
    }

    /// A flag field. Numeric arrays are accepted, nonzero meaning `true`.
    pub fn bools(&self, name: &str) -> Result<ArrayD<bool>, RecordError> {
        let flags = match self.field(name)? {
            Field::Array(arr) if arr.kind() == ElementKind::Bool => arr.read::<bool>(),
            Field::Array(arr) if arr.kind() != ElementKind::Text => {
                arr.to_f64().map(|values| values.mapv(|x| x != 0.))
            }
            other => return Err(Self::wrong_kind(name, "a flag array", other)),
        };
        flags.map_err(|err| Self::decode_error(name, err))
    }

    /// A text field; a single string is a 0-d array.
    pub fn texts(&self, name: &str) -> Result<ArrayD<String>, RecordError> {
        match self.field(name)? {
            Field::Array(arr) => arr.to_text().map_err(|err| Self::decode_error(name, err)),
            Field::Str(s) => Ok(arr0(s.clone()).into_dyn()),
            other => Err(Self::wrong_kind(name, "text", other)),
        }
    }

    /// A number, stored either as a scalar or a one-element array.
    pub fn scalar(&self, name: &str) -> Result<f64, RecordError> {
        match self.field(name)? {
            Field::Scalar(x) => Ok(*x),
            Field::Array(arr) if arr.len() == 1 && arr.kind() != ElementKind::Text => {
                let values = arr.to_f64().map_err(|err| Self::decode_error(name, err))?;
                values
                    .iter()
                    .next()
                    .copied()
                    .ok_or_else(|| RecordError::MissingField(name.to_owned()))
            }
            other => Err(Self::wrong_kind(name, "a number", other)),
        }
    }

    /// A string, stored either as a `str` or a one-element text array.
    pub fn text(&self, name: &str) -> Result<String, RecordError> {
        match self.field(name)? {
            Field::Str(s) => Ok(s.clone()),
            Field::Array(arr) if arr.len() == 1 => {
                let values = arr.to_text().map_err(|err| Self::decode_error(name, err))?;
                values
                    .iter()
                    .next()
                    .cloned()
                    .ok_or_else(|| RecordError::MissingField(name.to_owned()))
            }
            other => Err(Self::wrong_kind(name, "a string", other)),
        }
    }

    /// Builds a record from an unpickled Python `dict`.
    ///
    /// Keys must be strings. Values with no field representation are
    /// skipped.
    pub fn from_py_dict(pairs: Vec<(PyObject, PyObject)>) -> Result<Self, ReadNpyError> {
        let mut record = SessionRecord::new();
        for (key, value) in pairs {
            let name = match key.as_str() {
                Some(name) => name.to_owned(),
                None => {
                    return Err(ReadNpyError::ObjectElement {
                        expected: "a str key",
                        found: key.type_name(),
                    })
                }
            };
            let type_name = value.type_name();
            match Field::from_py_object(value) {
                Some(field) => {
                    record.fields.insert(name, field);
                }
                None => debug!(field = %name, kind = type_name, "skipping unsupported field"),
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn accessors_convert_between_kinds() {
        let record = SessionRecord::new()
            .with("bin_size", 0.01)
            .with("gocue", array![[0.5], [0.7]].into_dyn())
            .with("active_trials", array![1., 0.].into_dyn())
            .with("mouse_name", "Cori")
            .with("one", array![2.5].into_dyn());

        assert_eq!(record.scalar("bin_size").unwrap(), 0.01);
        assert_eq!(record.scalar("one").unwrap(), 2.5);
        assert_eq!(record.floats("gocue").unwrap().shape(), &[2, 1]);
        assert_eq!(
            record.bools("active_trials").unwrap(),
            array![true, false].into_dyn()
        );
        assert_eq!(record.text("mouse_name").unwrap(), "Cori");
        assert_eq!(record.texts("mouse_name").unwrap().ndim(), 0);
    }

    #[test]
    fn lookup_errors() {
        let record = SessionRecord::new().with("mouse_name", "Cori");
        assert_eq!(
            record.floats("wheel").unwrap_err(),
            RecordError::MissingField("wheel".into())
        );
        assert_eq!(
            record.scalar("mouse_name"),
            Err(RecordError::WrongKind {
                field: "mouse_name".into(),
                expected: "a number",
                found: "a string",
            })
        );
    }

    #[test]
    fn from_dict_skips_unsupported_values() {
        let pairs = vec![
            (PyObject::Str("bin_size".into()), PyObject::Float(0.01)),
            (PyObject::Str("notes".into()), PyObject::None),
            (
                PyObject::Str("brain_area".into()),
                PyObject::Array(NpyArray::from_objects(
                    vec![2],
                    false,
                    vec![PyObject::Str("VISp".into()), PyObject::Str("CA1".into())],
                )),
            ),
        ];
        let record = SessionRecord::from_py_dict(pairs).unwrap();
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["bin_size", "brain_area"]);
        assert_eq!(
            record.texts("brain_area").unwrap(),
            array!["VISp".to_owned(), "CA1".to_owned()].into_dyn()
        );
    }

    #[test]
    fn arrays_keep_their_stored_type() {
        let spks = NpyArray::from_raw(vec![2, 1, 2], false, "|u1".into(), vec![0, 3, 200, 1]);
        let pairs = vec![(PyObject::Str("spks".into()), PyObject::Array(spks.clone()))];
        let record = SessionRecord::from_py_dict(pairs).unwrap();

        assert_eq!(record.get("spks"), Some(&Field::Array(spks)));
        assert_eq!(record.shape("spks").unwrap(), &[2, 1, 2]);
        assert_eq!(
            record.floats("spks").unwrap(),
            array![[[0., 3.]], [[200., 1.]]].into_dyn()
        );
        assert_eq!(
            record.int8s("spks", 1.).unwrap(),
            array![[[0i8, 3]], [[-56, 1]]].into_dyn()
        );
        assert!(matches!(
            record.texts("spks"),
            Err(RecordError::Decode { field, .. }) if field == "spks"
        ));
    }
}
