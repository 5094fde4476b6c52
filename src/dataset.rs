//! Labeled datasets: named variables over named dimensions.

use ndarray::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A dimension of a session dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dim {
    Trial,
    Time,
    Cell,
}

impl Dim {
    pub const ALL: [Dim; 3] = [Dim::Trial, Dim::Time, Dim::Cell];

    pub fn name(self) -> &'static str {
        match self {
            Dim::Trial => "trial",
            Dim::Time => "time",
            Dim::Cell => "cell",
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dim {
    type Err = String;

    fn from_str(s: &str) -> Result<Dim, String> {
        Dim::ALL
            .into_iter()
            .find(|dim| dim.name() == s)
            .ok_or_else(|| s.to_owned())
    }
}

/// The values of a variable, in their stored element type.
#[derive(Clone, Debug, PartialEq)]
pub enum VariableData {
    Int8(ArrayD<i8>),
    Float64(ArrayD<f64>),
    Bool(ArrayD<bool>),
    Text(ArrayD<String>),
}

impl VariableData {
    pub fn shape(&self) -> &[usize] {
        match self {
            VariableData::Int8(arr) => arr.shape(),
            VariableData::Float64(arr) => arr.shape(),
            VariableData::Bool(arr) => arr.shape(),
            VariableData::Text(arr) => arr.shape(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, VariableData::Text(_))
    }

    pub fn as_i8(&self) -> Option<&ArrayD<i8>> {
        match self {
            VariableData::Int8(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            VariableData::Float64(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&ArrayD<bool>> {
        match self {
            VariableData::Bool(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&ArrayD<String>> {
        match self {
            VariableData::Text(arr) => Some(arr),
            _ => None,
        }
    }
}

/// A named variable and the dimensions its axes vary along.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dims: Vec<Dim>,
    pub data: VariableData,
}

/// Coordinate values labeling the indices of one dimension.
#[derive(Clone, Debug, PartialEq)]
pub enum Coordinate {
    Int64(Array1<i64>),
    Float64(Array1<f64>),
}

impl Coordinate {
    pub fn len(&self) -> usize {
        match self {
            Coordinate::Int64(values) => values.len(),
            Coordinate::Float64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `1..=len` as integers.
    pub fn counting(len: usize) -> Coordinate {
        Coordinate::Int64((1..=len as i64).collect())
    }
}

/// The singleton dimensions identifying a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub mouse: String,
    pub session_date: String,
}

impl SessionIdentity {
    pub const MOUSE_DIM: &'static str = "mouse";
    pub const SESSION_DATE_DIM: &'static str = "session_date";
}

/// Dimension lengths that disagree between variables or coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeConflict {
    pub dim: Dim,
    /// `(variable or coordinate name, length)` for every user of the
    /// dimension.
    pub sizes: Vec<(String, usize)>,
}

/// One session: variables over `trial`, `time` and `cell`, coordinates for
/// those dimensions, scalar attributes, and the session identity every
/// variable is broadcast under.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledDataset {
    pub identity: SessionIdentity,
    pub variables: Vec<Variable>,
    pub coords: BTreeMap<Dim, Coordinate>,
    pub attrs: BTreeMap<String, f64>,
}

impl LabeledDataset {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|var| var.name == name)
    }

    pub fn coord(&self, dim: Dim) -> Option<&Coordinate> {
        self.coords.get(&dim)
    }

    pub fn attr(&self, name: &str) -> Option<f64> {
        self.attrs.get(name).copied()
    }

    /// Length of `dim` according to its coordinate.
    pub fn dim_len(&self, dim: Dim) -> Option<usize> {
        self.coord(dim).map(Coordinate::len)
    }

    /// Dimensions whose length is not the same for every variable and
    /// coordinate using it.
    pub fn size_conflicts(&self) -> Vec<SizeConflict> {
        let mut sizes: BTreeMap<Dim, Vec<(String, usize)>> = BTreeMap::new();
        for (dim, coord) in &self.coords {
            sizes
                .entry(*dim)
                .or_default()
                .push((dim.name().to_owned(), coord.len()));
        }
        for var in &self.variables {
            for (dim, &len) in var.dims.iter().zip(var.data.shape()) {
                sizes.entry(*dim).or_default().push((var.name.clone(), len));
            }
        }
        sizes
            .into_iter()
            .filter(|(_, sizes)| sizes.windows(2).any(|w| w[0].1 != w[1].1))
            .map(|(dim, sizes)| SizeConflict { dim, sizes })
            .collect()
    }
}
