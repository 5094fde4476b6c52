//! Arrays whose element type is only known at runtime.

use super::{ReadNpyError, ReadableElement};
use crate::pickle::PyObject;
use ndarray::prelude::*;
use ndarray::ShapeError;
use num_traits::ToPrimitive;
use py_literal::Value as PyValue;

/// The category of a NumPy type descriptor, with the item size in bytes for
/// numeric kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Bool,
    Int(usize),
    UInt(usize),
    Float(usize),
    Text,
    Object,
    Unsupported,
}

/// Classifies a type descriptor such as `"<f8"`, `"|b1"`, `"<U8"` or `"|O"`.
pub(crate) fn element_kind(descr: &str) -> ElementKind {
    let body = descr.trim_start_matches(|c| matches!(c, '<' | '>' | '|' | '='));
    let mut chars = body.chars();
    let code = match chars.next() {
        Some(code) => code,
        None => return ElementKind::Unsupported,
    };
    let size = chars.as_str().parse::<usize>().ok();
    match (code, size) {
        ('?', None) | ('b', Some(1)) => ElementKind::Bool,
        ('b', None) => ElementKind::Int(1),
        ('B', None) => ElementKind::UInt(1),
        ('i', Some(n)) => ElementKind::Int(n),
        ('u', Some(n)) => ElementKind::UInt(n),
        ('f', Some(n)) => ElementKind::Float(n),
        ('U', Some(_)) | ('S', Some(_)) => ElementKind::Text,
        ('O', _) => ElementKind::Object,
        _ => ElementKind::Unsupported,
    }
}

/// The elements of an [`NpyArray`].
#[derive(Clone, Debug, PartialEq)]
pub enum NpyData {
    /// Fixed-size elements, still encoded as described by `descr`.
    Raw { descr: String, bytes: Vec<u8> },
    /// Python objects of an object (`|O`) array.
    Objects(Vec<PyObject>),
}

/// A NumPy array as found in an `.npy` file or a pickle stream.
#[derive(Clone, Debug, PartialEq)]
pub struct NpyArray {
    shape: Vec<usize>,
    fortran_order: bool,
    data: NpyData,
}

impl NpyArray {
    pub fn from_raw(shape: Vec<usize>, fortran_order: bool, descr: String, bytes: Vec<u8>) -> Self {
        NpyArray {
            shape,
            fortran_order,
            data: NpyData::Raw { descr, bytes },
        }
    }

    pub fn from_objects(shape: Vec<usize>, fortran_order: bool, objects: Vec<PyObject>) -> Self {
        NpyArray {
            shape,
            fortran_order,
            data: NpyData::Objects(objects),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fortran_order(&self) -> bool {
        self.fortran_order
    }

    pub fn data(&self) -> &NpyData {
        &self.data
    }

    /// The type descriptor, or `None` for object arrays.
    pub fn descr(&self) -> Option<&str> {
        match self.data {
            NpyData::Raw { ref descr, .. } => Some(descr),
            NpyData::Objects(_) => None,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self.data {
            NpyData::Raw { ref descr, .. } => element_kind(descr),
            NpyData::Objects(_) => ElementKind::Object,
        }
    }

    /// Consumes the array and returns its objects in C order, or
    /// `None` if it is not an object array.
    pub fn into_objects(self) -> Option<Vec<PyObject>> {
        match self.data {
            NpyData::Objects(objects) => Some(objects),
            NpyData::Raw { .. } => None,
        }
    }

    /// Object arrays are pickled as element lists in C order, whatever their
    /// `fortran_order` flag says.
    fn from_object_order<A>(&self, data: Vec<A>) -> Result<ArrayD<A>, ShapeError> {
        Array::from_shape_vec(IxDyn(&self.shape), data)
    }

    fn from_memory_order<A>(&self, data: Vec<A>) -> Result<ArrayD<A>, ShapeError> {
        let dim = IxDyn(&self.shape);
        if self.fortran_order {
            Array::from_shape_vec(dim.f(), data)
        } else {
            Array::from_shape_vec(dim, data)
        }
    }

    /// Decodes the elements as `A`; the descriptor must match `A` exactly.
    pub fn read<A: ReadableElement>(&self) -> Result<ArrayD<A>, ReadNpyError> {
        match self.data {
            NpyData::Raw {
                ref descr,
                ref bytes,
            } => {
                let type_desc = PyValue::String(descr.clone());
                let data = A::read_to_end_exact_vec(&bytes[..], &type_desc, self.len())?;
                Ok(self.from_memory_order(data)?)
            }
            NpyData::Objects(_) => Err(ReadNpyError::WrongDescriptor(PyValue::String(
                "|O".into(),
            ))),
        }
    }

    fn read_widened<A>(&self) -> Result<ArrayD<f64>, ReadNpyError>
    where
        A: ReadableElement + ToPrimitive + Clone,
    {
        Ok(self
            .read::<A>()?
            .mapv(|elem| elem.to_f64().unwrap_or(f64::NAN)))
    }

    /// Decodes any numeric or boolean array as `f64`.
    ///
    /// Object arrays are accepted when every element is a Python `int`,
    /// `float` or `bool`.
    pub fn to_f64(&self) -> Result<ArrayD<f64>, ReadNpyError> {
        match self.kind() {
            ElementKind::Float(8) => self.read::<f64>(),
            ElementKind::Float(4) => self.read_widened::<f32>(),
            ElementKind::Int(1) => self.read_widened::<i8>(),
            ElementKind::Int(2) => self.read_widened::<i16>(),
            ElementKind::Int(4) => self.read_widened::<i32>(),
            ElementKind::Int(8) => self.read_widened::<i64>(),
            ElementKind::UInt(1) => self.read_widened::<u8>(),
            ElementKind::UInt(2) => self.read_widened::<u16>(),
            ElementKind::UInt(4) => self.read_widened::<u32>(),
            ElementKind::UInt(8) => self.read_widened::<u64>(),
            ElementKind::Bool => Ok(self.read::<bool>()?.mapv(|b| if b { 1. } else { 0. })),
            ElementKind::Object => {
                let data = self
                    .objects()
                    .iter()
                    .map(|obj| {
                        obj.as_f64().ok_or(ReadNpyError::ObjectElement {
                            expected: "a number",
                            found: obj.type_name(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.from_object_order(data)?)
            }
            _ => Err(ReadNpyError::WrongDescriptor(self.type_desc())),
        }
    }

    fn read_wrapped<A>(&self, scale: f64) -> Result<ArrayD<i8>, ReadNpyError>
    where
        A: ReadableElement + ToPrimitive + Clone,
    {
        let arr = self.read::<A>()?;
        Ok(if scale == 1. {
            // Only the low byte matters, so `u64` values above `i64::MAX` may wrap.
            arr.mapv(|elem| {
                elem.to_i64()
                    .or_else(|| elem.to_u64().map(|x| x as i64))
                    .map_or(0, |x| x as i8)
            })
        } else {
            arr.mapv(|elem| wrap_to_i8(elem.to_f64().unwrap_or(f64::NAN) * scale))
        })
    }

    /// Decodes any numeric or boolean array as `i8`, multiplying by `scale`
    /// first, the way NumPy's `astype(np.int8)` does: floats are truncated
    /// toward zero and every value wraps modulo 256.
    pub fn to_i8_wrapping(&self, scale: f64) -> Result<ArrayD<i8>, ReadNpyError> {
        match self.kind() {
            ElementKind::Int(1) if scale == 1. => self.read::<i8>(),
            ElementKind::Int(1) => self.read_wrapped::<i8>(scale),
            ElementKind::Int(2) => self.read_wrapped::<i16>(scale),
            ElementKind::Int(4) => self.read_wrapped::<i32>(scale),
            ElementKind::Int(8) => self.read_wrapped::<i64>(scale),
            ElementKind::UInt(1) => self.read_wrapped::<u8>(scale),
            ElementKind::UInt(2) => self.read_wrapped::<u16>(scale),
            ElementKind::UInt(4) => self.read_wrapped::<u32>(scale),
            ElementKind::UInt(8) => self.read_wrapped::<u64>(scale),
            _ => Ok(self.to_f64()?.mapv(|x| wrap_to_i8(x * scale))),
        }
    }

    /// Decodes a fixed-width text array, or an object array of `str`.
    pub fn to_text(&self) -> Result<ArrayD<String>, ReadNpyError> {
        match self.kind() {
            ElementKind::Text => self.read::<String>(),
            ElementKind::Object => {
                let data = self
                    .objects()
                    .iter()
                    .map(|obj| match obj {
                        PyObject::Str(s) => Ok(s.clone()),
                        other => Err(ReadNpyError::ObjectElement {
                            expected: "a str",
                            found: other.type_name(),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.from_object_order(data)?)
            }
            _ => Err(ReadNpyError::WrongDescriptor(self.type_desc())),
        }
    }

    fn objects(&self) -> &[PyObject] {
        match self.data {
            NpyData::Objects(ref objects) => objects,
            NpyData::Raw { .. } => &[],
        }
    }

    fn type_desc(&self) -> PyValue {
        PyValue::String(self.descr().unwrap_or("|O").to_owned())
    }
}

/// Truncates toward zero, then wraps modulo 256.
pub(crate) fn wrap_to_i8(x: f64) -> i8 {
    x.trunc() as i64 as i8
}

fn c_order_bytes<A, const N: usize>(arr: &ArrayD<A>, to_bytes: impl Fn(&A) -> [u8; N]) -> Vec<u8> {
    arr.iter().flat_map(to_bytes).collect()
}

impl From<ArrayD<f64>> for NpyArray {
    fn from(arr: ArrayD<f64>) -> NpyArray {
        let bytes = c_order_bytes(&arr, |x| x.to_le_bytes());
        NpyArray::from_raw(arr.shape().to_vec(), false, "<f8".into(), bytes)
    }
}

impl From<ArrayD<i64>> for NpyArray {
    fn from(arr: ArrayD<i64>) -> NpyArray {
        let bytes = c_order_bytes(&arr, |x| x.to_le_bytes());
        NpyArray::from_raw(arr.shape().to_vec(), false, "<i8".into(), bytes)
    }
}

impl From<ArrayD<bool>> for NpyArray {
    fn from(arr: ArrayD<bool>) -> NpyArray {
        let bytes = c_order_bytes(&arr, |&b| [b as u8]);
        NpyArray::from_raw(arr.shape().to_vec(), false, "|b1".into(), bytes)
    }
}

impl From<ArrayD<String>> for NpyArray {
    fn from(arr: ArrayD<String>) -> NpyArray {
        let shape = arr.shape().to_vec();
        let objects = arr.iter().cloned().map(PyObject::Str).collect();
        NpyArray::from_objects(shape, false, objects)
    }
}
