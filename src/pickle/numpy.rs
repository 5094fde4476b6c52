//! The callables NumPy's pickles refer to, and the objects they build.

use super::{Node, PyObject, Slot, UnpickleError};
use crate::npy::NpyArray;
use std::cell::Ref;

/// A whitelisted global.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Callable {
    /// `numpy.core.multiarray._reconstruct`
    Reconstruct,
    /// `numpy.ndarray`, only ever an argument of `_reconstruct`.
    NdarrayType,
    /// `numpy.dtype`
    DtypeType,
    /// `numpy.core.multiarray.scalar`
    Scalar,
    /// `_codecs.encode`, used for `bytes` under protocol 2.
    CodecsEncode,
}

impl Callable {
    pub(super) fn resolve(module: &str, name: &str) -> Option<Callable> {
        let multiarray = matches!(module, "numpy.core.multiarray" | "numpy._core.multiarray");
        match (module, name) {
            (_, "_reconstruct") if multiarray => Some(Callable::Reconstruct),
            (_, "scalar") if multiarray => Some(Callable::Scalar),
            ("numpy", "ndarray") => Some(Callable::NdarrayType),
            ("numpy", "dtype") => Some(Callable::DtypeType),
            ("_codecs", "encode") => Some(Callable::CodecsEncode),
            _ => None,
        }
    }
}

fn borrow(slot: &Slot) -> Result<Ref<'_, Node>, UnpickleError> {
    slot.try_borrow()
        .map_err(|_| UnpickleError::Malformed("object refers to itself while being built"))
}

fn arg(args: &[Slot], index: usize) -> Result<&Slot, UnpickleError> {
    args.get(index)
        .ok_or(UnpickleError::Malformed("too few arguments"))
}

fn string_arg(args: &[Slot], index: usize) -> Result<String, UnpickleError> {
    match *borrow(arg(args, index)?)? {
        Node::Str(ref s) => Ok(s.clone()),
        _ => Err(UnpickleError::Malformed("expected a str argument")),
    }
}

/// Applies `callable` to `args`, as `REDUCE` does.
pub(super) fn call(callable: Callable, args: &[Slot]) -> Result<Node, UnpickleError> {
    match callable {
        Callable::Reconstruct => match *borrow(arg(args, 0)?)? {
            Node::Callable(Callable::NdarrayType) => Ok(Node::Array(ArrayNode::default())),
            _ => Err(UnpickleError::Malformed("only plain ndarrays can be reconstructed")),
        },
        Callable::NdarrayType => Err(UnpickleError::Malformed("ndarray called directly")),
        Callable::DtypeType => Ok(Node::Dtype(Dtype {
            code: string_arg(args, 0)?,
            byteorder: "=".to_owned(),
        })),
        Callable::Scalar => {
            let dtype = match *borrow(arg(args, 0)?)? {
                Node::Dtype(ref dtype) => dtype.clone(),
                _ => return Err(UnpickleError::Malformed("scalar without a dtype")),
            };
            let value = arg(args, 1)?;
            let payload = if dtype.is_object() {
                Payload::Objects(vec![value.clone()])
            } else {
                match *borrow(value)? {
                    Node::Bytes(ref bytes) => Payload::Raw(bytes.clone()),
                    _ => return Err(UnpickleError::Malformed("scalar data is not bytes")),
                }
            };
            Ok(Node::Array(ArrayNode {
                shape: Vec::new(),
                fortran_order: false,
                dtype: Some(dtype),
                payload,
            }))
        }
        Callable::CodecsEncode => {
            let text = string_arg(args, 0)?;
            let encoding = string_arg(args, 1)?;
            match encoding.to_ascii_lowercase().as_str() {
                "latin1" | "latin-1" | "iso-8859-1" => text
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).ok())
                    .collect::<Option<Vec<u8>>>()
                    .map(Node::Bytes)
                    .ok_or(UnpickleError::Malformed("character outside latin-1")),
                "utf8" | "utf-8" => Ok(Node::Bytes(text.into_bytes())),
                _ => Err(UnpickleError::Malformed("unsupported text encoding")),
            }
        }
    }
}

/// A `numpy.dtype` for a scalar type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Dtype {
    /// Kind and size, e.g. `f8`, `b1`, `U8` or `O8`.
    code: String,
    /// `<`, `>`, `|` or `=`.
    byteorder: String,
}

impl Dtype {
    fn is_object(&self) -> bool {
        self.code.starts_with('O')
    }

    /// The equivalent `.npy` type descriptor, e.g. `<f8`.
    fn descr(&self) -> String {
        let order = match self.byteorder.as_str() {
            "=" if cfg!(target_endian = "little") => "<",
            "=" => ">",
            order => order,
        };
        format!("{}{}", order, self.code)
    }

    /// Applies the `BUILD` state `(version, byteorder, ...)`.
    pub(super) fn set_state(&mut self, state: &[Slot]) -> Result<(), UnpickleError> {
        self.byteorder = string_arg(state, 1)?;
        Ok(())
    }
}

#[derive(Default)]
enum Payload {
    #[default]
    Empty,
    Raw(Vec<u8>),
    Objects(Vec<Slot>),
}

/// An `ndarray` created by `_reconstruct`, filled in by `BUILD`.
#[derive(Default)]
pub(super) struct ArrayNode {
    shape: Vec<usize>,
    fortran_order: bool,
    dtype: Option<Dtype>,
    payload: Payload,
}

impl ArrayNode {
    /// Applies the `BUILD` state `(version, shape, dtype, is_fortran, data)`.
    /// The version is absent in very old pickles.
    pub(super) fn set_state(&mut self, state: &[Slot]) -> Result<(), UnpickleError> {
        let state = match state.len() {
            5 => &state[1..],
            4 => state,
            _ => return Err(UnpickleError::Malformed("ndarray state has the wrong length")),
        };

        self.shape = match *borrow(&state[0])? {
            Node::Tuple(ref dims) => dims
                .iter()
                .map(|dim| match *borrow(dim)? {
                    Node::Int(len) => usize::try_from(len)
                        .map_err(|_| UnpickleError::Malformed("negative dimension")),
                    _ => Err(UnpickleError::Malformed("dimension is not an int")),
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(UnpickleError::Malformed("shape is not a tuple")),
        };
        self.dtype = match *borrow(&state[1])? {
            Node::Dtype(ref dtype) => Some(dtype.clone()),
            _ => return Err(UnpickleError::Malformed("ndarray state without a dtype")),
        };
        self.fortran_order = match *borrow(&state[2])? {
            Node::Bool(b) => b,
            Node::Int(i) => i != 0,
            _ => return Err(UnpickleError::Malformed("fortran flag is not a bool")),
        };
        self.payload = match *borrow(&state[3])? {
            Node::Bytes(ref bytes) => Payload::Raw(bytes.clone()),
            Node::List(ref items) => Payload::Objects(items.clone()),
            _ => return Err(UnpickleError::Malformed("ndarray data is neither bytes nor a list")),
        };
        Ok(())
    }

    /// Converts to an [`NpyArray`], using `objects` to convert the elements
    /// of an object array.
    pub(super) fn to_npy_array<F>(&self, objects: F) -> Result<NpyArray, UnpickleError>
    where
        F: FnOnce(&[Slot]) -> Result<Vec<PyObject>, UnpickleError>,
    {
        let dtype = self
            .dtype
            .as_ref()
            .ok_or(UnpickleError::Malformed("ndarray was never built"))?;
        match self.payload {
            Payload::Empty => Err(UnpickleError::Malformed("ndarray was never built")),
            Payload::Raw(ref bytes) if !dtype.is_object() => Ok(NpyArray::from_raw(
                self.shape.clone(),
                self.fortran_order,
                dtype.descr(),
                bytes.clone(),
            )),
            Payload::Objects(ref items) if dtype.is_object() => {
                let len = self
                    .shape
                    .iter()
                    .try_fold(1usize, |acc, &len| acc.checked_mul(len));
                if len != Some(items.len()) {
                    return Err(UnpickleError::Malformed("object count does not match shape"));
                }
                Ok(NpyArray::from_objects(
                    self.shape.clone(),
                    self.fortran_order,
                    objects(items)?,
                ))
            }
            _ => Err(UnpickleError::Malformed("ndarray data does not match its dtype")),
        }
    }
}
