//! A restricted pickle interpreter.
//!
//! Object arrays in `.npy` files are stored as pickle streams. This module
//! runs the pickle virtual machine for protocols 2 to 4, but only calls the
//! handful of callables NumPy needs to rebuild arrays, dtypes and scalars;
//! every other global is rejected. Nothing from the stream is executed.

mod numpy;

use self::numpy::{ArrayNode, Callable, Dtype};
use crate::npy::NpyArray;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::rc::Rc;

/// Highest protocol understood by [`Unpickler`].
pub const HIGHEST_PROTOCOL: u8 = 4;

/// Nesting limit when converting the unpickled object graph.
const MAX_DEPTH: usize = 128;

pub(crate) mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
}

/// An error interpreting a pickle stream.
#[derive(Debug)]
pub enum UnpickleError {
    /// An error caused by I/O, including a stream that ends before `STOP`.
    Io(io::Error),
    UnsupportedProtocol(u8),
    UnknownOpcode(u8),
    StackUnderflow,
    MissingMark,
    MissingMemo(u32),
    /// A global outside the small set of NumPy reconstructors.
    UnsupportedGlobal {
        module: String,
        name: String,
    },
    Utf8(std::string::FromUtf8Error),
    /// An integer does not fit in `i64`.
    IntegerOverflow,
    /// The stream is structurally valid pickle but not what NumPy writes.
    Malformed(&'static str),
}

impl Error for UnpickleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UnpickleError::Io(err) => Some(err),
            UnpickleError::Utf8(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for UnpickleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnpickleError::Io(err) => write!(f, "I/O error: {}", err),
            UnpickleError::UnsupportedProtocol(proto) => {
                write!(f, "unsupported pickle protocol {}", proto)
            }
            UnpickleError::UnknownOpcode(code) => write!(f, "unsupported opcode {:#04x}", code),
            UnpickleError::StackUnderflow => write!(f, "pickle stack underflow"),
            UnpickleError::MissingMark => write!(f, "no mark on the pickle stack"),
            UnpickleError::MissingMemo(index) => write!(f, "memo entry {} is missing", index),
            UnpickleError::UnsupportedGlobal { module, name } => {
                write!(f, "refusing to load global {}.{}", module, name)
            }
            UnpickleError::Utf8(err) => write!(f, "string is not UTF-8: {}", err),
            UnpickleError::IntegerOverflow => write!(f, "integer does not fit in 64 bits"),
            UnpickleError::Malformed(what) => write!(f, "malformed pickle: {}", what),
        }
    }
}

impl From<io::Error> for UnpickleError {
    fn from(err: io::Error) -> UnpickleError {
        UnpickleError::Io(err)
    }
}

impl From<std::string::FromUtf8Error> for UnpickleError {
    fn from(err: std::string::FromUtf8Error) -> UnpickleError {
        UnpickleError::Utf8(err)
    }
}

/// A Python value decoded from a pickle stream.
#[derive(Clone, Debug, PartialEq)]
pub enum PyObject {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<PyObject>),
    List(Vec<PyObject>),
    /// Key-value pairs in insertion order.
    Dict(Vec<(PyObject, PyObject)>),
    /// A NumPy `ndarray` or NumPy scalar (as a 0-d array).
    Array(NpyArray),
}

impl PyObject {
    /// The Python type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PyObject::None => "None",
            PyObject::Bool(_) => "bool",
            PyObject::Int(_) => "int",
            PyObject::Float(_) => "float",
            PyObject::Str(_) => "str",
            PyObject::Bytes(_) => "bytes",
            PyObject::Tuple(_) => "tuple",
            PyObject::List(_) => "list",
            PyObject::Dict(_) => "dict",
            PyObject::Array(_) => "ndarray",
        }
    }

    /// Returns the value of a Python `int`, `float` or `bool`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            PyObject::Bool(b) => Some(if b { 1. } else { 0. }),
            PyObject::Int(i) => Some(i as f64),
            PyObject::Float(x) => Some(x),
            _ => None,
        }
    }

    /// Returns the text of a `str`, or of `bytes` holding UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PyObject::Str(s) => Some(s),
            PyObject::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

type Slot = Rc<RefCell<Node>>;

/// A value on the pickle stack. Containers hold shared slots because the
/// memo may alias them and later opcodes mutate them in place.
enum Node {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Slot>),
    List(Vec<Slot>),
    Dict(Vec<(Slot, Slot)>),
    Callable(Callable),
    Dtype(Dtype),
    Array(ArrayNode),
}

impl Node {
    fn into_slot(self) -> Slot {
        Rc::new(RefCell::new(self))
    }
}

/// Interprets a pickle stream read from `R`.
pub struct Unpickler<R> {
    reader: R,
    stack: Vec<Slot>,
    marks: Vec<usize>,
    memo: HashMap<u32, Slot>,
}

impl<R: io::Read> Unpickler<R> {
    pub fn new(reader: R) -> Self {
        Unpickler {
            reader,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    /// Runs the stream up to `STOP` and returns the value left on the stack.
    pub fn load(mut self) -> Result<PyObject, UnpickleError> {
        loop {
            let code = self.reader.read_u8()?;
            if code == op::STOP {
                break;
            }
            self.step(code)?;
        }
        let top = self.pop()?;
        let value = to_object(&top, 0)?;
        Ok(value)
    }

    fn step(&mut self, code: u8) -> Result<(), UnpickleError> {
        match code {
            op::PROTO => {
                let proto = self.reader.read_u8()?;
                if proto > HIGHEST_PROTOCOL {
                    return Err(UnpickleError::UnsupportedProtocol(proto));
                }
            }
            op::FRAME => {
                // Frames only group opcodes for buffering.
                self.reader.read_u64::<LittleEndian>()?;
            }
            op::MARK => self.marks.push(self.stack.len()),
            op::POP => {
                self.pop()?;
            }
            op::POP_MARK => {
                self.pop_mark()?;
            }
            op::DUP => {
                let top = self.top()?;
                self.stack.push(top);
            }
            op::NONE => self.push(Node::None),
            op::NEWTRUE => self.push(Node::Bool(true)),
            op::NEWFALSE => self.push(Node::Bool(false)),
            op::BININT => {
                let value = self.reader.read_i32::<LittleEndian>()?;
                self.push(Node::Int(value.into()));
            }
            op::BININT1 => {
                let value = self.reader.read_u8()?;
                self.push(Node::Int(value.into()));
            }
            op::BININT2 => {
                let value = self.reader.read_u16::<LittleEndian>()?;
                self.push(Node::Int(value.into()));
            }
            op::LONG1 => {
                let len = usize::from(self.reader.read_u8()?);
                let value = self.read_long(len)?;
                self.push(Node::Int(value));
            }
            op::LONG4 => {
                let len = self.reader.read_i32::<LittleEndian>()?;
                let len = usize::try_from(len).map_err(|_| UnpickleError::Malformed("negative length"))?;
                let value = self.read_long(len)?;
                self.push(Node::Int(value));
            }
            op::BINFLOAT => {
                let value = self.reader.read_f64::<BigEndian>()?;
                self.push(Node::Float(value));
            }
            op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                let len = usize::from(self.reader.read_u8()?);
                let bytes = self.read_bytes(len)?;
                self.push(Node::Bytes(bytes));
            }
            op::BINSTRING | op::BINBYTES => {
                let len = self.reader.read_u32::<LittleEndian>()? as usize;
                let bytes = self.read_bytes(len)?;
                self.push(Node::Bytes(bytes));
            }
            op::BINBYTES8 => {
                let len = self.read_len_u64()?;
                let bytes = self.read_bytes(len)?;
                self.push(Node::Bytes(bytes));
            }
            op::SHORT_BINUNICODE => {
                let len = usize::from(self.reader.read_u8()?);
                let text = String::from_utf8(self.read_bytes(len)?)?;
                self.push(Node::Str(text));
            }
            op::BINUNICODE => {
                let len = self.reader.read_u32::<LittleEndian>()? as usize;
                let text = String::from_utf8(self.read_bytes(len)?)?;
                self.push(Node::Str(text));
            }
            op::BINUNICODE8 => {
                let len = self.read_len_u64()?;
                let text = String::from_utf8(self.read_bytes(len)?)?;
                self.push(Node::Str(text));
            }
            op::EMPTY_TUPLE => self.push(Node::Tuple(Vec::new())),
            op::TUPLE => {
                let items = self.pop_mark()?;
                self.push(Node::Tuple(items));
            }
            op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                let n = usize::from(code - op::TUPLE1 + 1);
                if self.stack.len() < n {
                    return Err(UnpickleError::StackUnderflow);
                }
                let items = self.stack.split_off(self.stack.len() - n);
                self.push(Node::Tuple(items));
            }
            op::EMPTY_LIST => self.push(Node::List(Vec::new())),
            op::LIST => {
                let items = self.pop_mark()?;
                self.push(Node::List(items));
            }
            op::APPEND => {
                let value = self.pop()?;
                self.extend_list(vec![value])?;
            }
            op::APPENDS => {
                let items = self.pop_mark()?;
                self.extend_list(items)?;
            }
            op::EMPTY_DICT => self.push(Node::Dict(Vec::new())),
            op::DICT => {
                let items = self.pop_mark()?;
                let pairs = pairs(items)?;
                self.push(Node::Dict(pairs));
            }
            op::SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.extend_dict(vec![(key, value)])?;
            }
            op::SETITEMS => {
                let items = self.pop_mark()?;
                self.extend_dict(pairs(items)?)?;
            }
            op::GLOBAL => {
                let module = self.read_line()?;
                let name = self.read_line()?;
                self.push_global(module, name)?;
            }
            op::STACK_GLOBAL => {
                let name = self.pop_string()?;
                let module = self.pop_string()?;
                self.push_global(module, name)?;
            }
            // `cls.__new__(cls, *args)` is a plain call for the whitelisted
            // callables.
            op::REDUCE | op::NEWOBJ => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let result = reduce(&callable, &args)?;
                self.push(result);
            }
            op::BUILD => {
                let state = self.pop()?;
                let target = self.top()?;
                build(&target, &state)?;
            }
            op::PUT => {
                let index = self.read_line_index()?;
                self.memoize(index)?;
            }
            op::BINPUT => {
                let index = self.reader.read_u8()?;
                self.memoize(index.into())?;
            }
            op::LONG_BINPUT => {
                let index = self.reader.read_u32::<LittleEndian>()?;
                self.memoize(index)?;
            }
            op::MEMOIZE => {
                let index = self.memo.len() as u32;
                self.memoize(index)?;
            }
            op::GET => {
                let index = self.read_line_index()?;
                self.recall(index)?;
            }
            op::BINGET => {
                let index = self.reader.read_u8()?;
                self.recall(index.into())?;
            }
            op::LONG_BINGET => {
                let index = self.reader.read_u32::<LittleEndian>()?;
                self.recall(index)?;
            }
            other => return Err(UnpickleError::UnknownOpcode(other)),
        }
        Ok(())
    }

    fn push(&mut self, node: Node) {
        self.stack.push(node.into_slot());
    }

    fn pop(&mut self) -> Result<Slot, UnpickleError> {
        if self.marks.last().map_or(false, |&mark| mark >= self.stack.len()) {
            return Err(UnpickleError::StackUnderflow);
        }
        self.stack.pop().ok_or(UnpickleError::StackUnderflow)
    }

    fn top(&self) -> Result<Slot, UnpickleError> {
        self.stack.last().cloned().ok_or(UnpickleError::StackUnderflow)
    }

    /// Pops everything above the most recent mark, and the mark itself.
    fn pop_mark(&mut self) -> Result<Vec<Slot>, UnpickleError> {
        let mark = self.marks.pop().ok_or(UnpickleError::MissingMark)?;
        if mark > self.stack.len() {
            return Err(UnpickleError::StackUnderflow);
        }
        Ok(self.stack.split_off(mark))
    }

    fn pop_string(&mut self) -> Result<String, UnpickleError> {
        let slot = self.pop()?;
        let node = slot.borrow();
        match *node {
            Node::Str(ref s) => Ok(s.clone()),
            _ => Err(UnpickleError::Malformed("STACK_GLOBAL expects two strings")),
        }
    }

    fn push_global(&mut self, module: String, name: String) -> Result<(), UnpickleError> {
        match Callable::resolve(&module, &name) {
            Some(callable) => {
                self.push(Node::Callable(callable));
                Ok(())
            }
            None => Err(UnpickleError::UnsupportedGlobal { module, name }),
        }
    }

    fn extend_list(&mut self, items: Vec<Slot>) -> Result<(), UnpickleError> {
        let target = self.top()?;
        let mut node = target.borrow_mut();
        match *node {
            Node::List(ref mut list) => {
                list.extend(items);
                Ok(())
            }
            _ => Err(UnpickleError::Malformed("APPEND target is not a list")),
        }
    }

    fn extend_dict(&mut self, items: Vec<(Slot, Slot)>) -> Result<(), UnpickleError> {
        let target = self.top()?;
        let mut node = target.borrow_mut();
        match *node {
            Node::Dict(ref mut dict) => {
                dict.extend(items);
                Ok(())
            }
            _ => Err(UnpickleError::Malformed("SETITEM target is not a dict")),
        }
    }

    fn memoize(&mut self, index: u32) -> Result<(), UnpickleError> {
        let top = self.top()?;
        self.memo.insert(index, top);
        Ok(())
    }

    fn recall(&mut self, index: u32) -> Result<(), UnpickleError> {
        let slot = self
            .memo
            .get(&index)
            .cloned()
            .ok_or(UnpickleError::MissingMemo(index))?;
        self.stack.push(slot);
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, UnpickleError> {
        let mut buf = vec![0; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_len_u64(&mut self) -> Result<usize, UnpickleError> {
        let len = self.reader.read_u64::<LittleEndian>()?;
        usize::try_from(len).map_err(|_| UnpickleError::Malformed("length overflows usize"))
    }

    /// Reads a little-endian two's complement integer of `len` bytes.
    fn read_long(&mut self, len: usize) -> Result<i64, UnpickleError> {
        if len > 8 {
            return Err(UnpickleError::IntegerOverflow);
        }
        let bytes = self.read_bytes(len)?;
        let negative = bytes.last().map_or(false, |&b| b & 0x80 != 0);
        let mut buf = if negative { [0xff; 8] } else { [0; 8] };
        buf[..len].copy_from_slice(&bytes);
        Ok(i64::from_le_bytes(buf))
    }

    fn read_line(&mut self) -> Result<String, UnpickleError> {
        let mut line = Vec::new();
        loop {
            match self.reader.read_u8()? {
                b'\n' => break,
                byte => line.push(byte),
            }
        }
        Ok(String::from_utf8(line)?)
    }

    fn read_line_index(&mut self) -> Result<u32, UnpickleError> {
        self.read_line()?
            .trim()
            .parse()
            .map_err(|_| UnpickleError::Malformed("memo index is not an integer"))
    }
}

fn pairs(items: Vec<Slot>) -> Result<Vec<(Slot, Slot)>, UnpickleError> {
    if items.len() % 2 != 0 {
        return Err(UnpickleError::Malformed("odd number of dict items"));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        out.push((key, value));
    }
    Ok(out)
}

fn reduce(callable: &Slot, args: &Slot) -> Result<Node, UnpickleError> {
    let callable = match *callable.borrow() {
        Node::Callable(callable) => callable,
        _ => return Err(UnpickleError::Malformed("REDUCE target is not callable")),
    };
    let args = args.borrow();
    match *args {
        Node::Tuple(ref items) => numpy::call(callable, items),
        _ => Err(UnpickleError::Malformed("REDUCE arguments are not a tuple")),
    }
}

fn build(target: &Slot, state: &Slot) -> Result<(), UnpickleError> {
    if Rc::ptr_eq(target, state) {
        return Err(UnpickleError::Malformed("object is its own state"));
    }
    let state = state.borrow();
    let state = match *state {
        Node::Tuple(ref items) => items,
        _ => return Err(UnpickleError::Malformed("BUILD state is not a tuple")),
    };
    let mut target = target.borrow_mut();
    match *target {
        Node::Array(ref mut array) => array.set_state(state),
        Node::Dtype(ref mut dtype) => dtype.set_state(state),
        _ => Err(UnpickleError::Malformed("BUILD on an unsupported object")),
    }
}

/// Converts the shared object graph into an owned tree.
fn to_object(slot: &Slot, depth: usize) -> Result<PyObject, UnpickleError> {
    if depth > MAX_DEPTH {
        return Err(UnpickleError::Malformed("objects nested too deeply"));
    }
    let convert_all = |items: &[Slot]| -> Result<Vec<PyObject>, UnpickleError> {
        items.iter().map(|item| to_object(item, depth + 1)).collect()
    };
    let node = slot.borrow();
    Ok(match *node {
        Node::None => PyObject::None,
        Node::Bool(b) => PyObject::Bool(b),
        Node::Int(i) => PyObject::Int(i),
        Node::Float(x) => PyObject::Float(x),
        Node::Str(ref s) => PyObject::Str(s.clone()),
        Node::Bytes(ref b) => PyObject::Bytes(b.clone()),
        Node::Tuple(ref items) => PyObject::Tuple(convert_all(items)?),
        Node::List(ref items) => PyObject::List(convert_all(items)?),
        Node::Dict(ref items) => PyObject::Dict(
            items
                .iter()
                .map(|(key, value)| Ok((to_object(key, depth + 1)?, to_object(value, depth + 1)?)))
                .collect::<Result<_, UnpickleError>>()?,
        ),
        Node::Array(ref array) => {
            PyObject::Array(array.to_npy_array(|objects| convert_all(objects))?)
        }
        Node::Callable(_) => return Err(UnpickleError::Malformed("bare global in value")),
        Node::Dtype(_) => return Err(UnpickleError::Malformed("bare dtype in value")),
    })
}
