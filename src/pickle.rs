//! Tree/graph object decoding (Python pickle streams).
//!
//! The thread trees are written by the analysis job as pickled dicts of
//! dicts. This module runs the pickle opcode machine into an arena: every
//! container (list, tuple, dict, set, reconstructed instance) is allocated
//! once in [`ObjectGraph::objects`] and referenced by [`ObjectId`], so shared
//! and cyclic substructures decode exactly once and re-link by index.
//!
//! Integers outside the IEEE-754 safe range (±2^53 − 1) are kept as decimal
//! strings ([`Value::BigInt`]) so tweet ids never lose precision.
//!
//! Nothing here knows the shape of a thread tree; callers navigate with
//! [`ObjectGraph::get`], [`ObjectGraph::entries`], [`ObjectGraph::items`] and
//! the scalar accessors. Dict keys are indexed by their text form, so `get`
//! is a hash lookup regardless of dict size.

use crate::error::{LensError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

const FORMAT: &str = "pickle";

/// Largest integer magnitude representable exactly in an f64.
pub const MAX_SAFE_INTEGER: i128 = (1 << 53) - 1;

/// Index of a container in [`ObjectGraph::objects`].
pub type ObjectId = usize;

/// A decoded value. Containers are references into the arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integer outside the safe range, as a decimal string.
    BigInt(String),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A class or function reference (`module.name`).
    Global { module: String, name: String },
    Ref(ObjectId),
}

/// A container allocated in the arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// An object rebuilt from a class reference, its constructor arguments
    /// and (optionally) state set by `BUILD`.
    Instance {
        class: String,
        args: Vec<Value>,
        state: Option<Value>,
    },
}

/// Numeric scalar recovered from a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

/// The decoded graph: an arena of containers plus the root value.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
    pub objects: Vec<Object>,
    pub root: Value,
    /// Per dict: key text to the position of its first entry.
    keys: HashMap<ObjectId, HashMap<String, usize>>,
}

/// Decode a pickle stream.
///
/// # Errors
///
/// Returns [`LensError::Decode`] for truncated input, unknown or unsupported
/// opcodes, stack underflow, or memo references that were never stored.
pub fn decode(bytes: &[u8]) -> Result<ObjectGraph> {
    Machine::new(bytes).run()
}

// =============================================================================
// Opcode machine
// =============================================================================

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const INST: u8 = b'i';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const OBJ: u8 = b'o';
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
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

/// Hashable identity of a dict key, matching [`Value`] equality.
#[derive(Debug, PartialEq, Eq, Hash)]
enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    BigInt(String),
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
    Global(String, String),
    Ref(ObjectId),
}

impl From<&Value> for DictKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(v) => Self::Int(*v),
            Value::BigInt(s) => Self::BigInt(s.clone()),
            // -0.0 == 0.0
            Value::Float(f) => Self::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Value::Str(s) => Self::Str(s.clone()),
            Value::Bytes(b) => Self::Bytes(b.clone()),
            Value::Global { module, name } => Self::Global(module.clone(), name.clone()),
            Value::Ref(id) => Self::Ref(*id),
        }
    }
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u64, Value>,
    objects: Vec<Object>,
    /// Per dict: key to entry position, for in-place reassignment.
    dict_slots: HashMap<ObjectId, HashMap<DictKey, usize>>,
}

fn corrupt(reason: impl Into<String>) -> LensError {
    LensError::decode(FORMAT, reason)
}

fn int_value(v: i128) -> Value {
    if v.abs() <= MAX_SAFE_INTEGER {
        // In range by the check above.
        Value::Int(i64::try_from(v).unwrap_or_default())
    } else {
        Value::BigInt(v.to_string())
    }
}

/// Dict-like classes whose contents arrive through `SETITEMS`.
fn is_mapping_class(class: &str) -> bool {
    matches!(
        class,
        "builtins.dict"
            | "__builtin__.dict"
            | "collections.OrderedDict"
            | "collections.defaultdict"
    )
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            objects: Vec::new(),
            dict_slots: HashMap::new(),
        }
    }

    // ---- input -------------------------------------------------------------

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| corrupt(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn read_len32(&mut self) -> Result<usize> {
        usize::try_from(self.read_u32()?).map_err(|_| corrupt("length overflow"))
    }

    fn read_len64(&mut self) -> Result<usize> {
        usize::try_from(self.read_u64()?).map_err(|_| corrupt("length overflow"))
    }

    fn read_line(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let len = memchr::memchr(b'\n', rest).ok_or_else(|| corrupt("unterminated text line"))?;
        let line = self.take(len + 1)?;
        std::str::from_utf8(&line[..len]).map_err(|_| corrupt("text line is not UTF-8"))
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    // ---- stack -------------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value> {
        if self.marks.last().is_some_and(|mark| *mark >= self.stack.len()) {
            return Err(corrupt("stack underflow past mark"));
        }
        self.stack.pop().ok_or_else(|| corrupt("stack underflow"))
    }

    fn top(&self) -> Result<&Value> {
        self.stack.last().ok_or_else(|| corrupt("stack underflow"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self.marks.pop().ok_or_else(|| corrupt("missing mark"))?;
        if mark > self.stack.len() {
            return Err(corrupt("mark beyond stack"));
        }
        Ok(self.stack.split_off(mark))
    }

    fn alloc(&mut self, object: Object) -> Value {
        self.objects.push(object);
        Value::Ref(self.objects.len() - 1)
    }

    fn object_mut(&mut self, value: &Value) -> Result<&mut Object> {
        match value {
            Value::Ref(id) => self
                .objects
                .get_mut(*id)
                .ok_or_else(|| corrupt("dangling object reference")),
            _ => Err(corrupt("expected a container on the stack")),
        }
    }

    fn memo_put(&mut self, index: u64) -> Result<()> {
        let value = self.top()?.clone();
        self.memo.insert(index, value);
        Ok(())
    }

    fn memo_get(&mut self, index: u64) -> Result<()> {
        let value = self
            .memo
            .get(&index)
            .cloned()
            .ok_or_else(|| corrupt(format!("memo entry {index} was never stored")))?;
        self.push(value);
        Ok(())
    }

    // ---- containers --------------------------------------------------------

    fn extend_list(&mut self, items: Vec<Value>) -> Result<()> {
        let target = self.top()?.clone();
        match self.object_mut(&target)? {
            Object::List(list) | Object::Set(list) => {
                list.extend(items);
                Ok(())
            }
            _ => Err(corrupt("APPEND target is not a list")),
        }
    }

    fn set_items(&mut self, items: Vec<Value>) -> Result<()> {
        if items.len() % 2 != 0 {
            return Err(corrupt("odd number of SETITEMS values"));
        }
        let Value::Ref(id) = *self.top()? else {
            return Err(corrupt("expected a container on the stack"));
        };
        let Some(Object::Dict(entries)) = self.objects.get_mut(id) else {
            return Err(corrupt("SETITEM target is not a dict"));
        };
        let slots = self.dict_slots.entry(id).or_default();
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            // Python dict semantics: re-assigning a key replaces in place.
            match slots.entry(DictKey::from(&key)) {
                Entry::Occupied(slot) => entries[*slot.get()].1 = value,
                Entry::Vacant(slot) => {
                    slot.insert(entries.len());
                    entries.push((key, value));
                }
            }
        }
        Ok(())
    }

    fn tuple_items(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Ref(id) => match self.objects.get(*id) {
                Some(Object::Tuple(items) | Object::List(items)) => items.clone(),
                _ => vec![value.clone()],
            },
            Value::None => Vec::new(),
            other => vec![other.clone()],
        }
    }

    fn instantiate(&mut self, callable: &Value, args: Vec<Value>) -> Result<Value> {
        let Value::Global { module, name } = callable else {
            return Err(corrupt("REDUCE callable is not a class reference"));
        };
        let class = format!("{module}.{name}");
        let object = if is_mapping_class(&class) {
            Object::Dict(Vec::new())
        } else if matches!(class.as_str(), "builtins.list" | "__builtin__.list") {
            Object::List(args.first().map(|v| self.tuple_items(v)).unwrap_or_default())
        } else if matches!(
            class.as_str(),
            "builtins.set" | "builtins.frozenset" | "__builtin__.set"
        ) {
            Object::Set(args.first().map(|v| self.tuple_items(v)).unwrap_or_default())
        } else {
            Object::Instance {
                class,
                args,
                state: None,
            }
        };
        Ok(self.alloc(object))
    }

    // ---- main loop ---------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn run(mut self) -> Result<ObjectGraph> {
        loop {
            let opcode = self.read_u8()?;
            match opcode {
                op::PROTO => {
                    let version = self.read_u8()?;
                    if version > 5 {
                        return Err(corrupt(format!("unsupported protocol {version}")));
                    }
                }
                op::FRAME => {
                    self.read_u64()?;
                }
                op::STOP => {
                    let root = self.stack.pop().ok_or_else(|| corrupt("empty stack at STOP"))?;
                    return Ok(ObjectGraph::new(self.objects, root));
                }
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    if self.marks.last().is_some_and(|mark| *mark == self.stack.len()) {
                        self.marks.pop();
                    } else {
                        self.pop()?;
                    }
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?.clone();
                    self.push(top);
                }

                // Scalars
                op::NONE => self.push(Value::None),
                op::NEWTRUE => self.push(Value::Bool(true)),
                op::NEWFALSE => self.push(Value::Bool(false)),
                op::BININT => {
                    let b = self.take(4)?;
                    let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    self.push(Value::Int(i64::from(v)));
                }
                op::BININT1 => {
                    let v = self.read_u8()?;
                    self.push(Value::Int(i64::from(v)));
                }
                op::BININT2 => {
                    let v = self.read_u16()?;
                    self.push(Value::Int(i64::from(v)));
                }
                op::LONG1 => {
                    let len = usize::from(self.read_u8()?);
                    let raw = self.take(len)?;
                    let value = decode_long(raw)?;
                    self.push(value);
                }
                op::LONG4 => {
                    let len = self.read_len32()?;
                    let raw = self.take(len)?;
                    let value = decode_long(raw)?;
                    self.push(value);
                }
                op::INT => {
                    let line = self.read_line()?;
                    let value = match line {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        text => parse_int_text(text)?,
                    };
                    self.push(value);
                }
                op::LONG => {
                    let line = self.read_line()?;
                    let value = parse_int_text(line.trim_end_matches('L'))?;
                    self.push(value);
                }
                op::BINFLOAT => {
                    let b = self.take(8)?;
                    let v = f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                    self.push(Value::Float(v));
                }
                op::FLOAT => {
                    let line = self.read_line()?;
                    let v = line
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| corrupt(format!("bad float literal '{line}'")))?;
                    self.push(Value::Float(v));
                }

                // Text and bytes
                op::SHORT_BINUNICODE => {
                    let len = usize::from(self.read_u8()?);
                    let s = self.read_utf8(len)?;
                    self.push(Value::Str(s));
                }
                op::BINUNICODE => {
                    let len = self.read_len32()?;
                    let s = self.read_utf8(len)?;
                    self.push(Value::Str(s));
                }
                op::BINUNICODE8 => {
                    let len = self.read_len64()?;
                    let s = self.read_utf8(len)?;
                    self.push(Value::Str(s));
                }
                op::UNICODE => {
                    let line = self.read_line()?.to_string();
                    self.push(Value::Str(line));
                }
                op::SHORT_BINSTRING => {
                    let len = usize::from(self.read_u8()?);
                    let s = self.read_utf8(len)?;
                    self.push(Value::Str(s));
                }
                op::BINSTRING => {
                    let len = self.read_len32()?;
                    let s = self.read_utf8(len)?;
                    self.push(Value::Str(s));
                }
                op::STRING => {
                    let line = self.read_line()?;
                    let unquoted = line
                        .strip_prefix('\'')
                        .and_then(|s| s.strip_suffix('\''))
                        .or_else(|| line.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                        .ok_or_else(|| corrupt("unquoted STRING literal"))?;
                    self.push(Value::Str(unquoted.to_string()));
                }
                op::SHORT_BINBYTES => {
                    let len = usize::from(self.read_u8()?);
                    let b = self.take(len)?.to_vec();
                    self.push(Value::Bytes(b));
                }
                op::BINBYTES => {
                    let len = self.read_len32()?;
                    let b = self.take(len)?.to_vec();
                    self.push(Value::Bytes(b));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let len = self.read_len64()?;
                    let b = self.take(len)?.to_vec();
                    self.push(Value::Bytes(b));
                }

                // Containers
                op::EMPTY_LIST => {
                    let v = self.alloc(Object::List(Vec::new()));
                    self.push(v);
                }
                op::EMPTY_DICT => {
                    let v = self.alloc(Object::Dict(Vec::new()));
                    self.push(v);
                }
                op::EMPTY_SET => {
                    let v = self.alloc(Object::Set(Vec::new()));
                    self.push(v);
                }
                op::EMPTY_TUPLE => {
                    let v = self.alloc(Object::Tuple(Vec::new()));
                    self.push(v);
                }
                op::LIST => {
                    let items = self.pop_mark()?;
                    let v = self.alloc(Object::List(items));
                    self.push(v);
                }
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    let v = self.alloc(Object::Tuple(items));
                    self.push(v);
                }
                op::FROZENSET => {
                    let items = self.pop_mark()?;
                    let v = self.alloc(Object::Set(items));
                    self.push(v);
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(opcode - op::TUPLE1 + 1);
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    let v = self.alloc(Object::Tuple(items));
                    self.push(v);
                }
                op::DICT => {
                    let items = self.pop_mark()?;
                    let v = self.alloc(Object::Dict(Vec::new()));
                    self.push(v);
                    self.set_items(items)?;
                }
                op::APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                op::APPENDS | op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.set_items(vec![key, value])?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    self.set_items(items)?;
                }

                // Memo
                op::PUT => {
                    let line = self.read_line()?;
                    let index = line.parse().map_err(|_| corrupt("bad PUT index"))?;
                    self.memo_put(index)?;
                }
                op::BINPUT => {
                    let index = u64::from(self.read_u8()?);
                    self.memo_put(index)?;
                }
                op::LONG_BINPUT => {
                    let index = u64::from(self.read_u32()?);
                    self.memo_put(index)?;
                }
                op::MEMOIZE => {
                    let index = self.memo.len() as u64;
                    self.memo_put(index)?;
                }
                op::GET => {
                    let line = self.read_line()?;
                    let index = line.parse().map_err(|_| corrupt("bad GET index"))?;
                    self.memo_get(index)?;
                }
                op::BINGET => {
                    let index = u64::from(self.read_u8()?);
                    self.memo_get(index)?;
                }
                op::LONG_BINGET => {
                    let index = u64::from(self.read_u32()?);
                    self.memo_get(index)?;
                }

                // Objects
                op::GLOBAL => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    self.push(Value::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (Value::Str(module), Value::Str(name)) = (module, name) else {
                        return Err(corrupt("STACK_GLOBAL operands are not strings"));
                    };
                    self.push(Value::Global { module, name });
                }
                op::REDUCE | op::NEWOBJ => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let args = self.tuple_items(&args);
                    let v = self.instantiate(&callable, args)?;
                    self.push(v);
                }
                op::NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let args = self.tuple_items(&args);
                    let v = self.instantiate(&callable, args)?;
                    self.push(v);
                }
                op::OBJ => {
                    let mut items = self.pop_mark()?;
                    if items.is_empty() {
                        return Err(corrupt("OBJ without a class"));
                    }
                    let callable = items.remove(0);
                    let v = self.instantiate(&callable, items)?;
                    self.push(v);
                }
                op::INST => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    let items = self.pop_mark()?;
                    let v = self.instantiate(&Value::Global { module, name }, items)?;
                    self.push(v);
                }
                op::BUILD => {
                    let state = self.pop()?;
                    let target = self.top()?.clone();
                    if let Object::Instance { state: slot, .. } = self.object_mut(&target)? {
                        *slot = Some(state);
                    }
                }

                other => {
                    return Err(corrupt(format!(
                        "unsupported opcode 0x{other:02x} at byte {}",
                        self.pos - 1
                    )));
                }
            }
        }
    }
}

/// Little-endian two's complement integer of arbitrary width (up to 128 bits).
fn decode_long(raw: &[u8]) -> Result<Value> {
    if raw.is_empty() {
        return Ok(Value::Int(0));
    }
    if raw.len() > 16 {
        return Err(corrupt(format!("{}-byte integer is too wide", raw.len())));
    }
    let negative = raw[raw.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 16] } else { [0u8; 16] };
    buf[..raw.len()].copy_from_slice(raw);
    Ok(int_value(i128::from_le_bytes(buf)))
}

fn parse_int_text(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i128>() {
        return Ok(int_value(v));
    }
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(Value::BigInt(trimmed.to_string()));
    }
    Err(corrupt(format!("bad integer literal '{text}'")))
}

// =============================================================================
// Navigation
// =============================================================================

impl ObjectGraph {
    /// Wrap an arena and its root, indexing every dict by key text.
    #[must_use]
    pub fn new(objects: Vec<Object>, root: Value) -> Self {
        let mut graph = Self {
            objects,
            root,
            keys: HashMap::new(),
        };
        let keys = graph
            .objects
            .iter()
            .enumerate()
            .filter_map(|(id, object)| match object {
                Object::Dict(entries) => {
                    let mut index = HashMap::with_capacity(entries.len());
                    for (position, (key, _)) in entries.iter().enumerate() {
                        if let Some(text) = graph.key_text(key) {
                            index.entry(text).or_insert(position);
                        }
                    }
                    Some((id, index))
                }
                _ => None,
            })
            .collect();
        graph.keys = keys;
        graph
    }

    /// The container a value refers to, if any.
    #[must_use]
    pub fn resolve(&self, value: &Value) -> Option<&Object> {
        match value {
            Value::Ref(id) => self.objects.get(*id),
            _ => None,
        }
    }

    /// Key/value pairs of a dict value.
    #[must_use]
    pub fn entries(&self, value: &Value) -> Option<&[(Value, Value)]> {
        match self.resolve(value)? {
            Object::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Elements of a list, tuple or set value.
    #[must_use]
    pub fn items(&self, value: &Value) -> Option<&[Value]> {
        match self.resolve(value)? {
            Object::List(items) | Object::Tuple(items) | Object::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Look up `key` in a dict value, comparing keys by their text form so
    /// `123` and `"123"` both match.
    #[must_use]
    pub fn get<'g>(&'g self, value: &Value, key: &str) -> Option<&'g Value> {
        let Value::Ref(id) = value else {
            return None;
        };
        let position = *self.keys.get(id)?.get(key)?;
        self.entries(value)?.get(position).map(|(_, v)| v)
    }

    /// Text form of a dict key.
    #[must_use]
    pub fn key_text(&self, value: &Value) -> Option<String> {
        self.text(value).filter(|s| !s.is_empty())
    }

    /// Scalar rendered as trimmed text. Integral floats render without a
    /// fraction, NaN renders empty; containers and `None` have no text.
    #[must_use]
    pub fn text(&self, value: &Value) -> Option<String> {
        match value {
            Value::Str(s) => Some(s.trim().to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::BigInt(s) => Some(s.clone()),
            Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
            Value::Float(f) => Some(float_text(*f)),
            Value::Ref(_) => self.number(value).map(|n| match n {
                Number::Int(v) => v.to_string(),
                Number::Float(f) => float_text(f),
            }),
            Value::None | Value::Bytes(_) | Value::Global { .. } => None,
        }
    }

    /// Numeric scalar, including numpy scalars (`numpy.core.multiarray.scalar`).
    #[must_use]
    pub fn number(&self, value: &Value) -> Option<Number> {
        match value {
            Value::Int(v) => Some(Number::Int(*v)),
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::BigInt(s) => s.parse::<f64>().ok().map(Number::Float),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Number::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(Number::Float))
            }
            Value::Ref(_) => self.numpy_scalar(value),
            _ => None,
        }
    }

    fn instance(&self, value: &Value) -> Option<(&str, &[Value], Option<&Value>)> {
        match self.resolve(value)? {
            Object::Instance { class, args, state } => {
                Some((class.as_str(), args.as_slice(), state.as_ref()))
            }
            _ => None,
        }
    }

    fn numpy_scalar(&self, value: &Value) -> Option<Number> {
        let (class, args, _) = self.instance(value)?;
        if !class.ends_with("multiarray.scalar") {
            return None;
        }
        let [dtype, Value::Bytes(raw), ..] = args else {
            return None;
        };
        let (_, dtype_args, dtype_state) = self.instance(dtype)?;
        let code = match dtype_args.first()? {
            Value::Str(code) => code.as_str(),
            _ => return None,
        };
        // dtype state is (version, byteorder, ...)
        let big_endian = dtype_state
            .and_then(|s| self.items(s))
            .and_then(|items| items.get(1))
            .is_some_and(|order| matches!(order, Value::Str(o) if o == ">"));
        decode_scalar(code, raw, big_endian)
    }

    /// Instant from an ISO/RFC 3339 string, a pickled `pandas.Timestamp`
    /// or a pickled `datetime.datetime`.
    #[must_use]
    pub fn timestamp(&self, value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::Str(s) => crate::rows::parse_timestamp(s),
            Value::Ref(_) => {
                let (class, args, _) = self.instance(value)?;
                if class.starts_with("pandas.") && class.contains("imestamp") {
                    pandas_timestamp(args)
                } else if class == "datetime.datetime" {
                    match args.first()? {
                        Value::Bytes(raw) => python_datetime(raw),
                        _ => None,
                    }
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        String::new()
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

fn decode_scalar(code: &str, raw: &[u8], big_endian: bool) -> Option<Number> {
    let mut bytes = raw.to_vec();
    if big_endian {
        bytes.reverse();
    }
    let arr8 = |b: &[u8]| -> Option<[u8; 8]> { b.get(..8)?.try_into().ok() };
    let arr4 = |b: &[u8]| -> Option<[u8; 4]> { b.get(..4)?.try_into().ok() };
    match code {
        "i8" => Some(Number::Int(i64::from_le_bytes(arr8(&bytes)?))),
        "u8" => i64::try_from(u64::from_le_bytes(arr8(&bytes)?))
            .ok()
            .map(Number::Int),
        "i4" => Some(Number::Int(i64::from(i32::from_le_bytes(arr4(&bytes)?)))),
        "u4" => Some(Number::Int(i64::from(u32::from_le_bytes(arr4(&bytes)?)))),
        "f8" => Some(Number::Float(f64::from_le_bytes(arr8(&bytes)?))),
        "f4" => Some(Number::Float(f64::from(f32::from_le_bytes(arr4(&bytes)?)))),
        "b1" => bytes.first().map(|b| Number::Int(i64::from(*b != 0))),
        _ => None,
    }
}

fn pandas_timestamp(args: &[Value]) -> Option<DateTime<Utc>> {
    let value = match args.first()? {
        Value::Int(v) => *v,
        Value::BigInt(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    // pandas resolution codes: 7 = s, 8 = ms, 9 = us, 10 = ns (default).
    let reso = match args.get(3) {
        Some(Value::Int(r)) => *r,
        _ => 10,
    };
    match reso {
        7 => Utc.timestamp_opt(value, 0).single(),
        8 => Utc.timestamp_millis_opt(value).single(),
        9 => DateTime::from_timestamp_micros(value),
        _ => Some(DateTime::from_timestamp_nanos(value)),
    }
}

fn python_datetime(raw: &[u8]) -> Option<DateTime<Utc>> {
    if raw.len() != 10 {
        return None;
    }
    let year = i32::from(raw[0]) * 256 + i32::from(raw[1]);
    let micros = (u32::from(raw[7]) << 16) | (u32::from(raw[8]) << 8) | u32::from(raw[9]);
    NaiveDate::from_ymd_opt(year, u32::from(raw[2]), u32::from(raw[3]))?
        .and_hms_micro_opt(
            u32::from(raw[4]),
            u32::from(raw[5]),
            u32::from(raw[6]),
            micros,
        )
        .map(|naive| naive.and_utc())
}
