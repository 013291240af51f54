use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use super::{Fault, Vm};
use crate::serial::{self, ByteReader};

/// Stable reference to a heap-owned value.
pub type Handle = usize;

/// String-keyed, insertion-ordered value map: the map side-table of lists,
/// plain map values, and captured closure environments.
pub type ValueMap = IndexMap<Vec<u8>, Handle>;

pub type SharedList = Rc<RefCell<Vec<Handle>>>;
pub type SharedMap = Rc<RefCell<ValueMap>>;

/// A host-provided procedure. The callback pops its argument tuple from the
/// operand stack and returns an optional result handle; it may raise by
/// storing a value in the VM's exception slot.
pub type HostFn = fn(&mut Vm) -> Result<Option<Handle>, Fault>;

/// A runtime value. Containers are reference-shared: rebinding a list or
/// map copies the value but not the container, so mutations are observable
/// through every alias, while strings copy deeply.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Int(i32),
    Bool(bool),
    Float(f32),
    Str(Vec<u8>),
    List {
        items: SharedList,
        map: Option<SharedMap>,
    },
    Func {
        body: Rc<Vec<u8>>,
        env: Option<ValueMap>,
    },
    Map(SharedMap),
    Err(Vec<u8>),
    Host(HostFn),
    /// A source-tuple: carries argument lists and multi-value results
    /// across call boundaries and is flattened there, never observable
    /// from Lilt code.
    Tuple(Vec<Handle>),
}

impl Value {
    pub fn list(items: Vec<Handle>) -> Value {
        Value::List {
            items: Rc::new(RefCell::new(items)),
            map: None,
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Int(_) => TypeTag::Int,
            Value::Bool(_) => TypeTag::Bool,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::Str,
            Value::List { .. } => TypeTag::List,
            Value::Func { .. } => TypeTag::Func,
            Value::Map(_) => TypeTag::Map,
            Value::Err(_) => TypeTag::Err,
            Value::Host(_) => TypeTag::Host,
            Value::Tuple(_) => TypeTag::Tuple,
        }
    }
}

/// Value kind. The discriminants are the serialization type tags and are
/// therefore stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Nil = 0,
    Int = 1,
    Bool = 2,
    Float = 3,
    Str = 4,
    List = 5,
    Func = 6,
    Map = 7,
    Err = 8,
    Host = 9,
    Tuple = 10,
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Int => "integer",
            TypeTag::Bool => "boolean",
            TypeTag::Float => "float",
            TypeTag::Str => "string",
            TypeTag::List => "list",
            TypeTag::Func => "function",
            TypeTag::Map => "map",
            TypeTag::Err => "error",
            TypeTag::Host => "c-function",
            TypeTag::Tuple => "tuple",
        }
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) value: Value,
    pub(crate) marked: bool,
}

/// The arena all values live in. Slots are reused through a free list;
/// collection is mark-and-sweep, driven by the VM which owns the roots.
#[derive(Debug)]
pub struct Heap {
    pub(crate) slots: Vec<Option<Slot>>,
    free: Vec<Handle>,
    live: usize,
    threshold: usize,
}

/// Soft cap on live values before the dispatch loop triggers a collection.
const HEAP_SOFT_CAP: usize = 512;

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            threshold: HEAP_SOFT_CAP,
        }
    }

    pub fn alloc(&mut self, value: Value) -> Handle {
        self.live += 1;
        let slot = Slot {
            value,
            marked: false,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    /// Read a value. A dangling handle is a VM invariant breach, not a
    /// recoverable runtime error.
    pub fn get(&self, handle: Handle) -> &Value {
        match self.slots.get(handle).and_then(Option::as_ref) {
            Some(slot) => &slot.value,
            None => unreachable!("dangling value handle {handle}"),
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut Value {
        match self.slots.get_mut(handle).and_then(Option::as_mut) {
            Some(slot) => &mut slot.value,
            None => unreachable!("dangling value handle {handle}"),
        }
    }

    /// Overwrite a slot in place. Every binding and container holding this
    /// handle observes the new value.
    pub fn set(&mut self, handle: Handle, value: Value) {
        *self.get_mut(handle) = value;
    }

    /// Copy semantics for rebinding: deep for strings, shallow for
    /// containers (the `Rc` is cloned, the container is shared).
    pub fn copy_value(&self, handle: Handle) -> Value {
        self.get(handle).clone()
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn should_collect(&self) -> bool {
        self.live > self.threshold
    }

    pub(crate) fn free_slot(&mut self, handle: Handle) {
        self.slots[handle] = None;
        self.free.push(handle);
        self.live -= 1;
    }

    pub(crate) fn grow_threshold(&mut self) {
        if self.live > self.threshold / 2 {
            self.threshold *= 2;
        }
    }

    /// Structural, recursive equality. Mismatched kinds compare unequal;
    /// floats compare bit-for-bit.
    pub fn values_equal(&self, a: Handle, b: Handle) -> Result<bool, Fault> {
        let equal = match (self.get(a), self.get(b)) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(m), Value::Int(n)) => m == n,
            (Value::Bool(p), Value::Bool(q)) => p == q,
            (Value::Float(x), Value::Float(y)) => (x - y) == 0.0,
            (Value::Str(s), Value::Str(t)) => s == t,
            (Value::Err(s), Value::Err(t)) => s == t,
            (Value::Host(f), Value::Host(g)) => *f == *g,
            (Value::Func { body: f, .. }, Value::Func { body: g, .. }) => f == g,
            (Value::Tuple(s), Value::Tuple(t)) => {
                if s.len() != t.len() {
                    return Ok(false);
                }
                let (s, t) = (s.clone(), t.clone());
                for (x, y) in s.iter().zip(t.iter()) {
                    if !self.values_equal(*x, *y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (
                Value::List {
                    items: a_items,
                    map: a_map,
                },
                Value::List {
                    items: b_items,
                    map: b_map,
                },
            ) => {
                let (a_items, b_items) = (a_items.clone(), b_items.clone());
                let (a_map, b_map) = (a_map.clone(), b_map.clone());
                if a_items.borrow().len() != b_items.borrow().len() {
                    return Ok(false);
                }
                let pairs: Vec<(Handle, Handle)> = a_items
                    .borrow()
                    .iter()
                    .copied()
                    .zip(b_items.borrow().iter().copied())
                    .collect();
                for (x, y) in pairs {
                    if !self.values_equal(x, y)? {
                        return Ok(false);
                    }
                }
                self.maps_equal(a_map.as_ref(), b_map.as_ref())?
            }
            (Value::Map(m), Value::Map(n)) => {
                let (m, n) = (m.clone(), n.clone());
                self.maps_equal(Some(&m), Some(&n))?
            }
            _ => false,
        };
        Ok(equal)
    }

    fn maps_equal(&self, a: Option<&SharedMap>, b: Option<&SharedMap>) -> Result<bool, Fault> {
        let a_pairs: Vec<(Vec<u8>, Handle)> = a
            .map(|m| m.borrow().iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        let b_pairs: Vec<(Vec<u8>, Handle)> = b
            .map(|m| m.borrow().iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        if a_pairs.len() != b_pairs.len() {
            return Ok(false);
        }
        let b_map: IndexMap<Vec<u8>, Handle> = b_pairs.into_iter().collect();
        for (key, value) in a_pairs {
            let Some(&other) = b_map.get(&key) else {
                return Ok(false);
            };
            if !self.values_equal(value, other)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Human-readable form of a value, as raw bytes. Top-level strings and
    /// errors print unquoted; inside containers, strings are quoted.
    pub fn value_text(&self, handle: Handle) -> Vec<u8> {
        match self.get(handle) {
            Value::Str(bytes) => bytes.clone(),
            Value::Err(message) => message.clone(),
            _ => {
                let mut out = Vec::new();
                self.write_value(handle, &mut out);
                out
            }
        }
    }

    fn write_value(&self, handle: Handle, out: &mut Vec<u8>) {
        match self.get(handle) {
            Value::Nil => out.extend_from_slice(b"nil"),
            Value::Int(n) => out.extend_from_slice(format!("{n}").as_bytes()),
            Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
            Value::Float(f) => out.extend_from_slice(format!("{f}").as_bytes()),
            Value::Str(bytes) => out.extend_from_slice(bytes),
            Value::Err(message) => out.extend_from_slice(message),
            Value::Func { body, .. } => {
                out.extend_from_slice(format!("f({}B)", body.len()).as_bytes())
            }
            Value::Host(_) => out.extend_from_slice(b"c-function"),
            Value::List { items, map } => {
                let items = items.clone();
                let map = map.clone();
                out.push(b'[');
                let items = items.borrow();
                for (i, &item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    self.write_element(item, out);
                }
                if let Some(map) = map {
                    if !items.is_empty() && !map.borrow().is_empty() {
                        out.push(b',');
                    }
                    self.write_map_entries(&map, out);
                }
                out.push(b']');
            }
            Value::Map(map) => {
                let map = map.clone();
                out.push(b'[');
                self.write_map_entries(&map, out);
                out.push(b']');
            }
            Value::Tuple(items) => {
                let items = items.clone();
                out.push(b'[');
                for (i, &item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    self.write_element(item, out);
                }
                out.push(b']');
            }
        }
    }

    fn write_element(&self, handle: Handle, out: &mut Vec<u8>) {
        let quoted = matches!(
            self.get(handle),
            Value::Str(_) | Value::Func { .. } | Value::Err(_)
        );
        if quoted {
            out.push(b'\'');
        }
        self.write_value(handle, out);
        if quoted {
            out.push(b'\'');
        }
    }

    fn write_map_entries(&self, map: &SharedMap, out: &mut Vec<u8>) {
        let pairs: Vec<(Vec<u8>, Handle)> = map
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for (i, (key, value)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.push(b'\'');
            out.extend_from_slice(key);
            out.extend_from_slice(b"':");
            self.write_element(*value, out);
        }
    }

    /// Serialize a value as `<type tag varint> <payload>`. Host callbacks
    /// and source-tuples have no wire form.
    pub fn serialize(&self, handle: Handle, out: &mut Vec<u8>) -> Result<(), Fault> {
        let value = self.get(handle).clone();
        serial::encode_int(out, value.type_tag() as i32);
        match value {
            Value::Nil => {}
            Value::Int(n) => serial::encode_int(out, n),
            Value::Bool(b) => serial::encode_int(out, b as i32),
            Value::Float(f) => serial::encode_float(out, f),
            Value::Str(bytes) | Value::Err(bytes) => serial::encode_string(out, &bytes),
            Value::Func { body, .. } => serial::encode_string(out, &body),
            Value::List { items, map } => {
                let items = items.borrow().clone();
                serial::encode_int(out, items.len() as i32);
                for item in items {
                    self.serialize(item, out)?;
                }
                self.serialize_map_entries(map.as_ref(), out)?;
            }
            Value::Map(map) => {
                self.serialize_map_entries(Some(&map), out)?;
            }
            Value::Host(_) | Value::Tuple(_) => {
                return Err(Fault::type_error(format!(
                    "cannot serialize {}",
                    value.type_tag().name()
                )))
            }
        }
        Ok(())
    }

    fn serialize_map_entries(
        &self,
        map: Option<&SharedMap>,
        out: &mut Vec<u8>,
    ) -> Result<(), Fault> {
        let pairs: Vec<(Vec<u8>, Handle)> = map
            .map(|m| m.borrow().iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        serial::encode_int(out, pairs.len() as i32);
        for (key, value) in pairs {
            serial::encode_string(out, &key);
            self.serialize(value, out)?;
        }
        Ok(())
    }

    /// Rebuild a value from its serialized form.
    pub fn deserialize(&mut self, reader: &mut ByteReader) -> Result<Handle, Fault> {
        let tag = serial::decode_int(reader)?;
        let value = match tag {
            tag if tag == TypeTag::Nil as i32 => Value::Nil,
            tag if tag == TypeTag::Int as i32 => Value::Int(serial::decode_int(reader)?),
            tag if tag == TypeTag::Bool as i32 => Value::Bool(serial::decode_int(reader)? != 0),
            tag if tag == TypeTag::Float as i32 => Value::Float(serial::decode_float(reader)?),
            tag if tag == TypeTag::Str as i32 => Value::Str(serial::decode_string(reader)?),
            tag if tag == TypeTag::Err as i32 => Value::Err(serial::decode_string(reader)?),
            tag if tag == TypeTag::Func as i32 => Value::Func {
                body: Rc::new(serial::decode_string(reader)?),
                env: None,
            },
            tag if tag == TypeTag::List as i32 => {
                let count = serial::decode_int(reader)?;
                if count < 0 {
                    return Err(Fault::type_error("negative list length"));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.deserialize(reader)?);
                }
                let map = self.deserialize_map_entries(reader)?;
                Value::List {
                    items: Rc::new(RefCell::new(items)),
                    map,
                }
            }
            tag if tag == TypeTag::Map as i32 => {
                let map = self.deserialize_map_entries(reader)?;
                Value::Map(map.unwrap_or_default())
            }
            tag => return Err(Fault::type_error(format!("bad serialized type tag {tag}"))),
        };
        Ok(self.alloc(value))
    }

    fn deserialize_map_entries(
        &mut self,
        reader: &mut ByteReader,
    ) -> Result<Option<SharedMap>, Fault> {
        let count = serial::decode_int(reader)?;
        if count < 0 {
            return Err(Fault::type_error("negative map length"));
        }
        if count == 0 {
            return Ok(None);
        }
        let mut map = ValueMap::new();
        for _ in 0..count {
            let key = serial::decode_string(reader)?;
            let value = self.deserialize(reader)?;
            map.insert(key, value);
        }
        Ok(Some(Rc::new(RefCell::new(map))))
    }
}
