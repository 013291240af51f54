//! The bytecode interpreter: operand stack, call frames, rhs staging
//! stack, and the mark-and-sweep heap.

mod frame;
mod gc;
mod methods;
mod value;

pub use frame::*;
pub use value::*;

use std::{
    cell::RefCell,
    error::Error,
    fmt::Display,
    io::{self, Write},
    rc::Rc,
};

use log::trace;

use crate::{
    bytecode::Opcode,
    serial::{self, ByteReader, DecodeError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Type,
    Bounds,
    Name,
    Opcode,
    Underflow,
    Host,
}

impl Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FaultKind::Type => "type error",
            FaultKind::Bounds => "bounds error",
            FaultKind::Name => "name error",
            FaultKind::Opcode => "bad bytecode",
            FaultKind::Underflow => "stack underflow",
            FaultKind::Host => "host error",
        })
    }
}

/// A fatal runtime error. Faults unwind the dispatch loop through `?` and
/// are converted into an error value at the `execute` boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Type,
            message: message.into(),
        }
    }

    pub fn bounds(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Bounds,
            message: message.into(),
        }
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Name,
            message: message.into(),
        }
    }

    pub fn opcode(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Opcode,
            message: message.into(),
        }
    }

    pub fn underflow() -> Self {
        Self {
            kind: FaultKind::Underflow,
            message: "operand stack is empty".into(),
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Host,
            message: message.into(),
        }
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for Fault {}

impl From<DecodeError> for Fault {
    fn from(error: DecodeError) -> Self {
        Fault::opcode(error.to_string())
    }
}

/// Hook consulted when a name resolves nowhere in the frame chain. The
/// canonical hook recognizes the reserved `sys` module.
pub type HostLookup = fn(&mut Vm, &[u8]) -> Result<Option<Handle>, Fault>;

/// All execution state: no globals, one context per interpreter.
pub struct Vm {
    heap: Heap,
    operands: Vec<Handle>,
    /// Staging stack for call arguments; function prologues consume it.
    rhs: Vec<Handle>,
    frames: Vec<Frame>,
    /// Temporary roots held by host callbacks across re-entrant calls.
    protected: Vec<Handle>,
    find: HostLookup,
    exception: Option<Handle>,
    sys_module: Option<Handle>,
    result: Option<Handle>,
    output: Box<dyn Write>,
    script_args: Vec<Vec<u8>>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Build a VM whose `sys.print` output goes to the given sink.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self {
            heap: Heap::new(),
            operands: Vec::new(),
            rhs: Vec::new(),
            frames: vec![Frame::new()],
            protected: Vec::new(),
            find: crate::sys::find,
            exception: None,
            sys_module: None,
            result: None,
            output,
            script_args: Vec::new(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn alloc(&mut self, value: Value) -> Handle {
        self.heap.alloc(value)
    }

    pub fn set_host_lookup(&mut self, find: HostLookup) {
        self.find = find;
    }

    pub fn set_script_args(&mut self, args: Vec<Vec<u8>>) {
        self.script_args = args;
    }

    pub fn script_args(&self) -> &[Vec<u8>] {
        &self.script_args
    }

    /// Raise an error from a host callback: the VM turns it into a fault
    /// after the callback returns.
    pub fn set_exception(&mut self, value: Handle) {
        self.exception = Some(value);
    }

    pub(crate) fn sys_module(&self) -> Option<Handle> {
        self.sys_module
    }

    pub(crate) fn set_sys_module(&mut self, module: Handle) {
        self.sys_module = Some(module);
    }

    pub fn write_output(&mut self, bytes: &[u8]) {
        let _ = self.output.write_all(bytes);
    }

    pub fn live_values(&self) -> usize {
        self.heap.live()
    }

    /// Pin a handle against collection while a host callback re-enters the
    /// VM. Balance with `unprotect`.
    pub fn protect(&mut self, handle: Handle) {
        self.protected.push(handle);
    }

    pub fn unprotect(&mut self, count: usize) {
        let keep = self.protected.len().saturating_sub(count);
        self.protected.truncate(keep);
    }

    fn current_frame(&self) -> &Frame {
        match self.frames.last() {
            Some(frame) => frame,
            None => unreachable!("frame stack is never empty"),
        }
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => unreachable!("frame stack is never empty"),
        }
    }

    pub fn push(&mut self, handle: Handle) {
        self.operands.push(handle);
    }

    /// Pop without source-tuple flattening; calls use this to take their
    /// argument tuple whole.
    pub fn pop_raw(&mut self) -> Result<Handle, Fault> {
        self.operands.pop().ok_or_else(Fault::underflow)
    }

    /// Pop one value. A source-tuple flattens to its first element (or nil
    /// when empty): a multi-value result used as a single value.
    pub fn pop(&mut self) -> Result<Handle, Fault> {
        let handle = self.pop_raw()?;
        let unwrapped = match self.heap.get(handle) {
            Value::Tuple(items) => Some(items.first().copied()),
            _ => None,
        };
        Ok(match unwrapped {
            None => handle,
            Some(Some(first)) => first,
            Some(None) => self.alloc(Value::Nil),
        })
    }

    /// Pop the argument tuple of a host call and return its items; the
    /// first element is the receiver or callee.
    pub fn pop_args(&mut self) -> Result<Vec<Handle>, Fault> {
        let tuple = self.pop_raw()?;
        match self.heap.get(tuple) {
            Value::Tuple(items) => Ok(items.clone()),
            _ => Err(Fault::type_error("host call without an argument tuple")),
        }
    }

    /// Run a complete program (`<varint length> <code>`). Faults become an
    /// error value; the operand stack is restored either way.
    pub fn execute(&mut self, program: &[u8]) -> Handle {
        let mut reader = ByteReader::new(program);
        let code = match serial::decode_string(&mut reader) {
            Ok(code) => code,
            Err(error) => {
                let fault = Fault::from(error);
                return self.alloc(Value::Err(fault.to_string().into_bytes()));
            }
        };

        // nested executions (sys.run, sys.interpret) restore the caller's
        // stacks on a fault instead of unwinding to the root
        let depth = self.operands.len();
        let frame_depth = self.frames.len();
        let rhs_depth = self.rhs.len();
        let protected_depth = self.protected.len();

        let result = match self.run(&code) {
            Ok(()) => match self.operands.last().copied() {
                Some(top) if self.operands.len() > depth => top,
                _ => self.alloc(Value::Nil),
            },
            Err(fault) => {
                self.frames.truncate(frame_depth);
                self.rhs.truncate(rhs_depth);
                self.protected.truncate(protected_depth);
                self.exception = None;
                self.alloc(Value::Err(fault.to_string().into_bytes()))
            }
        };
        self.operands.truncate(depth);
        self.result = Some(result);
        result
    }

    /// The dispatch loop, executing in the current frame.
    fn run(&mut self, code: &[u8]) -> Result<(), Fault> {
        let mut reader = ByteReader::new(code);

        while !reader.at_end() {
            if self.heap.should_collect() {
                self.collect();
            }

            let at = reader.position();
            let byte = reader.take_byte()?;
            let op = Opcode::try_from(byte)
                .map_err(|unknown| Fault::opcode(format!("unknown opcode {unknown}")))?;
            trace!("{at:4}: {op}");

            match op {
                Opcode::Nil => {
                    let handle = self.alloc(Value::Nil);
                    self.push(handle);
                }
                Opcode::Int => {
                    let n = serial::decode_int(&mut reader)?;
                    let handle = self.alloc(Value::Int(n));
                    self.push(handle);
                }
                Opcode::Bool => {
                    let n = serial::decode_int(&mut reader)?;
                    let handle = self.alloc(Value::Bool(n != 0));
                    self.push(handle);
                }
                Opcode::Flt => {
                    let f = serial::decode_float(&mut reader)?;
                    let handle = self.alloc(Value::Float(f));
                    self.push(handle);
                }
                Opcode::Str => {
                    let bytes = serial::decode_string(&mut reader)?;
                    let handle = self.alloc(Value::Str(bytes));
                    self.push(handle);
                }
                Opcode::Var => {
                    let name = serial::decode_string(&mut reader)?;
                    let handle = self.find_var(&name)?.ok_or_else(|| {
                        Fault::name(format!(
                            "variable '{}' not found",
                            String::from_utf8_lossy(&name)
                        ))
                    })?;
                    self.push(handle);
                }
                Opcode::Fnc => {
                    let body = serial::decode_string(&mut reader)?;
                    let env = self.capture_environment();
                    let handle = self.alloc(Value::Func {
                        body: Rc::new(body),
                        env,
                    });
                    self.push(handle);
                }
                Opcode::Src => {
                    let count = serial::decode_int(&mut reader)?;
                    self.build_tuple(count)?;
                }
                Opcode::Lst => {
                    let count = serial::decode_int(&mut reader)?;
                    self.build_list(count)?;
                }
                Opcode::Map => {
                    let count = serial::decode_int(&mut reader)?;
                    self.build_map(count)?;
                }
                Opcode::Set => {
                    let name = serial::decode_string(&mut reader)?;
                    let value = match self.rhs.pop() {
                        Some(handle) => handle,
                        None => self.pop()?,
                    };
                    self.set_named(&name, value);
                }
                Opcode::Get => {
                    let indexable = self.pop()?;
                    let index = self.pop()?;
                    let element = self.lookup(indexable, index)?;
                    self.push(element);
                }
                Opcode::Put => self.put_op()?,
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::And
                | Opcode::Or
                | Opcode::Eq
                | Opcode::Neq
                | Opcode::Gt
                | Opcode::Lt => self.binary_op(op)?,
                Opcode::Not | Opcode::Neg => self.unary_op(op)?,
                Opcode::If => {
                    let offset = serial::decode_int(&mut reader)?;
                    let condition = self.pop()?;
                    if !self.truthy(condition)? {
                        reader.branch(offset)?;
                    }
                }
                Opcode::Jmp => {
                    let offset = serial::decode_int(&mut reader)?;
                    reader.branch(offset)?;
                }
                Opcode::Cal => {
                    let callee = self.pop()?;
                    let args = self.pop_args()?;
                    self.call_value(callee, args, None)?;
                }
                Opcode::Met => {
                    let object = self.pop()?;
                    let index = self.pop()?;
                    let member = self.lookup(object, index)?;
                    let args = self.pop_args()?;
                    self.call_value(member, args, Some(object))?;
                }
            }
        }

        Ok(())
    }

    /// Invoke a callable. Language functions run their body in a fresh
    /// frame with the arguments staged on the rhs stack for the prologue;
    /// a call always leaves exactly one result on the operand stack. Host
    /// callbacks receive the argument tuple with self/callee prepended.
    pub fn call_value(
        &mut self,
        callee: Handle,
        args: Vec<Handle>,
        receiver: Option<Handle>,
    ) -> Result<(), Fault> {
        let value = self.heap.get(callee).clone();
        match value {
            Value::Func { body, .. } => {
                self.frames.push(Frame::with_function(callee));
                for &arg in &args {
                    self.rhs.push(arg);
                }

                let depth = self.operands.len();
                let outcome = self.run(&body);
                self.frames.pop();
                self.rhs.clear();
                outcome?;

                if self.operands.len() > depth {
                    let result = self.pop_raw()?;
                    self.operands.truncate(depth);
                    self.push(result);
                } else {
                    let nil = self.alloc(Value::Nil);
                    self.push(nil);
                }
                Ok(())
            }
            Value::Host(callback) => {
                let self_handle = receiver.unwrap_or(callee);
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(self_handle);
                items.extend(args);
                let tuple = self.alloc(Value::Tuple(items));
                self.push(tuple);

                let result = callback(self)?;

                if let Some(exception) = self.exception.take() {
                    let message = self.heap.value_text(exception);
                    return Err(Fault::host(String::from_utf8_lossy(&message).into_owned()));
                }

                let result = match result {
                    Some(handle) => handle,
                    None => self.alloc(Value::Nil),
                };
                self.push(result);
                Ok(())
            }
            other => Err(Fault::type_error(format!(
                "calling a non-function of type {}",
                other.type_tag().name()
            ))),
        }
    }

    /// Resolve a name: current frame, then the executing function's
    /// captured environment, then the root frame, then the host hook.
    fn find_var(&mut self, name: &[u8]) -> Result<Option<Handle>, Fault> {
        if let Some(&handle) = self.current_frame().named.get(name) {
            return Ok(Some(handle));
        }
        if let Some(function) = self.current_frame().function {
            if let Value::Func { env: Some(env), .. } = self.heap.get(function) {
                if let Some(&handle) = env.get(name) {
                    return Ok(Some(handle));
                }
            }
        }
        if let Some(&handle) = self.frames[0].named.get(name) {
            return Ok(Some(handle));
        }
        let find = self.find;
        find(self, name)
    }

    /// Bind a name in the current frame. Rebinding overwrites the bound
    /// cell in place, so aliases (captured environments, containers)
    /// observe the new value.
    fn set_named(&mut self, name: &[u8], value: Handle) {
        let copy = self.heap.copy_value(value);
        let existing = self.current_frame().named.get(name).copied();
        match existing {
            Some(cell) => self.heap.set(cell, copy),
            None => {
                let cell = self.heap.alloc(copy);
                self.current_frame_mut().named.insert(name.to_vec(), cell);
            }
        }
    }

    /// A function declared in a nested frame captures that frame's
    /// bindings; top-level functions rely on the root-frame fallback.
    fn capture_environment(&self) -> Option<ValueMap> {
        if self.frames.len() <= 1 {
            return None;
        }
        let named = &self.current_frame().named;
        if named.is_empty() {
            return None;
        }
        Some(named.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn build_tuple(&mut self, count: i32) -> Result<(), Fault> {
        let mut popped = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            popped.push(self.pop_raw()?);
        }
        popped.reverse();

        // nested tuples flatten at the call boundary
        let mut items = Vec::with_capacity(popped.len());
        for handle in popped {
            let inner: Option<Vec<Handle>> = match self.heap.get(handle) {
                Value::Tuple(inner) => Some(inner.clone()),
                _ => None,
            };
            match inner {
                Some(inner) => items.extend(inner),
                None => items.push(handle),
            }
        }

        let tuple = self.alloc(Value::Tuple(items));
        self.push(tuple);
        Ok(())
    }

    fn build_list(&mut self, count: i32) -> Result<(), Fault> {
        let mut popped = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            popped.push(self.pop()?);
        }
        popped.reverse();

        let mut items = Vec::new();
        let mut map = ValueMap::new();
        for handle in popped {
            // map entries coalesce into the side-table, in literal order
            let entries: Option<Vec<(Vec<u8>, Handle)>> = match self.heap.get(handle) {
                Value::Map(entries) => Some(
                    entries
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), *v))
                        .collect(),
                ),
                _ => None,
            };
            match entries {
                Some(entries) => map.extend(entries),
                None => items.push(handle),
            }
        }

        let value = Value::List {
            items: Rc::new(RefCell::new(items)),
            map: if map.is_empty() {
                None
            } else {
                Some(Rc::new(RefCell::new(map)))
            },
        };
        let handle = self.alloc(value);
        self.push(handle);
        Ok(())
    }

    fn build_map(&mut self, count: i32) -> Result<(), Fault> {
        let mut pairs = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let value = self.pop()?;
            let key = self.pop()?;
            pairs.push((key, value));
        }
        pairs.reverse();

        let mut map = ValueMap::new();
        for (key, value) in pairs {
            let Value::Str(name) = self.heap.get(key) else {
                return Err(Fault::type_error("non-string map index"));
            };
            map.insert(name.clone(), value);
        }

        let handle = self.alloc(Value::Map(Rc::new(RefCell::new(map))));
        self.push(handle);
        Ok(())
    }

    fn truthy(&self, handle: Handle) -> Result<bool, Fault> {
        match self.heap.get(handle) {
            Value::Nil => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Int(n) => Ok(*n != 0),
            other => Err(Fault::type_error(format!(
                "bad condition operand of type {}",
                other.type_tag().name()
            ))),
        }
    }

    /// `GET`: integer indices address positional elements (and string
    /// bytes); string indices consult the map side-table, then the
    /// built-in method table.
    pub(crate) fn lookup(&mut self, indexable: Handle, index: Handle) -> Result<Handle, Fault> {
        match self.heap.get(index).clone() {
            Value::Int(n) => self.get_int_index(indexable, n),
            Value::Str(name) => {
                let from_map: Option<Handle> = match self.heap.get(indexable) {
                    Value::List { map: Some(map), .. } => map.borrow().get(&name).copied(),
                    Value::Map(map) => map.borrow().get(&name).copied(),
                    _ => None,
                };
                if let Some(handle) = from_map {
                    return Ok(handle);
                }
                if let Some(handle) = methods::builtin_method(self, indexable, &name)? {
                    return Ok(handle);
                }
                Err(Fault::type_error(format!(
                    "did not find member '{}'",
                    String::from_utf8_lossy(&name)
                )))
            }
            other => Err(Fault::type_error(format!(
                "bad index type {}",
                other.type_tag().name()
            ))),
        }
    }

    fn get_int_index(&mut self, indexable: Handle, index: i32) -> Result<Handle, Fault> {
        match self.heap.get(indexable).clone() {
            Value::List { items, .. } => {
                let items = items.borrow();
                if index < 0 || index as usize >= items.len() {
                    return Err(Fault::bounds("index out of bounds"));
                }
                Ok(items[index as usize])
            }
            Value::Str(bytes) => {
                if index < 0 || index as usize >= bytes.len() {
                    return Err(Fault::bounds("index out of bounds"));
                }
                Ok(self.alloc(Value::Str(vec![bytes[index as usize]])))
            }
            other => Err(Fault::type_error(format!(
                "indexing non-indexable {}",
                other.type_tag().name()
            ))),
        }
    }

    /// `PUT`: integer indices write positional slots (appending at the
    /// length is allowed) or single string bytes; string indices insert
    /// into the map side-table, creating it if absent.
    fn put_op(&mut self) -> Result<(), Fault> {
        let recipient = self.pop()?;
        let key = self.pop()?;
        let value = self.pop()?;

        match self.heap.get(key).clone() {
            Value::Int(index) => match self.heap.get(recipient).clone() {
                Value::List { items, .. } => {
                    let mut items = items.borrow_mut();
                    if index < 0 || index as usize > items.len() {
                        return Err(Fault::bounds("index out of bounds"));
                    }
                    if index as usize == items.len() {
                        items.push(value);
                    } else {
                        items[index as usize] = value;
                    }
                    Ok(())
                }
                Value::Str(_) => {
                    let byte = match self.heap.get(value) {
                        Value::Int(n) => (*n & 0xFF) as u8,
                        _ => return Err(Fault::type_error("non-integer byte for string store")),
                    };
                    let Value::Str(bytes) = self.heap.get_mut(recipient) else {
                        unreachable!("recipient kind changed mid-instruction");
                    };
                    if index < 0 || index as usize >= bytes.len() {
                        return Err(Fault::bounds("index out of bounds"));
                    }
                    bytes[index as usize] = byte;
                    Ok(())
                }
                other => Err(Fault::type_error(format!(
                    "indexing non-indexable {}",
                    other.type_tag().name()
                ))),
            },
            Value::Str(name) => {
                let map: SharedMap = match self.heap.get_mut(recipient) {
                    Value::List { map, .. } => {
                        if map.is_none() {
                            *map = Some(SharedMap::default());
                        }
                        match map {
                            Some(map) => map.clone(),
                            None => unreachable!("side table was just created"),
                        }
                    }
                    Value::Map(map) => map.clone(),
                    other => {
                        return Err(Fault::type_error(format!(
                            "indexing non-indexable {}",
                            other.type_tag().name()
                        )))
                    }
                };
                map.borrow_mut().insert(name, value);
                Ok(())
            }
            other => Err(Fault::type_error(format!(
                "bad index type {}",
                other.type_tag().name()
            ))),
        }
    }

    fn binary_op(&mut self, op: Opcode) -> Result<(), Fault> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self.binary_value(op, lhs, rhs)?;
        let handle = self.alloc(result);
        self.push(handle);
        Ok(())
    }

    fn binary_value(&mut self, op: Opcode, lhs: Handle, rhs: Handle) -> Result<Value, Fault> {
        if op == Opcode::Eq {
            return Ok(Value::Bool(self.heap.values_equal(lhs, rhs)?));
        }
        if op == Opcode::Neq {
            return Ok(Value::Bool(!self.heap.values_equal(lhs, rhs)?));
        }

        let a = self.heap.get(lhs).clone();
        let b = self.heap.get(rhs).clone();

        // a string operand turns + into concatenation of display forms
        if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
            if op == Opcode::Add {
                let mut text = self.heap.value_text(lhs);
                text.extend_from_slice(&self.heap.value_text(rhs));
                return Ok(Value::Str(text));
            }
            return Err(Fault::type_error("unknown string operation"));
        }

        match (a, b) {
            (Value::Int(m), Value::Int(n)) => binary_int(op, m, n),
            (Value::Int(m), Value::Float(y)) => binary_float(op, m as f32, y),
            (Value::Float(x), Value::Int(n)) => binary_float(op, x, n as f32),
            (Value::Float(x), Value::Float(y)) => binary_float(op, x, y),
            (
                Value::List {
                    items: a_items,
                    map: a_map,
                },
                Value::List {
                    items: b_items,
                    map: b_map,
                },
            ) if op == Opcode::Add => {
                let mut items = a_items.borrow().clone();
                items.extend(b_items.borrow().iter().copied());
                // on a key collision the left operand's entry survives
                let mut map = a_map
                    .map(|m| m.borrow().clone())
                    .unwrap_or_default();
                if let Some(b_map) = b_map {
                    for (key, value) in b_map.borrow().iter() {
                        map.entry(key.clone()).or_insert(*value);
                    }
                }
                Ok(Value::List {
                    items: Rc::new(RefCell::new(items)),
                    map: if map.is_empty() {
                        None
                    } else {
                        Some(Rc::new(RefCell::new(map)))
                    },
                })
            }
            (a, b) => Err(Fault::type_error(format!(
                "unknown binary operation on {} and {}",
                a.type_tag().name(),
                b.type_tag().name()
            ))),
        }
    }

    fn unary_op(&mut self, op: Opcode) -> Result<(), Fault> {
        let operand = self.pop()?;
        let result = match (self.heap.get(operand), op) {
            (Value::Nil, Opcode::Neg) => Value::Nil,
            (Value::Nil, Opcode::Not) => Value::Bool(true),
            (Value::Int(n), Opcode::Neg) => Value::Int(n.wrapping_neg()),
            (Value::Int(n), Opcode::Not) => Value::Bool(*n == 0),
            (Value::Bool(b), Opcode::Not) => Value::Bool(!b),
            (Value::Float(f), Opcode::Neg) => Value::Float(-f),
            (other, _) => {
                return Err(Fault::type_error(format!(
                    "bad operand of type {} for unary operator",
                    other.type_tag().name()
                )))
            }
        };
        let handle = self.alloc(result);
        self.push(handle);
        Ok(())
    }
}

fn binary_int(op: Opcode, m: i32, n: i32) -> Result<Value, Fault> {
    Ok(match op {
        Opcode::Add => Value::Int(m.wrapping_add(n)),
        Opcode::Sub => Value::Int(m.wrapping_sub(n)),
        Opcode::Mul => Value::Int(m.wrapping_mul(n)),
        Opcode::Div => {
            if n == 0 {
                return Err(Fault::type_error("divide by zero"));
            }
            Value::Int(m.wrapping_div(n))
        }
        Opcode::And => Value::Bool(m != 0 && n != 0),
        Opcode::Or => Value::Bool(m != 0 || n != 0),
        Opcode::Gt => Value::Bool(m > n),
        Opcode::Lt => Value::Bool(m < n),
        _ => return Err(Fault::type_error("bad integer operator")),
    })
}

fn binary_float(op: Opcode, x: f32, y: f32) -> Result<Value, Fault> {
    Ok(match op {
        Opcode::Add => Value::Float(x + y),
        Opcode::Sub => Value::Float(x - y),
        Opcode::Mul => Value::Float(x * y),
        Opcode::Div => Value::Float(x / y),
        Opcode::Gt => Value::Bool(x > y),
        Opcode::Lt => Value::Bool(x < y),
        _ => return Err(Fault::type_error("bad float operator")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{interpret, serial};
    use std::path::PathBuf;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn eval(source: &str) -> (Vm, String, Handle) {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        let program =
            interpret::build_string(source.as_bytes(), &PathBuf::from(".")).expect("build failed");
        let result = vm.execute(&program);
        let printed = String::from_utf8(buf.0.borrow().clone()).expect("non-utf8 output");
        (vm, printed, result)
    }

    fn printed(source: &str) -> String {
        eval(source).1
    }

    fn error_text(vm: &Vm, result: Handle) -> Option<String> {
        match vm.heap().get(result) {
            Value::Err(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Hand-assembled program: each (opcode, operand-bytes) pair, wrapped
    /// in the outer length frame.
    fn assemble(instructions: &[(Opcode, Vec<u8>)]) -> Vec<u8> {
        let mut code = Vec::new();
        for (op, operands) in instructions {
            code.push(*op as u8);
            code.extend_from_slice(operands);
        }
        let mut program = Vec::new();
        serial::encode_string(&mut program, &code);
        program
    }

    fn int_operand(value: i32) -> Vec<u8> {
        let mut out = Vec::new();
        serial::encode_int(&mut out, value);
        out
    }

    #[test]
    fn test_add_two_ints() {
        let mut vm = Vm::new();
        let program = assemble(&[
            (Opcode::Int, int_operand(1)),
            (Opcode::Int, int_operand(2)),
            (Opcode::Add, vec![]),
        ]);
        let result = vm.execute(&program);
        assert!(matches!(vm.heap().get(result), Value::Int(3)));
    }

    #[test]
    fn test_unknown_opcode_is_an_error_value() {
        let mut vm = Vm::new();
        let mut program = Vec::new();
        serial::encode_string(&mut program, &[200]);
        let result = vm.execute(&program);
        assert!(error_text(&vm, result).unwrap().contains("unknown opcode"));
    }

    #[test]
    fn test_truncated_program_is_an_error_value() {
        let mut vm = Vm::new();
        let program = assemble(&[(Opcode::Int, vec![])]);
        let result = vm.execute(&program);
        assert!(matches!(vm.heap().get(result), Value::Err(_)));
    }

    #[test]
    fn test_print_arithmetic() {
        assert_eq!("7\n", printed("sys.print(1 + 2 * 3)"));
    }

    #[test]
    fn test_arithmetic_identities() {
        for n in [-17, 0, 5, 1000] {
            assert_eq!(
                format!("{n}\n{n}\n{n}\n"),
                printed(&format!(
                    "n = {n} sys.print(n + 0) sys.print(n * 1) sys.print(-(-n))"
                ))
            );
        }
        assert_eq!(
            "true\ntrue\n",
            printed("sys.print(not not (3 != 0)) sys.print(3 != 0)")
        );
        assert_eq!(
            "false\nfalse\n",
            printed("sys.print(not not (0 != 0)) sys.print(0 != 0)")
        );
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!("ab1\n", printed("sys.print('ab' + 1)"));
    }

    #[test]
    fn test_division_by_zero_is_an_error_value() {
        let (vm, _, result) = eval("sys.print(1 / 0)");
        assert!(error_text(&vm, result).unwrap().contains("divide by zero"));
    }

    #[test]
    fn test_unbound_name_is_an_error_value() {
        let (vm, _, result) = eval("sys.print(missing)");
        let message = error_text(&vm, result).unwrap();
        assert!(message.contains("name error"), "got: {message}");
        assert!(message.contains("missing"), "got: {message}");
    }

    #[test]
    fn test_list_index_out_of_bounds() {
        let (vm, _, result) = eval("x = [1] sys.print(x[3])");
        assert!(error_text(&vm, result).unwrap().contains("bounds"));
    }

    #[test]
    fn test_calling_a_non_function() {
        let (vm, _, result) = eval("x = 3 x(1)");
        assert!(error_text(&vm, result).unwrap().contains("non-function"));
    }

    #[test]
    fn test_control_flow_if_true_runs_only_then() {
        assert_eq!("a\n", printed("if true then sys.print('a') else sys.print('b') end"));
    }

    #[test]
    fn test_control_flow_while_false_runs_never() {
        assert_eq!("done\n", printed("while false sys.print('x') end sys.print('done')"));
    }

    #[test]
    fn test_else_if_chain() {
        let source = "x = 2 if x == 1 then sys.print('one') else if x == 2 then \
                      sys.print('two') else sys.print('many') end";
        assert_eq!("two\n", printed(source));
    }

    #[test]
    fn test_function_call_binds_parameters_in_order() {
        assert_eq!(
            "1\n2\n",
            printed("f = function(a, b) sys.print(a) sys.print(b) end f(1, 2)")
        );
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        assert_eq!("nil\n", printed("f = function() x = 1 end sys.print(f())"));
    }

    #[test]
    fn test_recursion() {
        let source = "fac = function(n) r = 1 if n > 1 then r = n * fac(n - 1) end return r end \
                      sys.print(fac(6))";
        assert_eq!("720\n", printed(source));
    }

    #[test]
    fn test_closure_sees_rebinding_late() {
        let source = "make = function() x = 1 f = function() return x end x = 2 return f end \
                      g = make() sys.print(g())";
        assert_eq!("2\n", printed(source));
    }

    #[test]
    fn test_list_aliasing_through_rebinding() {
        assert_eq!("5\n", printed("x = [1, 2] y = x y[0] = 5 sys.print(x[0])"));
    }

    #[test]
    fn test_member_read_and_write() {
        assert_eq!(
            "2\n9\n",
            printed("x = ['a':1, 'b':2] sys.print(x['b']) x.b = 9 sys.print(x.b)")
        );
    }

    #[test]
    fn test_mixed_table_keeps_positions_and_keys() {
        assert_eq!(
            "10\n20\n1\n",
            printed("x = [10, 'a':1, 20] sys.print(x[0]) sys.print(x[1]) sys.print(x.a)")
        );
    }

    #[test]
    fn test_string_byte_write() {
        assert_eq!("aXc\n", printed("s = 'abc' s[1] = 88 sys.print(s)"));
    }

    #[test]
    fn test_forced_collection_reclaims_garbage() {
        let (mut vm, _, _) = eval("i = 0 while i < 100 x = [1, 2, 3, 'k':4] i = i + 1 end");
        vm.collect();
        let live = vm.live_values();
        assert!(live < 50, "{live} values alive after collection");
    }

    #[test]
    fn test_cyclic_list_survives_collection() {
        let source = "x = [1, 2] x['me'] = x";
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        let program =
            interpret::build_string(source.as_bytes(), &PathBuf::from(".")).expect("build failed");
        vm.execute(&program);
        vm.collect();
        let program = interpret::build_string(b"sys.print(x['me'][0] + x[1])", &PathBuf::from("."))
            .expect("build failed");
        let result = vm.execute(&program);
        assert!(!matches!(vm.heap().get(result), Value::Err(_)));
        assert_eq!("3\n", String::from_utf8(buf.0.borrow().clone()).unwrap());
    }

    #[test]
    fn test_collection_during_loop_is_safe() {
        // enough allocation to cross the soft cap several times
        let source = "i = 0 s = 0 while i < 3000 s = s + i i = i + 1 end sys.print(s)";
        assert_eq!(format!("{}\n", (0..3000).sum::<i32>()), printed(source));
    }

    #[test]
    fn test_repl_state_persists_across_executes() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        for line in ["x = 41", "x = x + 1", "sys.print(x)"] {
            let program = interpret::build_string(line.as_bytes(), &PathBuf::from("."))
                .expect("build failed");
            vm.execute(&program);
        }
        assert_eq!("42\n", String::from_utf8(buf.0.borrow().clone()).unwrap());
    }

    #[test]
    fn test_long_then_block_branches_correctly() {
        // the then-block is far longer than 63 bytes, so the patched
        // forward jump needs a multi-byte operand
        let mut body = String::new();
        for i in 0..40 {
            body.push_str(&format!("v{i} = {i} "));
        }
        let source = format!("if false then {body} sys.print('then') else sys.print('else') end");
        assert_eq!("else\n", printed(&source));
    }

    #[test]
    fn test_not_of_a_nil_result_is_true() {
        assert_eq!("true\n", printed("f = function() end sys.print(not f())"));
    }
}
