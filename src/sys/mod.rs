//! The host module. Name lookup falls back here; the reserved name `sys`
//! resolves to a lazily built map of host-callback cells. Every callback
//! receives its arguments as a source-tuple whose first element is the
//! receiver (method call) or the callback cell itself (plain call), so
//! real arguments start at index 1.

use std::{cell::RefCell, fs, path::PathBuf, rc::Rc};

use log::debug;

use crate::{
    interpret,
    vm::{Fault, Handle, HostFn, Value, ValueMap, Vm},
};

pub const RESERVED_SYS: &[u8] = b"sys";

const BUILTIN_FUNCS: &[(&str, HostFn)] = &[
    ("args", sys_args),
    ("print", sys_print),
    ("atoi", sys_atoi),
    ("read", sys_read),
    ("write", sys_write),
    ("save", sys_save),
    ("load", sys_load),
    ("remove", sys_remove),
    ("sin", sys_sin),
    ("run", sys_run),
    ("interpret", sys_interpret),
];

/// The canonical find-host-var hook, installed by `Vm::new`.
pub fn find(vm: &mut Vm, name: &[u8]) -> Result<Option<Handle>, Fault> {
    if name != RESERVED_SYS {
        return Ok(None);
    }
    if let Some(module) = vm.sys_module() {
        return Ok(Some(module));
    }

    debug!("binding the sys module");
    let mut map = ValueMap::new();
    for (func_name, func) in BUILTIN_FUNCS {
        let cell = vm.alloc(Value::Host(*func));
        map.insert(func_name.as_bytes().to_vec(), cell);
    }
    let module = vm.alloc(Value::Map(Rc::new(RefCell::new(map))));
    vm.set_sys_module(module);
    Ok(Some(module))
}

fn arg(args: &[Handle], index: usize) -> Result<Handle, Fault> {
    args.get(index)
        .copied()
        .ok_or_else(|| Fault::type_error("missing argument"))
}

fn str_arg(vm: &Vm, args: &[Handle], index: usize) -> Result<Vec<u8>, Fault> {
    match vm.heap().get(arg(args, index)?) {
        Value::Str(bytes) => Ok(bytes.clone()),
        _ => Err(Fault::type_error("expected a string argument")),
    }
}

fn path_arg(vm: &Vm, args: &[Handle], index: usize) -> Result<PathBuf, Fault> {
    let bytes = str_arg(vm, args, index)?;
    Ok(PathBuf::from(String::from_utf8_lossy(&bytes).as_ref()))
}

/// `sys.print(...)`: each argument's display form on its own line.
fn sys_print(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    for &argument in &args[1..] {
        let text = vm.heap().value_text(argument);
        vm.write_output(&text);
        vm.write_output(b"\n");
    }
    Ok(None)
}

/// `sys.atoi(string)` / `sys.atoi(string, offset)`: parse a decimal
/// integer; yields the number and the count of bytes consumed.
fn sys_atoi(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let bytes = str_arg(vm, &args, 1)?;
    let offset = match args.get(2) {
        Some(&extra) => match vm.heap().get(extra) {
            Value::Int(n) if *n >= 0 => *n as usize,
            _ => return Err(Fault::type_error("non-integer offset")),
        },
        None => 0,
    };

    let mut consumed = 0usize;
    let negative = bytes.get(offset) == Some(&b'-');
    if negative {
        consumed += 1;
    }
    let mut number: i32 = 0;
    while let Some(&digit) = bytes.get(offset + consumed) {
        if !digit.is_ascii_digit() {
            break;
        }
        number = number.wrapping_mul(10).wrapping_add((digit - b'0') as i32);
        consumed += 1;
    }
    if negative {
        number = number.wrapping_neg();
    }

    let number = vm.alloc(Value::Int(number));
    let consumed = vm.alloc(Value::Int(consumed as i32));
    Ok(Some(vm.alloc(Value::Tuple(vec![number, consumed]))))
}

/// `sys.read(path)`: the file's bytes as a string; raises through the
/// exception slot when the file cannot be read.
fn sys_read(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let path = path_arg(vm, &args, 1)?;
    match interpret::read_file(&path) {
        Ok(bytes) => Ok(Some(vm.alloc(Value::Str(bytes)))),
        Err(_) => {
            let message = vm.alloc(Value::Str(b"could not load file".to_vec()));
            vm.set_exception(message);
            Ok(None)
        }
    }
}

/// `sys.write(string, path)`: write raw bytes; yields 0 on success.
fn sys_write(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let bytes = str_arg(vm, &args, 1)?;
    let path = path_arg(vm, &args, 2)?;
    let status = match interpret::write_file(&path, &bytes) {
        Ok(()) => 0,
        Err(_) => -1,
    };
    Ok(Some(vm.alloc(Value::Int(status))))
}

/// `sys.save(value, path)`: serialize a value to a file.
fn sys_save(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let value = arg(&args, 1)?;
    let path = path_arg(vm, &args, 2)?;
    let mut bytes = Vec::new();
    vm.heap().serialize(value, &mut bytes)?;
    let status = match interpret::write_file(&path, &bytes) {
        Ok(()) => 0,
        Err(_) => -1,
    };
    Ok(Some(vm.alloc(Value::Int(status))))
}

/// `sys.load(path)`: rebuild a value saved with `sys.save`; nil when the
/// file does not exist.
fn sys_load(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let path = path_arg(vm, &args, 1)?;
    let Ok(bytes) = interpret::read_file(&path) else {
        return Ok(None);
    };
    let mut reader = crate::serial::ByteReader::new(&bytes);
    let value = vm.heap_mut().deserialize(&mut reader)?;
    Ok(Some(value))
}

/// `sys.remove(path)`: delete a file, quietly.
fn sys_remove(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let path = path_arg(vm, &args, 1)?;
    let _ = fs::remove_file(path);
    Ok(None)
}

/// `sys.sin(x)`: sine of x radians.
fn sys_sin(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let x = match vm.heap().get(arg(&args, 1)?) {
        Value::Int(n) => *n as f32,
        Value::Float(f) => *f,
        _ => return Err(Fault::type_error("sin of a non-number")),
    };
    Ok(Some(vm.alloc(Value::Float(x.sin()))))
}

/// `sys.run(program)`: execute compiled bytecode held in a string.
fn sys_run(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let program = str_arg(vm, &args, 1)?;
    let result = vm.execute(&program);
    if let Value::Err(message) = vm.heap().get(result) {
        return Err(Fault::host(String::from_utf8_lossy(message).into_owned()));
    }
    Ok(None)
}

/// `sys.interpret(source)`: compile and run source text.
fn sys_interpret(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let source = str_arg(vm, &args, 1)?;
    let result = interpret::interpret_string(vm, &source, &PathBuf::from("."))
        .map_err(|error| Fault::host(error.to_string()))?;
    if let Value::Err(message) = vm.heap().get(result) {
        return Err(Fault::host(String::from_utf8_lossy(message).into_owned()));
    }
    Ok(None)
}

/// `sys.args()`: the interpreter's command line as a list of strings.
fn sys_args(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    vm.pop_args()?;
    let args: Vec<Vec<u8>> = vm.script_args().to_vec();
    let handles: Vec<Handle> = args
        .into_iter()
        .map(|argument| vm.alloc(Value::Str(argument)))
        .collect();
    Ok(Some(vm.alloc(Value::list(handles))))
}
