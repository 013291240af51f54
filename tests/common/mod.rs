//! Shared plumbing for the end-to-end tests: a VM whose `sys.print`
//! output is captured in memory.

use std::{
    cell::RefCell,
    io::{self, Write},
    path::PathBuf,
    rc::Rc,
};

use lilt::{
    interpret,
    vm::{Handle, Value, Vm},
};

#[derive(Clone, Default)]
pub struct SharedBuf(pub Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("non-utf8 output")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn capture_vm() -> (Vm, SharedBuf) {
    let buf = SharedBuf::default();
    let vm = Vm::with_output(Box::new(buf.clone()));
    (vm, buf)
}

/// Compile and run `source`, returning everything the test might inspect.
#[allow(dead_code)]
pub fn eval(source: &str) -> (Vm, SharedBuf, Handle) {
    let (mut vm, buf) = capture_vm();
    let result = interpret::interpret_string(&mut vm, source.as_bytes(), &PathBuf::from("."))
        .expect("build failed");
    (vm, buf, result)
}

/// Run `source` and return what it printed; the program must not trap.
#[allow(dead_code)]
pub fn run(source: &str) -> String {
    let (vm, buf, result) = eval(source);
    if let Value::Err(message) = vm.heap().get(result) {
        panic!("runtime error: {}", String::from_utf8_lossy(message));
    }
    buf.text()
}
