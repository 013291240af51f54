//! The driver: build (lex, parse, generate), run, and the REPL.

use std::{
    error::Error,
    fmt::Display,
    fs,
    io::{self, BufRead},
    path::{Path, PathBuf},
};

use log::{debug, error};

use crate::{
    codegen,
    lexer::{self, LexError},
    parser::{self, ParseError},
    vm::{Handle, Value, Vm},
};

pub use crate::lexer::EXTENSION_SRC;

/// Extension of compiled bytecode files.
pub const EXTENSION_BC: &str = "lic";

#[derive(Debug)]
pub enum BuildError {
    Lex(LexError),
    Parse(ParseError),
    Io(io::Error),
    Usage(String),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Lex(error) => write!(f, "lex error: {error}"),
            BuildError::Parse(error) => write!(f, "parse error: {error}"),
            BuildError::Io(error) => write!(f, "io error: {error}"),
            BuildError::Usage(message) => f.write_str(message),
        }
    }
}

impl Error for BuildError {}

impl From<LexError> for BuildError {
    fn from(error: LexError) -> Self {
        BuildError::Lex(error)
    }
}

impl From<ParseError> for BuildError {
    fn from(error: ParseError) -> Self {
        BuildError::Parse(error)
    }
}

impl From<io::Error> for BuildError {
    fn from(error: io::Error) -> Self {
        BuildError::Io(error)
    }
}

pub fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

pub fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::write(path, bytes)
}

/// Source text → compiled program. `folder` anchors `import` resolution.
pub fn build_string(input: &[u8], folder: &Path) -> Result<Vec<u8>, BuildError> {
    let tokens = lexer::lex(input, folder)?;
    let ast = parser::parse(tokens)?;
    Ok(codegen::generate(&ast))
}

pub fn build_file(path: &Path) -> Result<Vec<u8>, BuildError> {
    debug!("building '{}'", path.display());
    let input = read_file(path)?;
    let folder = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    build_string(&input, &folder)
}

pub fn interpret_string(vm: &mut Vm, input: &[u8], folder: &Path) -> Result<Handle, BuildError> {
    let program = build_string(input, folder)?;
    Ok(vm.execute(&program))
}

pub fn interpret_file(vm: &mut Vm, path: &Path) -> Result<Handle, BuildError> {
    let program = build_file(path)?;
    Ok(vm.execute(&program))
}

/// Run an already-compiled bytecode file.
pub fn execute_file(vm: &mut Vm, path: &Path) -> Result<Handle, BuildError> {
    let program = read_file(path)?;
    Ok(vm.execute(&program))
}

/// Dispatch on the file extension: source is compiled first, bytecode runs
/// as is.
pub fn run_file(vm: &mut Vm, path: &Path) -> Result<Handle, BuildError> {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some(EXTENSION_BC) => execute_file(vm, path),
        Some(EXTENSION_SRC) => interpret_file(vm, path),
        _ => Err(BuildError::Usage(format!(
            "invalid file name '{}': expected .{EXTENSION_SRC} or .{EXTENSION_BC}",
            path.display()
        ))),
    }
}

/// Compile a source file and write the program bytes.
pub fn compile_file(source: &Path, output: &Path) -> Result<(), BuildError> {
    let program = build_file(source)?;
    write_file(output, &program)?;
    Ok(())
}

/// Read stdin line by line and interpret each one in the same VM, so
/// bindings persist across lines. Errors are reported and the loop goes
/// on.
pub fn repl(vm: &mut Vm) -> io::Result<()> {
    let folder = PathBuf::from(".");
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match interpret_string(vm, line.as_bytes(), &folder) {
            Err(build_error) => error!("{build_error}"),
            Ok(result) => {
                if let Value::Err(message) = vm.heap().get(result) {
                    error!("{}", String::from_utf8_lossy(message));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_lex_errors() {
        let result = build_string(b"x = 'bad\\q'", &PathBuf::from("."));
        assert!(matches!(result, Err(BuildError::Lex(_))));
    }

    #[test]
    fn test_build_rejects_parse_errors() {
        let result = build_string(b"while 1 x = 2", &PathBuf::from("."));
        assert!(matches!(result, Err(BuildError::Parse(_))));
    }

    #[test]
    fn test_run_file_rejects_unknown_extensions() {
        let mut vm = Vm::new();
        let result = run_file(&mut vm, &PathBuf::from("script.txt"));
        assert!(matches!(result, Err(BuildError::Usage(_))));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = build_file(&PathBuf::from("does-not-exist.li"));
        assert!(matches!(result, Err(BuildError::Io(_))));
    }
}
