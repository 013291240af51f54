//! # Lilt
//!
//! This binary is the Lilt interpreter. Without arguments it reads from
//! standard input; with a file it compiles and/or runs it; with a second
//! path it compiles the first argument into a bytecode file.

mod cli;

use cli::*;

use std::process::ExitCode;

use log::error;

use lilt::{
    interpret,
    vm::{Value, Vm},
};

fn main() -> ExitCode {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    let mut vm = Vm::new();
    vm.set_script_args(
        std::env::args()
            .skip(1)
            .map(String::into_bytes)
            .collect(),
    );

    match (args.file, args.output) {
        (None, _) => {
            if let Err(io_error) = interpret::repl(&mut vm) {
                error!("{io_error}");
                return ExitCode::FAILURE;
            }
        }
        (Some(file), None) => match interpret::run_file(&mut vm, &file) {
            Err(build_error) => {
                error!("{build_error}");
                return ExitCode::FAILURE;
            }
            Ok(result) => {
                if let Value::Err(message) = vm.heap().get(result) {
                    error!("{}", String::from_utf8_lossy(message));
                    return ExitCode::FAILURE;
                }
            }
        },
        (Some(file), Some(output)) => {
            if let Err(build_error) = interpret::compile_file(&file, &output) {
                error!("{build_error}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
