//! Command line surface of the `lilt` binary.

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The script to run: a .li source file or a .lic bytecode file.
    /// Without it, Lilt reads from standard input (REPL).
    #[arg(index = 1)]
    pub file: Option<std::path::PathBuf>,

    /// Compile `file` and write the bytecode here instead of running it.
    #[arg(index = 2)]
    pub output: Option<std::path::PathBuf>,

    /// How much the interpreter reports while it works.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Verbosity steps, each including the ones before it.
#[derive(ValueEnum, Clone, Copy, Default, Debug)]
pub enum LogLevel {
    /// Failures only.
    #[default]
    Error,

    /// Warnings too.
    Warn,

    /// Progress: which files get built, imported, and run.
    Info,

    /// Internal detail from the build pipeline.
    Debug,

    /// Everything, down to single bytecode instructions. Expect a
    /// torrent of output.
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
