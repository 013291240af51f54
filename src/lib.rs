//! # Lilt
//!
//! A small, dynamically typed scripting language: lexer, recursive descent
//! parser, bytecode generator, and a stack-based virtual machine with a
//! mark-and-sweep heap.

pub mod bytecode;
pub mod codegen;
pub mod interpret;
pub mod lexer;
pub mod parser;
pub mod serial;
pub mod sys;
pub mod util;
pub mod vm;
