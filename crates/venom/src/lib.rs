//! Venom: a small statically-typed object-oriented language with
//! parametric polymorphism, closure lifting, and a reference-counted
//! stack-based bytecode virtual machine.
//!
//! The crate covers the full pipeline: lexing and parsing, semantic
//! analysis (symbol tables, name resolution, type checking, subtyping),
//! the rewrite passes (desugaring, canonical references, module-main
//! extraction, monomorphization, lifting, return normalization, primitive
//! boxing), symbolic code generation, linking, and execution.

pub mod analysis;
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod error;
pub mod io;
pub mod lex;
pub mod linker;
pub mod parse;
pub mod rewrite;
pub mod run;
pub mod runtime;
pub mod vm;

pub use crate::{
    analysis::analyzer::ModuleLoader,
    bytecode::Executable,
    error::{CompileError, CompileErrorKind, RuntimeError, VenomError},
    io::{CollectSink, NullSink, OutputSink, StdoutSink},
    run::{CompileOpts, FileLoader, compile, compile_and_exec, execute, run_source,
          run_source_with_loader},
    vm::ExecutionContext,
};
