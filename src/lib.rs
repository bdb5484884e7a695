//! Intermediate-code generation for Dialog, a Prolog-like language for
//! interactive fiction.
//!
//! The front end hands over a resolved [`Program`]; [`compile_program`]
//! turns the clauses of every predicate into routines of the abstract
//! machine's intermediate code and stores them on the predicate.

#[macro_use]
extern crate static_assertions;

#[macro_use]
pub(crate) mod macros;

pub mod builder;
pub(crate) mod codegen;
pub mod compile;
pub mod compile_errors;
pub mod config;
pub mod dump;
pub mod forms;
pub(crate) mod indexing;
pub mod instructions;
pub mod library;
pub mod opcodes;
pub(crate) mod passes;

#[cfg(test)]
mod mock_machine;
#[cfg(test)]
mod test_utils;

// Re-exports
pub use compile::{compile_program, Compiler};
pub use compile_errors::{CollectDiagnostics, CompilationError, CompileFailure, Diagnostics, Level, TracingDiagnostics};
pub use config::CompilerSettings;
pub use dump::{dump_builtin, dump_predicate, BuiltinListing, PredicateListing};
pub use forms::Program;
