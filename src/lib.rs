//! shale: a small statically-typed, C-like shading language.
//!
//! The pipeline is lex, parse, type check (with structural unification and
//! overload resolution), monomorphise by inlining, then evaluate on a
//! simulated memory model. [`compiler::check`] runs the static half;
//! [`interp::call_function`] runs an entry point of a checked program.

pub mod compiler;
pub mod config;
pub mod interp;

pub use compiler::errors::CompileError;
pub use compiler::{check, format_error};
pub use interp::{call_function, call_function_with, Buffer, CallError, TypedValue};
