//! The dynamic half of the pipeline: the simulated memory model, typed
//! values, and the tree-walking evaluator behind `call_function`.

pub mod eval;
pub mod memory;
pub mod value;

pub use eval::{call_function, call_function_with, CallError, CallOptions, TrapError, TrapKind};
pub use memory::{ArrayRef, MemoryBlock, Pointer, Slot};
pub use value::{Buffer, TypedValue};
