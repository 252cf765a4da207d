//! GDB session control
//!
//! Drives a gdb subprocess through its annotated text interface and reports
//! what happens as structured events.

pub mod command;
pub mod controller;
pub mod error;
pub mod framer;
pub mod parser;
pub mod process;
pub mod queue;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::GdbController;
pub use error::{GdbError, Result};
pub use process::{DebuggerProcess, ProcessEvent, ProcessLauncher, TokioLauncher};
pub use types::*;
