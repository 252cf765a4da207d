//! Errors raised at the controller's fallible edges

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GdbError {
    #[error("Failed to start GDB process: {0}")]
    Launch(#[source] std::io::Error),
    #[error("GDB session already running")]
    AlreadyStarted,
    /// A signal or terminal system call failed.
    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),
    #[error("GDB stdin closed")]
    StdinClosed,
    #[error("GDB process has no pid")]
    NoPid,
    #[error("Failed to set up the debuggee terminal: {0}")]
    Terminal(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GdbError>;
