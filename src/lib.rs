//! gdb session controller
//!
//! Runs gdb as a subordinate process, queues high level debugging actions
//! as gdb commands, frames gdb's output into tagged blocks and lines, and
//! turns them into [`gdb::DebugEvent`]s for a front end.
//!
//! The [`host`] module exposes a controller over line-delimited JSON-RPC;
//! the `gdb-controller` binary runs it on stdin/stdout.

pub mod gdb;
pub mod host;
