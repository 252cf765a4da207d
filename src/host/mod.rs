//! Line-delimited JSON-RPC host for a [`GdbController`](crate::gdb::GdbController)

pub mod protocol;
pub mod server;

pub use server::{SessionServer, StatusResult};
