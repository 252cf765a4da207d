//! gdb-controller
//!
//! Hosts one gdb session behind a line-delimited JSON-RPC 2.0 interface.
//! Requests arrive on stdin, one per line; replies and `event`
//! notifications go to stdout. Logs go to stderr.
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"start","params":{"executable":"./a.out"}}
//! {"jsonrpc":"2.0","id":2,"method":"set_breakpoint","params":{"set_command":"break main","key":1}}
//! {"jsonrpc":"2.0","id":3,"method":"run"}
//! ```
//!
//! Set `GDB_PATH` to use a gdb other than the one on `PATH`.

use anyhow::Result;
use gdb_controller::gdb::{ControllerConfig, DebugEvent, GdbController, TokioLauncher};
use gdb_controller::host::protocol::JsonRpcNotification;
use gdb_controller::host::SessionServer;
use serde::Serialize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting gdb-controller v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ControllerConfig::default();
    if let Ok(path) = std::env::var("GDB_PATH") {
        config.gdb_path = path;
    }

    let (launcher, mut process_events) = TokioLauncher::new();
    let (event_tx, mut debug_events) = mpsc::unbounded_channel::<DebugEvent>();
    let mut server = SessionServer::new(GdbController::new(config, Box::new(launcher), event_tx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    info!("gdb-controller ready, listening on stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = server.handle_line(&line) {
                        write_line(&mut stdout, &reply)?;
                    }
                    if server.shutdown_requested() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            },
            Some(event) = process_events.recv() => {
                server.controller_mut().handle_process_event(event);
            }
            Some(event) = debug_events.recv() => {
                write_line(&mut stdout, &JsonRpcNotification::event(&event)?)?;
            }
        }
    }

    server.controller_mut().shutdown(&mut process_events).await;
    while let Ok(event) = debug_events.try_recv() {
        write_line(&mut stdout, &JsonRpcNotification::event(&event)?)?;
    }

    info!("gdb-controller shutting down");
    Ok(())
}

fn write_line<T: Serialize>(stdout: &mut std::io::Stdout, message: &T) -> Result<()> {
    let text = serde_json::to_string(message)?;
    debug!("Sending: {}", text);
    let mut out = stdout.lock();
    writeln!(out, "{}", text)?;
    out.flush()?;
    Ok(())
}
