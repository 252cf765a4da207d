//! Request dispatch
//!
//! Maps JSON-RPC methods onto the controller's inbound API. Every method
//! answers with the session status after the call; what gdb later reports
//! arrives separately as `event` notifications.

use crate::gdb::{
    BreakpointAction, BreakpointChange, ControllerConfig, DebugOptions, GdbController, InspectTarget,
    ItemId, SessionPhase, SessionState,
};
use crate::host::protocol::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Methods that need a live gdb.
const SESSION_METHODS: &[&str] = &[
    "run",
    "run_until",
    "step_into",
    "step_over",
    "step_out",
    "break_into",
    "select_frame",
    "expand_item",
    "expand_user_item",
    "set_breakpoint",
    "clear_breakpoint",
    "modify_breakpoint",
    "apply_breakpoint",
    "clear_all_breakpoints",
    "disassemble",
    "memory_dump",
    "registers",
    "libraries",
    "set_locals_view",
];

/// Session snapshot returned by every method.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub phase: SessionPhase,
    pub state: SessionState,
    /// Rendered flags, e.g. `<app busy><wait for write>`.
    pub status: String,
    pub queued: usize,
    pub current_command: Option<String>,
    pub frame: u32,
}

#[derive(Debug, Deserialize)]
struct StartParams {
    executable: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    config: Option<ControllerConfig>,
}

#[derive(Debug, Deserialize)]
struct RunUntilParams {
    #[serde(default)]
    file: String,
    line: u32,
}

#[derive(Debug, Deserialize)]
struct FrameParams {
    frame: u32,
}

#[derive(Debug, Deserialize)]
struct UserItemParams {
    item: ItemId,
    request: String,
}

#[derive(Debug, Deserialize)]
struct SetBreakpointParams {
    set_command: String,
    key: i64,
}

#[derive(Debug, Deserialize)]
struct ClearBreakpointParams {
    clear_command: String,
}

#[derive(Debug, Deserialize)]
struct DisassembleParams {
    start: String,
    #[serde(default)]
    end: String,
}

#[derive(Debug, Deserialize)]
struct MemoryDumpParams {
    address: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct LocalsViewParams {
    enabled: bool,
    #[serde(default)]
    frame: u32,
}

/// Session server
pub struct SessionServer {
    controller: GdbController,
    shutdown_requested: bool,
}

impl SessionServer {
    pub fn new(controller: GdbController) -> Self {
        Self {
            controller,
            shutdown_requested: false,
        }
    }

    pub fn controller(&self) -> &GdbController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut GdbController {
        &mut self.controller
    }

    /// Set once a `shutdown` request was handled.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn status(&self) -> StatusResult {
        let state = self.controller.state();
        StatusResult {
            phase: self.controller.phase(),
            state,
            status: state.to_string(),
            queued: self.controller.queued(),
            current_command: self
                .controller
                .current_command()
                .map(|cmd| cmd.text().to_string()),
            frame: self.controller.current_frame(),
        }
    }

    /// Handle one input line. Returns nothing for notifications.
    pub fn handle_line(&mut self, line: &str) -> Option<JsonRpcReply> {
        debug!("Received: {}", line);
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request),
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Some(JsonRpcReply::Error(JsonRpcErrorResponse::new(
                    None,
                    JsonRpcError::parse_error(),
                )))
            }
        }
    }

    pub fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcReply> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcReply::Error(JsonRpcErrorResponse::new(
                request.id,
                JsonRpcError::invalid_request(),
            )));
        }

        debug!("Handling method: {}", request.method);
        let outcome = self.dispatch(&request.method, request.params);

        // Without an id the sender does not want an answer.
        let id = request.id?;
        let reply = match outcome.and_then(|()| {
            serde_json::to_value(self.status())
                .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
        }) {
            Ok(result) => JsonRpcReply::Success(JsonRpcResponse::new(id, result)),
            Err(error) => JsonRpcReply::Error(JsonRpcErrorResponse::new(Some(id), error)),
        };
        Some(reply)
    }

    fn dispatch(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), JsonRpcError> {
        let ctl = &mut self.controller;
        if SESSION_METHODS.contains(&method)
            && matches!(
                ctl.phase(),
                SessionPhase::NotStarted | SessionPhase::Terminated
            )
        {
            return Err(JsonRpcError::session_not_started(method));
        }

        match method {
            "start" => {
                let p: StartParams = parse(params)?;
                if let Some(config) = p.config {
                    ctl.replace_config(config)
                        .map_err(|e| JsonRpcError::start_failed(&e))?;
                }
                info!("Starting session for {}", p.executable);
                ctl.start(&p.executable, &p.args)
                    .map_err(|e| JsonRpcError::start_failed(&e))?;
            }
            "run" => ctl.run(),
            "run_until" => {
                let p: RunUntilParams = parse(params)?;
                ctl.run_until(&p.file, p.line);
            }
            "step_into" => ctl.step_into(),
            "step_over" => ctl.step_over(),
            "step_out" => ctl.step_out(),
            "break_into" => ctl.break_into(),
            "select_frame" => {
                let p: FrameParams = parse(params)?;
                ctl.select_frame(p.frame);
            }
            "expand_item" => {
                let target: InspectTarget = parse(params)?;
                ctl.expand_item(&target);
            }
            "expand_user_item" => {
                let p: UserItemParams = parse(params)?;
                ctl.expand_user_item(p.item, &p.request);
            }
            "set_breakpoint" => {
                let p: SetBreakpointParams = parse(params)?;
                ctl.set_breakpoint(&p.set_command, p.key);
            }
            "clear_breakpoint" => {
                let p: ClearBreakpointParams = parse(params)?;
                ctl.clear_breakpoint(&p.clear_command);
            }
            "modify_breakpoint" => {
                let change: BreakpointChange = parse(params)?;
                ctl.modify_breakpoint(change);
            }
            "apply_breakpoint" => {
                let action: BreakpointAction = parse(params)?;
                ctl.apply_breakpoint(action);
            }
            "clear_all_breakpoints" => ctl.clear_all_breakpoints(),
            "disassemble" => {
                let p: DisassembleParams = parse(params)?;
                ctl.disassemble(&p.start, &p.end);
            }
            "memory_dump" => {
                let p: MemoryDumpParams = parse(params)?;
                ctl.memory_dump(&p.address, &p.amount);
            }
            "registers" => ctl.registers(),
            "libraries" => ctl.libraries(),
            "set_locals_view" => {
                let p: LocalsViewParams = parse(params)?;
                ctl.set_locals_view_enabled(p.enabled, p.frame);
            }
            "reconfigure" => {
                let options: DebugOptions = parse(params)?;
                ctl.reconfigure(options);
            }
            "status" | "ping" => {}
            "shutdown" => {
                info!("Shutdown requested");
                self.shutdown_requested = true;
            }
            _ => {
                warn!("Unknown method: {}", method);
                return Err(JsonRpcError::method_not_found(method));
            }
        }
        Ok(())
    }
}

/// Decode params; a missing params member reads as `{}`.
fn parse<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, JsonRpcError> {
    let value = params.unwrap_or_else(|| serde_json::json!({}));
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))
}
