//! GDB session controller
//!
//! Drives gdb as a subordinate process. High level debugging actions become
//! queued [`Command`]s; gdb's output is framed, classified and turned into
//! [`DebugEvent`]s. Everything happens synchronously inside one of three
//! entry points (bytes received, write completed, process exited) or an
//! inbound API call, so the session flags are never observed half-updated.
//!
//! Commands whose output we need are wrapped by switching gdb's prompt to
//! `\032<tag>` before the command and back to `\032i` after it. The output
//! then arrives as `\032<tag>...\032<tag>\032i`, which the framer turns into
//! one block. If a wrapped command errors before its closing prompt, the
//! reply never completes and the queue stalls; there is no recovery for that.

use crate::gdb::command::{Command, CommandClass, CommandKind};
use crate::gdb::error::{GdbError, Result};
use crate::gdb::framer::{OutputBuffer, Unit};
use crate::gdb::parser::{LineClassifier, LineKind, SignalClass};
use crate::gdb::process::{DebuggerProcess, ProcessEvent, ProcessLauncher};
use crate::gdb::queue::CommandQueue;
use crate::gdb::types::*;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Mutable session data. Owned by the controller and touched by nothing else.
#[derive(Debug)]
struct ControllerState {
    flags: SessionState,
    queue: CommandQueue,
    /// The command in flight, if any.
    current: Option<Command>,
    output: OutputBuffer,
    /// Frame that locals and backtraces are attached to.
    current_frame: u32,
    /// Frames whose locals were requested since the last stop.
    frames_with_locals: HashSet<u32>,
    /// Set on `Program exited`; breakpoint insert failures only mean a
    /// stale shared-library breakpoint after this.
    program_has_exited: bool,
    terminated: bool,
}

impl ControllerState {
    fn new(buffer_capacity: usize) -> Self {
        Self {
            flags: SessionState::DEBUGGER_NOT_STARTED | SessionState::APP_NOT_STARTED,
            queue: CommandQueue::new(),
            current: None,
            output: OutputBuffer::with_capacity(buffer_capacity),
            current_frame: 0,
            frames_with_locals: HashSet::new(),
            program_has_exited: false,
            terminated: false,
        }
    }
}

/// GDB session controller
pub struct GdbController {
    config: ControllerConfig,
    launcher: Box<dyn ProcessLauncher>,
    process: Option<Box<dyn DebuggerProcess>>,
    state: ControllerState,
    classifier: LineClassifier,
    events: mpsc::UnboundedSender<DebugEvent>,
}

impl GdbController {
    pub fn new(
        config: ControllerConfig,
        launcher: Box<dyn ProcessLauncher>,
        events: mpsc::UnboundedSender<DebugEvent>,
    ) -> Self {
        let state = ControllerState::new(config.initial_buffer_capacity);
        Self {
            config,
            launcher,
            process: None,
            state,
            classifier: LineClassifier::new(),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.flags
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        let flags = self.state.flags;
        if self.state.terminated {
            SessionPhase::Terminated
        } else if flags.contains(SessionState::DEBUGGER_NOT_STARTED) {
            SessionPhase::NotStarted
        } else if flags.contains(SessionState::APP_BUSY) {
            SessionPhase::Busy
        } else if flags.contains(SessionState::PROGRAM_EXITED) {
            SessionPhase::Exited
        } else if flags.contains(SessionState::APP_NOT_STARTED) && self.has_pending_work() {
            SessionPhase::Initializing
        } else {
            SessionPhase::Idle
        }
    }

    /// Number of commands waiting behind the one in flight.
    pub fn queued(&self) -> usize {
        self.state.queue.len()
    }

    pub fn current_command(&self) -> Option<&Command> {
        self.state.current.as_ref()
    }

    pub fn current_frame(&self) -> u32 {
        self.state.current_frame
    }

    fn has_pending_work(&self) -> bool {
        !self.state.queue.is_empty()
            || self
                .state
                .current
                .as_ref()
                .is_some_and(|cmd| cmd.more_to_send() || cmd.expects_reply())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Swap the whole configuration. Only possible while no gdb is running.
    pub fn replace_config(&mut self, config: ControllerConfig) -> Result<()> {
        if self.process.is_some() {
            return Err(GdbError::AlreadyStarted);
        }
        self.state.output = OutputBuffer::with_capacity(config.initial_buffer_capacity);
        self.config = config;
        Ok(())
    }

    /// Launch gdb and queue the session setup for `executable`.
    ///
    /// The target is loaded but not run; a later [`run`](Self::run) starts it.
    pub fn start(&mut self, executable: &str, args: &str) -> Result<()> {
        if self.process.is_some() {
            return Err(GdbError::AlreadyStarted);
        }

        let process = self
            .launcher
            .launch(&self.config.gdb_path, &self.config.gdb_args)?;
        self.process = Some(process);

        let viewing_locals = self.state.flags & SessionState::VIEWING_LOCALS;
        self.state.flags = SessionState::APP_NOT_STARTED | viewing_locals;
        self.state.terminated = false;
        self.state.program_has_exited = false;
        self.state.current_frame = 0;
        self.state.frames_with_locals.clear();
        self.state.output.clear();
        self.status("");

        info!("Loading {} into GDB", executable);

        let options = self.config.options.clone();
        self.enqueue(Command::set(format!("set prompt {}", Tag::Idle.prompt())), false);
        self.enqueue(Command::set("set confirm off"), false);
        self.enqueue(Command::set(static_members_command(&options)), false);
        if let Some(tty) = self.inferior_terminal() {
            self.enqueue(Command::set(format!("tty {}", tty)), false);
        }
        if !args.trim().is_empty() {
            self.enqueue(Command::set(format!("set args {}", args)), false);
        }
        self.enqueue(Command::set(format!("file {}", executable)), false);
        // One value per line in gdb's output.
        self.enqueue(Command::set("set width 0"), false);
        self.enqueue(Command::set("set height 0"), false);
        if options.break_on_loading_library {
            self.enqueue(Command::set(solib_stop_command(&options)), false);
        }
        self.enqueue(Command::set(asm_demangle_command(&options)), false);

        self.emit(DebugEvent::RequestPendingBreakpoints);
        Ok(())
    }

    /// The configured terminal, else a fresh one from the launcher.
    fn inferior_terminal(&mut self) -> Option<String> {
        if let Some(tty) = &self.config.inferior_tty {
            return Some(tty.clone());
        }
        match self.launcher.open_terminal() {
            Ok(tty) => tty,
            Err(e) => {
                warn!("Debuggee output will mix with GDB's: {}", e);
                None
            }
        }
    }

    /// Feed one subprocess event into the session.
    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            // stderr and stdout share one framer.
            ProcessEvent::Stdout(bytes) | ProcessEvent::Stderr(bytes) => self.on_output(&bytes),
            ProcessEvent::WriteComplete => self.on_write_complete(),
            ProcessEvent::InferiorOutput(bytes) => self.emit(DebugEvent::InferiorOutput {
                text: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            ProcessEvent::Exited { code } => self.on_process_exited(code),
        }
    }

    fn on_output(&mut self, bytes: &[u8]) {
        debug!("[gdb]>> {:?}", String::from_utf8_lossy(bytes));
        let units = self.state.output.feed(bytes);
        for unit in units {
            self.handle_unit(unit);
        }
        self.dispatch();
    }

    fn on_write_complete(&mut self) {
        self.state.flags.remove(SessionState::WAITING_FOR_WRITE);
        self.status("");
        self.dispatch();
    }

    fn on_process_exited(&mut self, code: Option<i32>) {
        self.destroy_commands();
        self.process = None;
        let viewing_locals = self.state.flags & SessionState::VIEWING_LOCALS;
        self.state.flags = SessionState::DEBUGGER_NOT_STARTED
            | SessionState::APP_NOT_STARTED
            | SessionState::PROGRAM_EXITED
            | viewing_locals;
        self.state.terminated = true;
        self.state.output.clear();
        info!("GDB process exited");
        self.status("Process exited");
        self.emit(DebugEvent::ProcessExited { code });
    }

    /// First half of teardown: drop all work, interrupt a running target
    /// and ask gdb to quit. Returns false when there is no process.
    pub fn begin_shutdown(&mut self) -> bool {
        self.destroy_commands();
        if self.process.is_none() {
            return false;
        }

        self.state.flags.insert(SessionState::WAITING_FOR_WRITE);
        self.status("");
        self.pause_target();
        if let Some(process) = self.process.as_mut() {
            if let Err(e) = process.write(b"quit\n") {
                debug!("Could not send quit: {}", e);
            }
        }
        true
    }

    /// Second half of teardown: kill whatever is left.
    pub fn finish_shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            // Usually gdb has already gone; a failed kill is expected then.
            if let Err(e) = process.kill() {
                debug!("Kill after quit: {}", e);
            }
        }
        self.state.flags = SessionState::DEBUGGER_NOT_STARTED | SessionState::APP_NOT_STARTED;
        self.state.terminated = true;
        info!("GDB stopped");
        self.status("Debugger stopped");
    }

    /// Quit gdb, pumping its events for a bounded time before killing it.
    pub async fn shutdown(&mut self, events: &mut mpsc::UnboundedReceiver<ProcessEvent>) {
        if self.begin_shutdown() {
            let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);
            let poll = Duration::from_millis(self.config.shutdown_poll_ms.max(1));
            while self.state.flags.contains(SessionState::WAITING_FOR_WRITE)
                && Instant::now() < deadline
            {
                match timeout(poll, events.recv()).await {
                    Ok(Some(event)) => self.handle_process_event(event),
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
        }
        self.finish_shutdown();
    }

    /// Apply changed debug options. A running target is interrupted
    /// silently, updated, and resumed.
    pub fn reconfigure(&mut self, options: DebugOptions) {
        let old = std::mem::replace(&mut self.config.options, options.clone());
        let static_changed = old.display_static_members != options.display_static_members;
        let demangle_changed = old.asm_demangle != options.asm_demangle;
        let solib_changed = old.break_on_loading_library != options.break_on_loading_library;

        if !(static_changed || demangle_changed || solib_changed) || self.process.is_none() {
            return;
        }

        if self.state.flags.contains(SessionState::APP_BUSY) {
            self.silent_break_into();
        }
        if static_changed {
            self.enqueue(Command::set(static_members_command(&options)), false);
        }
        if demangle_changed {
            self.enqueue(Command::set(asm_demangle_command(&options)), false);
        }
        if solib_changed {
            self.enqueue(Command::set(solib_stop_command(&options)), false);
        }
        self.resume_after_silent_break();
    }

    // ========================================================================
    // Queue and dispatch
    // ========================================================================

    fn enqueue(&mut self, cmd: Command, urgent: bool) {
        self.state.queue.push(cmd, urgent);
        self.dispatch();
    }

    /// Send the next piece of work if gdb can take it.
    fn dispatch(&mut self) {
        if self.state.flags.any(
            SessionState::DEBUGGER_NOT_STARTED
                | SessionState::WAITING_FOR_WRITE
                | SessionState::APP_BUSY,
        ) {
            return;
        }
        if self.process.is_none() {
            return;
        }

        loop {
            if self.state.current.is_none() {
                self.state.current = self.state.queue.pop();
            }
            match &self.state.current {
                None => return,
                Some(cmd) if cmd.more_to_send() => break,
                // Sent; waiting for its tagged reply.
                Some(cmd) if cmd.expects_reply() => return,
                Some(_) => self.state.current = None,
            }
        }

        let Some(cmd) = self.state.current.as_mut() else {
            return;
        };
        let Some(chunk) = cmd.next_chunk() else {
            debug_assert!(false, "dispatching a command with nothing to send");
            return;
        };
        let is_run = cmd.is_run_command();

        if let Some(process) = self.process.as_mut() {
            debug!("[gdb]<< {:?}", chunk);
            if let Err(e) = process.write(chunk.as_bytes()) {
                // Process exit is reported separately.
                warn!("Write to GDB failed: {}", e);
            }
        }

        self.state.flags.insert(SessionState::WAITING_FOR_WRITE);
        if is_run {
            self.state.flags.insert(SessionState::APP_BUSY);
            self.state.flags.remove(
                SessionState::APP_NOT_STARTED
                    | SessionState::PROGRAM_EXITED
                    | SessionState::SILENT_BREAK_INTO,
            );
        }
        self.check_invariants();
        self.status("");
    }

    fn destroy_commands(&mut self) {
        self.state.current = None;
        self.state.queue.clear();
    }

    /// Drop pending run commands (and info commands during a silent break),
    /// then interrupt the target if it is running.
    fn pause_target(&mut self) {
        let silent = self.state.flags.contains(SessionState::SILENT_BREAK_INTO);
        self.state.queue.purge_for_pause(silent);

        if self.state.flags.contains(SessionState::APP_BUSY) {
            if let Some(process) = self.process.as_mut() {
                if let Err(e) = process.interrupt() {
                    warn!("Failed to interrupt GDB: {}", e);
                }
            }
        }
    }

    /// Stop a running target for the controller's own use.
    fn silent_break_into(&mut self) {
        if self.state.flags.contains(SessionState::SILENT_BREAK_INTO) {
            // Already interrupted; just drop the resume queued last time.
            self.state.queue.purge_for_pause(true);
            return;
        }
        self.state.flags.insert(SessionState::SILENT_BREAK_INTO);
        self.pause_target();
    }

    fn resume_after_silent_break(&mut self) {
        if self.state.flags.contains(SessionState::SILENT_BREAK_INTO) {
            self.enqueue(Command::run("continue"), false);
        }
    }

    /// Run `queue_work` now, or around a silent break if the target is
    /// running and forcing is allowed. Returns false if nothing was done.
    fn with_forced_stop(&mut self, queue_work: impl FnOnce(&mut Self)) -> bool {
        if self.state.flags.contains(SessionState::DEBUGGER_NOT_STARTED) {
            return false;
        }
        if self.state.flags.contains(SessionState::APP_BUSY) {
            if !self.config.options.force_breakpoint_set {
                return false;
            }
            self.silent_break_into();
        }
        queue_work(self);
        self.resume_after_silent_break();
        true
    }

    fn check_invariants(&self) {
        debug_assert!(
            !self.state.flags.contains(SessionState::APP_BUSY | SessionState::APP_NOT_STARTED),
            "app busy and not started at once: {}",
            self.state.flags
        );
    }

    // ========================================================================
    // Output handling
    // ========================================================================

    fn handle_unit(&mut self, unit: Unit) {
        match unit {
            Unit::Line(line) => self.handle_line(&line),
            Unit::Block { tag, payload } => self.handle_block(tag, &payload),
            Unit::Notice(notice) => self.status(&notice),
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.classifier.classify(line) {
            LineKind::ProgramExited => {
                // The target is gone but gdb is still with us.
                let kept = self.state.flags
                    & (SessionState::VIEWING_LOCALS | SessionState::WAITING_FOR_WRITE);
                self.state.flags =
                    SessionState::APP_NOT_STARTED | SessionState::PROGRAM_EXITED | kept;
                self.destroy_commands();
                self.state.program_has_exited = true;
                info!("{}", line);
                self.status(line);
                self.emit(DebugEvent::ProgramExited {
                    message: line.to_string(),
                });
            }
            LineKind::SignalReceived {
                class: SignalClass::Interrupt,
                ..
            } if self.state.flags.contains(SessionState::SILENT_BREAK_INTO) => {
                debug!("Ignoring our own interrupt");
            }
            LineKind::SignalReceived {
                class: SignalClass::Fatal,
                signal,
            } => {
                // Whatever was queued is meaningless now; leave the target
                // stopped for a post-mortem.
                warn!("Target died with {}", signal);
                self.destroy_commands();
                self.act_on_program_pause(line);
            }
            LineKind::SignalReceived { .. } => self.act_on_program_pause(line),
            LineKind::BreakpointInsertFailed { id } if self.state.program_has_exited => {
                // A re-run with a breakpoint in a library that is no longer
                // loaded. Drop it from gdb (the list keeps it) and carry on.
                self.state.flags.remove(SessionState::APP_BUSY);
                if let Some(id) = id.filter(|&id| id != 0) {
                    self.emit(DebugEvent::UnableToSetBreakpoint { id });
                    self.enqueue(Command::set(format!("delete {}", id)), false);
                    self.enqueue(Command::tagged("info breakpoints", Tag::BreakpointList), false);
                    self.enqueue(Command::run("continue"), false);
                }
            }
            LineKind::BreakpointInsertFailed { .. } => self.act_on_program_pause(line),
            LineKind::WatchpointOutOfScope { id } => {
                match id {
                    Some(id) => {
                        self.enqueue(Command::set(format!("delete {}", id)), false);
                        self.enqueue(
                            Command::tagged("info breakpoints", Tag::BreakpointList),
                            false,
                        );
                    }
                    None => warn!("Watchpoint scope line without a number: {}", line),
                }
                self.act_on_program_pause(line);
            }
            LineKind::SharedLibraryStop => {
                self.state.flags.remove(SessionState::APP_BUSY);
                self.emit(DebugEvent::RequestPendingBreakpoints);
                self.enqueue(Command::run("continue"), false);
            }
            LineKind::BreakpointNotice => {
                self.enqueue(Command::tagged("info breakpoints", Tag::BreakpointList), false);
            }
            LineKind::SourcePosition => self.parse_program_location(line),
            LineKind::Running => {}
            LineKind::Pause => self.act_on_program_pause(line),
        }
    }

    fn handle_block(&mut self, tag: Tag, payload: &str) {
        debug!("Block {:?}: {:?}", tag, payload);
        match tag {
            Tag::Idle => {}
            Tag::Frame => self.parse_frame_selected(payload),
            Tag::SetBreakpoint => {
                if let Some(CommandKind::SetBreakpoint { key }) =
                    self.state.current.as_ref().map(Command::kind)
                {
                    // Negative keys are internal breakpoints nobody listens for.
                    if *key >= 0 {
                        let key = *key;
                        self.emit(DebugEvent::BreakpointConfirmed {
                            key,
                            raw: payload.to_string(),
                        });
                    }
                }
            }
            Tag::SourcePosition => self.parse_program_location(payload),
            Tag::Locals => {
                let frame = self.state.current_frame;
                self.state.frames_with_locals.insert(frame);
                let trim = if frame == 0 {
                    TrimScope::WholeTree
                } else {
                    TrimScope::Frame
                };
                self.emit(DebugEvent::Locals {
                    frame,
                    raw: payload.to_string(),
                    trim,
                });
            }
            Tag::DataRequest => {
                if let Some(CommandKind::InspectItem { item }) =
                    self.state.current.as_ref().map(Command::kind)
                {
                    let item = *item;
                    self.emit(DebugEvent::RequestedData {
                        item,
                        raw: payload.to_string(),
                    });
                }
            }
            Tag::BreakpointList => self.emit(DebugEvent::BreakpointList {
                raw: payload.to_string(),
            }),
            Tag::Backtrace => {
                let frame = self.state.current_frame;
                self.emit(DebugEvent::Backtrace {
                    frame,
                    raw: payload.to_string(),
                    trim_excess_frames: frame == 0,
                });
            }
            Tag::Disassemble => self.emit(DebugEvent::Disassembly {
                raw: payload.to_string(),
            }),
            Tag::MemoryDump => self.emit(DebugEvent::MemoryDump {
                raw: payload.to_string(),
            }),
            Tag::Registers => self.emit(DebugEvent::Registers {
                raw: payload.to_string(),
            }),
            Tag::Libraries => self.emit(DebugEvent::Libraries {
                raw: payload.to_string(),
            }),
        }

        if self
            .state
            .current
            .as_ref()
            .is_some_and(|cmd| cmd.completed_by(tag))
        {
            self.state.current = None;
        }
    }

    /// Refresh everything the user sees after the target stopped.
    fn act_on_program_pause(&mut self, message: &str) {
        // Only a running target can stop.
        if !self.state.flags.contains(SessionState::APP_BUSY) {
            return;
        }

        debug!("Acting on program pause: {:?}", message);
        self.state.flags.remove(SessionState::APP_BUSY);
        self.status(message);
        self.emit(DebugEvent::ProgramPaused {
            reason: message.to_string(),
        });

        // A stopped program is always at frame zero.
        self.state.current_frame = 0;
        self.state.frames_with_locals.clear();
        self.state.program_has_exited = false;

        self.enqueue(Command::tagged("backtrace", Tag::Backtrace), true);
        if self.state.flags.contains(SessionState::VIEWING_LOCALS) {
            self.state.frames_with_locals.insert(0);
            self.enqueue(Command::info("info local", Tag::Locals), false);
        }
        self.emit(DebugEvent::RequestPendingBreakpoints);
    }

    fn parse_program_location(&mut self, text: &str) {
        if self.state.flags.contains(SessionState::SILENT_BREAK_INTO) {
            // Our own interrupt landed. A `continue` is already queued; just
            // let the queue move.
            debug!("Program location during silent break: {:?}", text);
            self.state.flags.remove(SessionState::APP_BUSY);
            return;
        }

        match self.classifier.parse_source_position(text) {
            Some(position) => {
                self.act_on_program_pause("");
                self.emit(DebugEvent::ShowStepInSource {
                    file: Some(position.file),
                    line: Some(position.line),
                });
            }
            None => {
                self.act_on_program_pause(&format!("No source: {}", text));
                self.emit(DebugEvent::ShowStepInSource {
                    file: None,
                    line: None,
                });
            }
        }
    }

    fn parse_frame_selected(&mut self, payload: &str) {
        let marker = Tag::SourcePosition.prompt();
        if let Some(start) = payload.find(&marker) {
            let rest = &payload[start + marker.len()..];
            if let Some(end) = rest.find('\n') {
                self.parse_program_location(&rest[..end]);
                return;
            }
        }

        let first_line = payload.lines().next().unwrap_or("");
        self.emit(DebugEvent::ShowStepInSource {
            file: None,
            line: None,
        });
        self.status(&format!("No source: {}", first_line));
    }

    // ========================================================================
    // Inbound API
    // ========================================================================

    /// `run` for a fresh target, `continue` afterwards.
    pub fn run(&mut self) {
        if self
            .state
            .flags
            .any(SessionState::APP_BUSY | SessionState::DEBUGGER_NOT_STARTED)
        {
            return;
        }
        let text = if self.state.flags.contains(SessionState::APP_NOT_STARTED) {
            "run"
        } else {
            "continue"
        };
        self.enqueue(Command::run(text), false);
    }

    /// `file` may be empty to mean the current file.
    pub fn run_until(&mut self, file: &str, line: u32) {
        if self
            .state
            .flags
            .any(SessionState::APP_BUSY | SessionState::DEBUGGER_NOT_STARTED)
        {
            return;
        }
        let text = if file.is_empty() {
            format!("until {}", line)
        } else {
            format!("until {}:{}", file, line)
        };
        self.enqueue(Command::run(text), false);
    }

    pub fn step_into(&mut self) {
        self.step("step");
    }

    pub fn step_over(&mut self) {
        self.step("next");
    }

    pub fn step_out(&mut self) {
        self.step("finish");
    }

    fn step(&mut self, text: &str) {
        if self
            .state
            .flags
            .any(SessionState::APP_BUSY | SessionState::APP_NOT_STARTED)
        {
            return;
        }
        self.enqueue(Command::run(text), false);
    }

    /// Interrupt a running target.
    pub fn break_into(&mut self) {
        self.pause_target();
    }

    fn can_query(&self) -> bool {
        !self
            .state
            .flags
            .any(SessionState::APP_BUSY | SessionState::DEBUGGER_NOT_STARTED)
    }

    pub fn select_frame(&mut self, frame: u32) {
        if !self.can_query() {
            return;
        }

        // Not an info command: a resume puts us back on frame 0 anyway.
        if frame != self.state.current_frame {
            self.state.current_frame = frame;
            self.enqueue(Command::tagged(format!("frame {}", frame), Tag::Frame), false);
        }

        if self.state.flags.contains(SessionState::VIEWING_LOCALS)
            && self.state.frames_with_locals.insert(frame)
        {
            self.enqueue(Command::info("info local", Tag::Locals), false);
        }
    }

    /// Fetch the value behind a variable tree item.
    pub fn expand_item(&mut self, target: &InspectTarget) {
        if !self.can_query() {
            return;
        }
        let text = if target.is_pointer {
            format!("print *{}", target.expression)
        } else {
            format!("print {}", target.expression)
        };
        self.enqueue(Command::inspect(text, target.id, true), false);
    }

    /// Print a user-supplied expression on behalf of `item`.
    pub fn expand_user_item(&mut self, item: ItemId, request: &str) {
        if !self.can_query() || request.trim().is_empty() {
            return;
        }
        self.enqueue(Command::inspect(format!("print {}", request), item, false), false);
    }

    pub fn set_breakpoint(&mut self, set_command: &str, key: i64) {
        self.apply_breakpoint(BreakpointAction::Add {
            set_command: set_command.to_string(),
            key,
        });
    }

    pub fn clear_breakpoint(&mut self, clear_command: &str) {
        self.apply_breakpoint(BreakpointAction::Clear {
            clear_command: clear_command.to_string(),
        });
    }

    pub fn modify_breakpoint(&mut self, change: BreakpointChange) {
        self.apply_breakpoint(BreakpointAction::Modify(change));
    }

    /// Push one breakpoint list change to gdb, interrupting a running
    /// target if forcing is enabled.
    pub fn apply_breakpoint(&mut self, action: BreakpointAction) {
        if let BreakpointAction::Modify(change) = &action {
            if change.dbg_id.is_none() {
                return;
            }
        }

        self.with_forced_stop(|this| match action {
            BreakpointAction::Add { set_command, key } => {
                this.enqueue(Command::set_breakpoint(set_command, key), false);
            }
            BreakpointAction::Clear { clear_command } => {
                this.enqueue(Command::set(clear_command), false);
                // gdb doesn't report deletions, so always refresh the list.
                this.enqueue(Command::tagged("info breakpoints", Tag::BreakpointList), false);
            }
            BreakpointAction::Modify(change) => {
                let Some(id) = change.dbg_id else {
                    return;
                };
                let mut lines = Vec::new();
                if let Some(condition) = &change.condition {
                    lines.push(format!("condition {} {}", id, condition));
                }
                if let Some(count) = change.ignore_count {
                    lines.push(format!("ignore {} {}", id, count));
                }
                if let Some(enabled) = change.enabled {
                    let verb = if enabled { "enable" } else { "disable" };
                    lines.push(format!("{} {}", verb, id));
                }
                if !lines.is_empty() {
                    this.enqueue(Command::multi_line(lines, CommandClass::Set), false);
                }
                this.enqueue(Command::tagged("info breakpoints", Tag::BreakpointList), false);
            }
        });
    }

    pub fn clear_all_breakpoints(&mut self) {
        self.with_forced_stop(|this| {
            this.enqueue(Command::set("delete"), false);
            this.enqueue(Command::tagged("info breakpoints", Tag::BreakpointList), false);
        });
    }

    pub fn disassemble(&mut self, start: &str, end: &str) {
        if !self.can_query() {
            return;
        }
        let text = format!("disassemble {} {}", start, end);
        self.enqueue(Command::info(text.trim_end(), Tag::Disassemble), false);
    }

    /// Dump `amount` bytes starting at `address`.
    pub fn memory_dump(&mut self, address: &str, amount: &str) {
        if !self.can_query() {
            return;
        }
        let text = format!("x/{}b {}", amount, address);
        self.enqueue(Command::info(text, Tag::MemoryDump), false);
    }

    pub fn registers(&mut self) {
        if !self.can_query() {
            return;
        }
        self.enqueue(Command::info("info all-registers", Tag::Registers), false);
    }

    pub fn libraries(&mut self) {
        if !self.can_query() {
            return;
        }
        self.enqueue(Command::info("info sharedlibrary", Tag::Libraries), false);
    }

    /// Turn locals tracking on or off and re-target `frame`.
    pub fn set_locals_view_enabled(&mut self, enabled: bool, frame: u32) {
        if enabled {
            self.state.flags.insert(SessionState::VIEWING_LOCALS);
        } else {
            self.state.flags.remove(SessionState::VIEWING_LOCALS);
        }
        self.status(if enabled { "<Locals ON>" } else { "<Locals OFF>" });
        self.select_frame(frame);
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn status(&self, message: &str) {
        debug!("Status {}{}", self.state.flags, message);
        self.emit(DebugEvent::StatusChanged {
            message: message.to_string(),
            state: self.state.flags,
        });
    }

    fn emit(&self, event: DebugEvent) {
        // Nobody listening is not an error for the session.
        let _ = self.events.send(event);
    }
}

impl Drop for GdbController {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
        }
    }
}

fn static_members_command(options: &DebugOptions) -> String {
    format!(
        "set print static-members {}",
        on_off(options.display_static_members)
    )
}

fn asm_demangle_command(options: &DebugOptions) -> String {
    format!("set print asm-demangle {}", on_off(options.asm_demangle))
}

fn solib_stop_command(options: &DebugOptions) -> String {
    format!(
        "set stop-on-solib-events {}",
        if options.break_on_loading_library { 1 } else { 0 }
    )
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::testing::{drain, significant, FakeLauncher, Recorder, FAKE_TTY};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Harness {
        ctl: GdbController,
        recorder: Rc<RefCell<Recorder>>,
        events: mpsc::UnboundedReceiver<DebugEvent>,
    }

    impl Harness {
        fn new(config: ControllerConfig) -> Self {
            let recorder = Rc::new(RefCell::new(Recorder::default()));
            let (tx, events) = mpsc::unbounded_channel();
            let ctl = GdbController::new(config, Box::new(FakeLauncher(Rc::clone(&recorder))), tx);
            Self {
                ctl,
                recorder,
                events,
            }
        }

        /// A started session with every setup command written.
        fn idle() -> Self {
            let mut h = Self::new(ControllerConfig::default());
            h.ctl.start("/tmp/demo", "").unwrap();
            h.settle();
            h.events();
            h
        }

        /// A running target whose `run` write is confirmed.
        fn busy() -> Self {
            let mut h = Self::idle();
            h.ctl.run();
            h.settle();
            assert!(h.ctl.state().contains(SessionState::APP_BUSY));
            h.events();
            h
        }

        fn settle(&mut self) {
            while self.ctl.state().contains(SessionState::WAITING_FOR_WRITE) {
                self.ctl.handle_process_event(ProcessEvent::WriteComplete);
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            self.ctl
                .handle_process_event(ProcessEvent::Stdout(bytes.to_vec()));
        }

        fn events(&mut self) -> Vec<DebugEvent> {
            significant(drain(&mut self.events))
        }

        fn last_write(&self) -> String {
            self.recorder.borrow().last_write().to_string()
        }

        fn writes(&self) -> Vec<String> {
            self.recorder.borrow().writes.clone()
        }

        fn queued_texts(&self) -> Vec<String> {
            self.ctl
                .state
                .queue
                .iter()
                .map(|cmd| cmd.text().to_string())
                .collect()
        }
    }

    #[test]
    fn test_start_sends_setup_commands() {
        let mut config = ControllerConfig::default();
        config.inferior_tty = Some("/dev/pts/4".to_string());
        let mut h = Harness::new(config);
        assert_eq!(h.ctl.phase(), SessionPhase::NotStarted);

        h.ctl.start("/tmp/demo", "-v input.txt").unwrap();
        assert_eq!(h.ctl.phase(), SessionPhase::Initializing);
        assert_eq!(h.events(), vec![DebugEvent::RequestPendingBreakpoints]);
        h.settle();

        assert_eq!(
            h.recorder.borrow().launches,
            vec![(
                "gdb".to_string(),
                vec!["-fullname".to_string(), "-nx".to_string(), "-quiet".to_string()]
            )]
        );
        assert_eq!(
            h.writes(),
            vec![
                "set prompt \u{1a}i\n",
                "set confirm off\n",
                "set print static-members off\n",
                "tty /dev/pts/4\n",
                "set args -v input.txt\n",
                "file /tmp/demo\n",
                "set width 0\n",
                "set height 0\n",
                "set stop-on-solib-events 1\n",
                "set print asm-demangle on\n",
            ]
        );
        assert_eq!(h.ctl.phase(), SessionPhase::Idle);
        assert_eq!(h.recorder.borrow().terminals_opened, 0);
        assert!(matches!(
            h.ctl.start("/tmp/demo", ""),
            Err(GdbError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_debuggee_gets_own_terminal() {
        let mut h = Harness::idle();
        assert_eq!(h.recorder.borrow().terminals_opened, 1);
        assert!(h.writes().contains(&format!("tty {}\n", FAKE_TTY)));

        h.ctl.run();
        h.settle();
        let writes = h.writes().len();
        h.events();

        h.ctl.handle_process_event(ProcessEvent::InferiorOutput(
            b"hello from the target program\n".to_vec(),
        ));
        assert_eq!(h.ctl.phase(), SessionPhase::Busy);
        assert_eq!(h.writes().len(), writes);
        assert_eq!(
            h.events(),
            vec![DebugEvent::InferiorOutput {
                text: "hello from the target program\n".to_string()
            }]
        );
    }

    #[test]
    fn test_one_write_in_flight() {
        let mut h = Harness::new(ControllerConfig::default());
        h.ctl.start("/tmp/demo", "").unwrap();
        assert_eq!(h.writes().len(), 1);
        h.feed(b"GNU gdb (GDB) 14.2\n");
        assert_eq!(h.writes().len(), 1);
        h.ctl.handle_process_event(ProcessEvent::WriteComplete);
        assert_eq!(h.writes().len(), 2);
    }

    #[test]
    fn test_breakpoint_confirmed_by_tagged_reply() {
        let mut h = Harness::idle();
        h.ctl.set_breakpoint("break foo.c:10", 5);
        assert_eq!(
            h.last_write(),
            "set prompt \u{1a}S\nbreak foo.c:10\nset prompt \u{1a}i\n"
        );
        h.settle();
        assert!(h.ctl.current_command().is_some());

        h.feed(b"\x1aSBreakpoint 1 at foo.c:10\n\x1aS\x1ai");
        assert_eq!(
            h.events(),
            vec![DebugEvent::BreakpointConfirmed {
                key: 5,
                raw: "Breakpoint 1 at foo.c:10\n".to_string()
            }]
        );
        assert!(h.ctl.current_command().is_none());
        assert_eq!(h.ctl.queued(), 0);
    }

    #[test]
    fn test_negative_breakpoint_key_not_reported() {
        let mut h = Harness::idle();
        h.ctl.set_breakpoint("break _start", -1);
        h.settle();
        h.feed(b"\x1aSBreakpoint 2 at 0x1000\n\x1aS\x1ai");
        assert!(h.events().is_empty());
        assert!(h.ctl.current_command().is_none());
    }

    #[test]
    fn test_step_ignored_while_busy() {
        let mut h = Harness::busy();
        let before = h.queued_texts();
        let writes = h.writes().len();
        h.ctl.step_into();
        h.ctl.step_over();
        h.ctl.registers();
        assert_eq!(h.queued_texts(), before);
        assert_eq!(h.writes().len(), writes);
    }

    #[test]
    fn test_step_needs_started_app() {
        let mut h = Harness::idle();
        h.ctl.step_out();
        assert!(h.queued_texts().is_empty());
        assert_eq!(h.writes().len(), 9);
    }

    #[test]
    fn test_nothing_sent_before_start() {
        let mut h = Harness::new(ControllerConfig::default());
        h.ctl.run();
        h.ctl.registers();
        h.ctl.set_breakpoint("break main", 1);
        assert!(h.writes().is_empty());
        assert!(h.queued_texts().is_empty());
    }

    #[test]
    fn test_run_then_continue() {
        let mut h = Harness::idle();
        h.ctl.run();
        assert_eq!(h.last_write(), "run\n");
        assert!(!h.ctl.state().contains(SessionState::APP_NOT_STARTED));
        assert_eq!(h.ctl.phase(), SessionPhase::Busy);
        h.settle();

        h.feed(b"Breakpoint 1, main () at demo.c:10\n");
        h.feed(b"\x1a\x1a/tmp/demo.c:10:120:beg:0x1139\n");
        assert!(!h.ctl.state().contains(SessionState::APP_BUSY));
        assert_eq!(
            h.events(),
            vec![
                DebugEvent::ProgramPaused {
                    reason: String::new()
                },
                DebugEvent::RequestPendingBreakpoints,
                DebugEvent::ShowStepInSource {
                    file: Some("/tmp/demo.c".to_string()),
                    line: Some(10)
                },
            ]
        );
        assert_eq!(
            h.last_write(),
            "set prompt \u{1a}K\nbacktrace\nset prompt \u{1a}i\n"
        );
        h.settle();
        h.feed(b"\x1aK#0  main () at demo.c:10\n\x1aK\x1ai");
        assert_eq!(
            h.events(),
            vec![DebugEvent::Backtrace {
                frame: 0,
                raw: "#0  main () at demo.c:10\n".to_string(),
                trim_excess_frames: true
            }]
        );

        // The `Breakpoint 1, ...` line asked for a fresh list.
        assert!(h.last_write().contains("\ninfo breakpoints\n"));
        h.settle();
        h.feed(b"\x1aBNum     Type           Disp Enb Address\n\x1aB\x1ai");
        assert!(matches!(
            h.events().as_slice(),
            [DebugEvent::BreakpointList { .. }]
        ));

        h.ctl.run();
        assert_eq!(h.last_write(), "continue\n");
    }

    #[test]
    fn test_program_exit_resets_state() {
        let mut h = Harness::idle();
        h.ctl.run();
        // Leave the write unconfirmed so queued work stays queued.
        h.ctl.set_breakpoint("break foo.c:20", 2);
        assert_eq!(h.queued_texts(), vec!["break foo.c:20", "continue"]);
        assert!(h.ctl.current_command().is_some());
        h.events();

        h.feed(b"Program exited normally.\n");
        assert!(h.queued_texts().is_empty());
        assert!(h.ctl.current_command().is_none());
        assert_eq!(
            h.events(),
            vec![DebugEvent::ProgramExited {
                message: "Program exited normally.".to_string()
            }]
        );

        h.settle();
        assert_eq!(
            h.ctl.state(),
            SessionState::APP_NOT_STARTED | SessionState::PROGRAM_EXITED
        );
        assert_eq!(h.ctl.phase(), SessionPhase::Exited);
    }

    #[test]
    fn test_inferior_exit_notice_ends_run() {
        let mut h = Harness::busy();
        h.feed(b"[Inferior 1 (process 4242) exited normally]\n");
        assert_eq!(h.ctl.phase(), SessionPhase::Exited);
        assert_eq!(
            h.events(),
            vec![DebugEvent::ProgramExited {
                message: "[Inferior 1 (process 4242) exited normally]".to_string()
            }]
        );

        h.ctl.run();
        assert_eq!(h.last_write(), "run\n");
        assert_eq!(h.ctl.phase(), SessionPhase::Busy);
    }

    #[test]
    fn test_fatal_signal_destroys_queue_and_pauses() {
        let mut h = Harness::idle();
        h.ctl.run();
        // Leave the write unconfirmed so queued work stays queued.
        h.ctl.set_breakpoint("break foo.c:20", 2);
        assert_eq!(h.queued_texts(), vec!["break foo.c:20", "continue"]);
        h.events();

        h.feed(b"Program received signal SIGSEGV, Segmentation fault.\n");
        assert!(!h.ctl.state().contains(SessionState::APP_BUSY));
        assert_eq!(h.queued_texts(), vec!["backtrace"]);
        assert_eq!(
            h.events(),
            vec![
                DebugEvent::ProgramPaused {
                    reason: "Program received signal SIGSEGV, Segmentation fault.".to_string()
                },
                DebugEvent::RequestPendingBreakpoints,
            ]
        );
    }

    #[test]
    fn test_silent_break_swallows_stop() {
        let mut h = Harness::busy();
        h.ctl.set_breakpoint("break foo.c:30", 7);
        assert_eq!(h.recorder.borrow().interrupts, 1);
        assert!(h.ctl.state().contains(SessionState::SILENT_BREAK_INTO));
        assert_eq!(h.queued_texts(), vec!["break foo.c:30", "continue"]);

        h.feed(b"Program received signal SIGINT, Interrupt.\n");
        assert!(h.ctl.state().contains(SessionState::APP_BUSY));
        h.feed(b"42\tfoo.c\n");
        let state = h.ctl.state();
        assert!(!state.contains(SessionState::APP_BUSY));
        assert!(state.contains(SessionState::SILENT_BREAK_INTO));
        assert!(h.events().is_empty());
        assert_eq!(
            h.last_write(),
            "set prompt \u{1a}S\nbreak foo.c:30\nset prompt \u{1a}i\n"
        );

        h.settle();
        h.feed(b"\x1aSBreakpoint 3 at foo.c:30\n\x1aS\x1ai");
        assert_eq!(h.last_write(), "continue\n");
        let state = h.ctl.state();
        assert!(state.contains(SessionState::APP_BUSY));
        assert!(!state.contains(SessionState::SILENT_BREAK_INTO));
        assert_eq!(
            h.events(),
            vec![DebugEvent::BreakpointConfirmed {
                key: 7,
                raw: "Breakpoint 3 at foo.c:30\n".to_string()
            }]
        );
    }

    #[test]
    fn test_second_forced_edit_reuses_silent_break() {
        let mut h = Harness::busy();
        h.ctl.set_breakpoint("break a.c:1", 1);
        h.ctl.clear_breakpoint("clear b.c:2");
        assert_eq!(h.recorder.borrow().interrupts, 1);
        assert_eq!(
            h.queued_texts(),
            vec!["break a.c:1", "clear b.c:2", "info breakpoints", "continue"]
        );
    }

    #[test]
    fn test_busy_edit_ignored_without_forcing() {
        let mut config = ControllerConfig::default();
        config.options.force_breakpoint_set = false;
        let mut h = Harness::new(config);
        h.ctl.start("/tmp/demo", "").unwrap();
        h.settle();
        h.ctl.run();
        h.settle();

        h.ctl.clear_all_breakpoints();
        assert!(h.queued_texts().is_empty());
        assert_eq!(h.recorder.borrow().interrupts, 0);
    }

    #[test]
    fn test_modify_breakpoint() {
        let mut h = Harness::idle();
        h.ctl.modify_breakpoint(BreakpointChange {
            dbg_id: None,
            condition: Some("x > 1".to_string()),
            ..Default::default()
        });
        assert_eq!(h.writes().len(), 9);

        h.ctl.run();
        h.ctl.modify_breakpoint(BreakpointChange {
            dbg_id: Some(4),
            condition: Some("x > 1".to_string()),
            ignore_count: Some(3),
            enabled: Some(false),
        });
        assert_eq!(
            h.queued_texts(),
            vec![
                "condition 4 x > 1; ignore 4 3; disable 4",
                "info breakpoints",
                "continue"
            ]
        );
    }

    #[test]
    fn test_breakpoint_edit_lines_written_one_at_a_time() {
        let mut h = Harness::idle();
        h.ctl.modify_breakpoint(BreakpointChange {
            dbg_id: Some(2),
            ignore_count: Some(5),
            enabled: Some(true),
            ..Default::default()
        });
        assert_eq!(h.last_write(), "ignore 2 5\n");
        h.ctl.handle_process_event(ProcessEvent::WriteComplete);
        assert_eq!(h.last_write(), "enable 2\n");
        h.ctl.handle_process_event(ProcessEvent::WriteComplete);
        assert!(h.last_write().contains("\ninfo breakpoints\n"));
    }

    #[test]
    fn test_stale_library_breakpoint_after_exit() {
        let mut h = Harness::busy();
        h.feed(b"Program exited normally.\n");
        h.ctl.run();
        assert_eq!(h.last_write(), "run\n");
        h.events();

        h.feed(b"Cannot insert breakpoint 3.\n");
        assert_eq!(
            h.events(),
            vec![DebugEvent::UnableToSetBreakpoint { id: 3 }]
        );
        assert_eq!(
            h.queued_texts(),
            vec!["delete 3", "info breakpoints", "continue"]
        );
    }

    #[test]
    fn test_watchpoint_out_of_scope() {
        let mut h = Harness::idle();
        h.ctl.run();
        h.events();
        h.feed(b"Watchpoint 2 deleted because the program has left the block in\n");
        assert_eq!(
            h.queued_texts(),
            vec!["backtrace", "delete 2", "info breakpoints"]
        );
        assert!(matches!(
            h.events().first(),
            Some(DebugEvent::ProgramPaused { .. })
        ));
    }

    #[test]
    fn test_shared_library_stop_resumes() {
        let mut h = Harness::busy();
        h.feed(b"Stopped due to shared library event\n");
        assert_eq!(h.events(), vec![DebugEvent::RequestPendingBreakpoints]);
        assert_eq!(h.last_write(), "continue\n");
        assert!(h.ctl.state().contains(SessionState::APP_BUSY));
    }

    #[test]
    fn test_running_chatter_is_not_a_stop() {
        let mut h = Harness::busy();
        h.feed(b"Continuing.\n[New Thread 0x7ffff7d86640 (LWP 4242)]\n");
        assert!(h.ctl.state().contains(SessionState::APP_BUSY));
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_locals_follow_frames() {
        let mut h = Harness::idle();
        h.ctl.set_locals_view_enabled(true, 0);
        assert!(h.ctl.state().contains(SessionState::VIEWING_LOCALS));
        // Already on frame 0: only the locals are fetched.
        assert_eq!(
            h.last_write(),
            "set prompt \u{1a}L\ninfo local\nset prompt \u{1a}i\n"
        );
        h.settle();
        h.feed(b"\x1aLx = 1\n\x1aL\x1ai");
        assert_eq!(
            h.events(),
            vec![DebugEvent::Locals {
                frame: 0,
                raw: "x = 1\n".to_string(),
                trim: TrimScope::WholeTree
            }]
        );

        h.ctl.select_frame(1);
        assert_eq!(h.ctl.current_frame(), 1);
        h.settle();
        h.feed(b"\x1aF#1  0x1180 in run (n=3) at demo.c:4\n\x1a\x1a/tmp/demo.c:4:40:beg:0x1180\n\x1aF\x1ai");
        h.settle();
        h.feed(b"\x1aLn = 3\n\x1aL\x1ai");
        let events = h.events();
        assert!(events.contains(&DebugEvent::ShowStepInSource {
            file: Some("/tmp/demo.c".to_string()),
            line: Some(4)
        }));
        assert!(events.contains(&DebugEvent::Locals {
            frame: 1,
            raw: "n = 3\n".to_string(),
            trim: TrimScope::Frame
        }));

        // Same frame, locals already known: nothing to ask gdb.
        let writes = h.writes().len();
        h.ctl.select_frame(1);
        h.ctl.set_locals_view_enabled(true, 1);
        assert_eq!(h.writes().len(), writes);
        assert!(h.queued_texts().is_empty());

        h.ctl.select_frame(2);
        assert_eq!(
            h.last_write(),
            "set prompt \u{1a}F\nframe 2\nset prompt \u{1a}i\n"
        );
        assert_eq!(h.queued_texts(), vec!["info local"]);
        h.settle();
        h.feed(b"\x1aF#2  0x1200 in start ()\n\x1aF\x1ai");
        assert!(h.events().contains(&DebugEvent::ShowStepInSource {
            file: None,
            line: None
        }));
    }

    #[test]
    fn test_pause_queues_locals_when_viewing() {
        let mut h = Harness::idle();
        h.ctl.state.flags.insert(SessionState::VIEWING_LOCALS);
        h.ctl.run();
        h.feed(b"\x1a\x1a/tmp/demo.c:12:140:beg:0x1150\n");
        assert_eq!(h.queued_texts(), vec!["backtrace", "info local"]);
    }

    #[test]
    fn test_inspect_requests() {
        let mut h = Harness::idle();
        h.ctl.expand_item(&InspectTarget {
            id: ItemId(9),
            expression: "list->head".to_string(),
            is_pointer: true,
        });
        assert_eq!(
            h.last_write(),
            "set prompt \u{1a}D\nprint *list->head\nset prompt \u{1a}i\n"
        );
        h.settle();
        h.feed(b"\x1aD$1 = {value = 3, next = 0x0}\n\x1aD\x1ai");
        assert_eq!(
            h.events(),
            vec![DebugEvent::RequestedData {
                item: ItemId(9),
                raw: "$1 = {value = 3, next = 0x0}\n".to_string()
            }]
        );

        h.ctl.expand_user_item(ItemId(10), "   ");
        assert_eq!(h.ctl.queued(), 0);
        assert!(h.ctl.current_command().is_none());
        h.ctl.expand_user_item(ItemId(10), "sizeof(int)");
        assert!(h.last_write().contains("\nprint sizeof(int)\n"));
    }

    #[test]
    fn test_queries_use_their_tags() {
        let mut h = Harness::idle();
        h.ctl.disassemble("0x1000", "0x1040");
        h.ctl.memory_dump("&buf", "16");
        h.ctl.registers();
        h.ctl.libraries();
        h.ctl.run_until("demo.c", 30);
        // The run purges the queued queries behind the disassembly in flight.
        assert_eq!(h.queued_texts(), vec!["until demo.c:30"]);
        assert!(h.last_write().contains("\ndisassemble 0x1000 0x1040\n"));

        h.settle();
        h.feed(b"\x1adDump of assembler code\n\x1ad\x1ai");
        assert_eq!(
            h.events(),
            vec![DebugEvent::Disassembly {
                raw: "Dump of assembler code\n".to_string()
            }]
        );
        assert_eq!(h.last_write(), "until demo.c:30\n");
    }

    #[test]
    fn test_events_independent_of_chunking() {
        let stream: &[u8] = b"Breakpoint 1, main () at demo.c:10\n\
            \x1a\x1a/tmp/demo.c:10:120:beg:0x1139\n\
            \x1aK#0  main () at demo.c:10\n\x1aK\x1ai\
            Program exited with code 01.\n";

        fn run_chunks(chunks: &[&[u8]]) -> (Vec<DebugEvent>, SessionState) {
            let mut h = Harness::idle();
            // Unconfirmed: nothing is dispatched while the chunks arrive.
            h.ctl.run();
            h.events();
            for chunk in chunks {
                h.feed(chunk);
            }
            (h.events(), h.ctl.state())
        }

        let whole = run_chunks(&[stream]);
        assert_eq!(whole.0.len(), 5);
        for split in 0..=stream.len() {
            let (a, b) = stream.split_at(split);
            assert_eq!(run_chunks(&[a, b]), whole, "split at {}", split);
        }
    }

    #[test]
    fn test_no_symbols_notice_is_status_only() {
        let mut h = Harness::idle();
        h.feed(b"(no debugging symbols found)...");
        let events = drain(&mut h.events);
        assert!(events.contains(&DebugEvent::StatusChanged {
            message: "(no debugging symbols found)...".to_string(),
            state: h.ctl.state()
        }));
        assert!(significant(events).is_empty());
    }

    #[test]
    fn test_reconfigure_while_busy() {
        let mut h = Harness::busy();
        let options = DebugOptions {
            display_static_members: true,
            ..DebugOptions::default()
        };
        h.ctl.reconfigure(options.clone());
        assert_eq!(h.ctl.config().options, options);
        assert_eq!(h.recorder.borrow().interrupts, 1);
        assert_eq!(
            h.queued_texts(),
            vec!["set print static-members on", "continue"]
        );

        // Unchanged options send nothing.
        h.ctl.reconfigure(options);
        assert_eq!(h.queued_texts().len(), 2);
    }

    #[test]
    fn test_process_exit_terminates_session() {
        let mut h = Harness::idle();
        h.ctl.run();
        h.ctl.set_breakpoint("break foo.c:20", 2);
        assert_eq!(h.ctl.queued(), 2);
        h.events();

        h.ctl
            .handle_process_event(ProcessEvent::Exited { code: Some(1) });
        assert_eq!(h.ctl.phase(), SessionPhase::Terminated);
        assert!(h.ctl.state().contains(SessionState::DEBUGGER_NOT_STARTED));
        assert_eq!(h.events(), vec![DebugEvent::ProcessExited { code: Some(1) }]);
        assert!(h.queued_texts().is_empty());
        assert!(h.ctl.current_command().is_none());
        h.ctl.run();
        assert_eq!(h.ctl.queued(), 0);
    }

    #[test]
    fn test_shutdown_quits_then_kills() {
        let mut h = Harness::busy();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ProcessEvent::WriteComplete).unwrap();

        tokio_test::block_on(h.ctl.shutdown(&mut rx));

        let recorder = h.recorder.borrow();
        assert_eq!(recorder.last_write(), "quit\n");
        assert_eq!(recorder.interrupts, 1);
        assert_eq!(recorder.kills, 1);
        drop(recorder);
        assert_eq!(h.ctl.phase(), SessionPhase::Terminated);
    }

    #[test]
    fn test_shutdown_gives_up_after_timeout() {
        let mut config = ControllerConfig::default();
        config.shutdown_timeout_ms = 30;
        config.shutdown_poll_ms = 10;
        let mut h = Harness::new(config);
        h.ctl.start("/tmp/demo", "").unwrap();
        h.settle();
        let (_tx, mut rx) = mpsc::unbounded_channel();

        tokio_test::block_on(h.ctl.shutdown(&mut rx));

        assert_eq!(h.recorder.borrow().kills, 1);
        assert_eq!(h.recorder.borrow().interrupts, 0);
    }
}
