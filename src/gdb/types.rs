//! Session state, protocol tags, structured events and configuration

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Marker byte that opens and closes a tagged block of gdb output.
pub const BLOCK_START: u8 = 0x1a;

/// One-byte tags placed after [`BLOCK_START`].
///
/// Blocks are produced by switching gdb's prompt to `<marker><tag>` around a
/// command, so the command's output arrives bracketed by the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// The resting prompt. Never paired.
    Idle,
    /// `\032\032file:line:...` emitted by `-fullname`; ends at a newline.
    SourcePosition,
    Frame,
    SetBreakpoint,
    Locals,
    DataRequest,
    BreakpointList,
    Backtrace,
    Disassemble,
    MemoryDump,
    Registers,
    Libraries,
}

impl Tag {
    pub fn byte(self) -> u8 {
        match self {
            Tag::Idle => b'i',
            Tag::SourcePosition => BLOCK_START,
            Tag::Frame => b'F',
            Tag::SetBreakpoint => b'S',
            Tag::Locals => b'L',
            Tag::DataRequest => b'D',
            Tag::BreakpointList => b'B',
            Tag::Backtrace => b'K',
            Tag::Disassemble => b'd',
            Tag::MemoryDump => b'M',
            Tag::Registers => b'r',
            Tag::Libraries => b'l',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        let tag = match byte {
            b'i' => Tag::Idle,
            BLOCK_START => Tag::SourcePosition,
            b'F' => Tag::Frame,
            b'S' => Tag::SetBreakpoint,
            b'L' => Tag::Locals,
            b'D' => Tag::DataRequest,
            b'B' => Tag::BreakpointList,
            b'K' => Tag::Backtrace,
            b'd' => Tag::Disassemble,
            b'M' => Tag::MemoryDump,
            b'r' => Tag::Registers,
            b'l' => Tag::Libraries,
            _ => return None,
        };
        Some(tag)
    }

    /// The prompt string gdb should print to mark this tag.
    pub fn prompt(self) -> String {
        let mut prompt = String::with_capacity(2);
        prompt.push(BLOCK_START as char);
        prompt.push(self.byte() as char);
        prompt
    }
}

/// Independent session flags combined into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionState(u16);

impl SessionState {
    pub const EMPTY: SessionState = SessionState(0);
    pub const DEBUGGER_NOT_STARTED: SessionState = SessionState(1 << 0);
    pub const APP_NOT_STARTED: SessionState = SessionState(1 << 1);
    /// The target is executing and cannot answer queries.
    pub const APP_BUSY: SessionState = SessionState(1 << 2);
    /// A write to gdb's stdin has not been confirmed yet.
    pub const WAITING_FOR_WRITE: SessionState = SessionState(1 << 3);
    pub const PROGRAM_EXITED: SessionState = SessionState(1 << 4);
    /// The controller interrupted the target for its own purposes.
    pub const SILENT_BREAK_INTO: SessionState = SessionState(1 << 5);
    pub const VIEWING_LOCALS: SessionState = SessionState(1 << 6);

    const NAMES: [(SessionState, &'static str); 7] = [
        (Self::DEBUGGER_NOT_STARTED, "dbg not started"),
        (Self::APP_NOT_STARTED, "app not started"),
        (Self::APP_BUSY, "app busy"),
        (Self::WAITING_FOR_WRITE, "wait for write"),
        (Self::PROGRAM_EXITED, "program exited"),
        (Self::SILENT_BREAK_INTO, "silent break into"),
        (Self::VIEWING_LOCALS, "viewing locals"),
    ];

    /// True when any flag in `flags` is set.
    pub fn any(self, flags: SessionState) -> bool {
        self.0 & flags.0 != 0
    }

    pub fn contains(self, flags: SessionState) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn insert(&mut self, flags: SessionState) {
        self.0 |= flags.0;
    }

    pub fn remove(&mut self, flags: SessionState) {
        self.0 &= !flags.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for SessionState {
    type Output = SessionState;

    fn bitor(self, rhs: SessionState) -> SessionState {
        SessionState(self.0 | rhs.0)
    }
}

impl BitAnd for SessionState {
    type Output = SessionState;

    fn bitand(self, rhs: SessionState) -> SessionState {
        SessionState(self.0 & rhs.0)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<program paused>");
        }
        for name in self.names() {
            write!(f, "<{}>", name)?;
        }
        Ok(())
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = self.names().collect();
        let mut seq = serializer.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

/// Composite lifecycle phase derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    NotStarted,
    Initializing,
    Idle,
    Busy,
    Exited,
    Terminated,
}

/// Host-side handle for an inspectable value in the variable tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

/// An item the user opened in the variable tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectTarget {
    pub id: ItemId,
    /// Fully qualified expression, e.g. `this->list.head`.
    pub expression: String,
    #[serde(default)]
    pub is_pointer: bool,
}

/// Pending edits to an existing breakpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointChange {
    /// gdb's number for the breakpoint; nothing is sent until gdb assigned one.
    #[serde(default)]
    pub dbg_id: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub ignore_count: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// What the breakpoint list wants done to one of its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum BreakpointAction {
    Add { set_command: String, key: i64 },
    Clear { clear_command: String },
    Modify(BreakpointChange),
}

/// Which part of the variable tree a fresh set of locals replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrimScope {
    /// Frame 0: everything not refreshed is stale.
    WholeTree,
    Frame,
}

/// Structured events produced for the surrounding UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DebugEvent {
    StatusChanged {
        message: String,
        state: SessionState,
    },
    ProgramPaused {
        reason: String,
    },
    /// `file`/`line` are `None` when gdb has no source for the position.
    ShowStepInSource {
        file: Option<String>,
        line: Option<u32>,
    },
    ProgramExited {
        message: String,
    },
    BreakpointConfirmed {
        key: i64,
        raw: String,
    },
    BreakpointList {
        raw: String,
    },
    UnableToSetBreakpoint {
        id: u32,
    },
    Backtrace {
        frame: u32,
        raw: String,
        trim_excess_frames: bool,
    },
    Locals {
        frame: u32,
        raw: String,
        trim: TrimScope,
    },
    RequestedData {
        item: ItemId,
        raw: String,
    },
    Disassembly {
        raw: String,
    },
    MemoryDump {
        raw: String,
    },
    Registers {
        raw: String,
    },
    Libraries {
        raw: String,
    },
    /// Text the debuggee wrote to its terminal.
    InferiorOutput {
        text: String,
    },
    /// The breakpoint list should push any breakpoints gdb doesn't know yet.
    RequestPendingBreakpoints,
    ProcessExited {
        code: Option<i32>,
    },
}

/// Debugger behaviour toggles that can change mid-session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    pub display_static_members: bool,
    pub asm_demangle: bool,
    pub break_on_loading_library: bool,
    /// Interrupt a running target to apply breakpoint edits.
    pub force_breakpoint_set: bool,
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            display_static_members: false,
            asm_demangle: true,
            break_on_loading_library: true,
            force_breakpoint_set: true,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub gdb_path: String,
    pub gdb_args: Vec<String>,
    /// Terminal for the debuggee. `None` opens a fresh pseudo-terminal.
    pub inferior_tty: Option<String>,
    pub options: DebugOptions,
    pub shutdown_timeout_ms: u64,
    pub shutdown_poll_ms: u64,
    pub initial_buffer_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdb_args: vec![
                "-fullname".to_string(),
                "-nx".to_string(),
                "-quiet".to_string(),
            ],
            inferior_tty: None,
            options: DebugOptions::default(),
            shutdown_timeout_ms: 5000,
            shutdown_poll_ms: 250,
            initial_buffer_capacity: 2048,
        }
    }
}
