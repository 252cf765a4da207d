//! Classifier for untagged gdb output
//!
//! Lines that fall out of gdb outside any tagged block are sorted by their
//! leading text into the cases the controller reacts to.

use regex::Regex;
use tracing::debug;

/// Signals after which the target cannot meaningfully continue.
const FATAL_SIGNALS: &[&str] = &["SIGSEGV", "SIGBUS", "SIGFPE", "SIGILL", "SIGABRT"];

/// Lines gdb prints while the target keeps running. They must not be taken
/// for a stop.
const RUNNING_NOTICES: &[&str] = &[
    "Starting program",
    "Continuing.",
    "Run till exit",
    "Reading symbols",
    "Using host libthread_db",
    "[Thread ",
    "[New Thread",
    "[Inferior",
    "[Detaching",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    /// SIGINT, from us or from the user.
    Interrupt,
    Fatal,
    Other,
}

/// What an untagged line means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// `Program exited ...`, `Program terminated ...` or
    /// `[Inferior N (process P) exited ...]`
    ProgramExited,
    SignalReceived { signal: String, class: SignalClass },
    /// `Cannot insert breakpoint N.`
    BreakpointInsertFailed { id: Option<u32> },
    /// `Watchpoint N deleted because the program has left the block ...`
    WatchpointOutOfScope { id: Option<u32> },
    /// `Stopped due to shared library event`
    SharedLibraryStop,
    /// Anything else starting with `Brea`; the breakpoint list may be stale.
    BreakpointNotice,
    /// Starts with a digit: a position echo, with or without source.
    SourcePosition,
    /// Harmless chatter while the target runs.
    Running,
    /// Everything else is treated as a reason to refresh after a stop.
    Pause,
}

/// A file/line pair pulled out of a position echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: String,
    pub line: u32,
}

/// Line classifier
pub struct LineClassifier {
    signal_pattern: Regex,
    inferior_exit_pattern: Regex,
    cannot_insert_pattern: Regex,
    watchpoint_scope_pattern: Regex,
    source_position_pattern: Regex,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self {
            // Program received signal SIGSEGV, Segmentation fault.
            signal_pattern: Regex::new(r"^Program received signal (\w+)").unwrap(),
            // [Inferior 1 (process 4242) exited with code 01]
            inferior_exit_pattern: Regex::new(r"^\[Inferior \d+ \(.*\) exited").unwrap(),
            // Cannot insert breakpoint 3.
            cannot_insert_pattern: Regex::new(r"Cannot insert breakpoint (\d+)").unwrap(),
            // Watchpoint 2 deleted because the program has left the block in
            watchpoint_scope_pattern: Regex::new(
                r"^Watchpoint (\d+) deleted because the program has left the block",
            )
            .unwrap(),
            // /path/to/file.c:42:1234:beg:0x4005d0
            source_position_pattern: Regex::new(r"^([^:]+):(\d+):").unwrap(),
        }
    }

    /// Classify one untagged line.
    pub fn classify(&self, line: &str) -> LineKind {
        let kind = self.classify_inner(line);
        debug!("Classified {:?} as {:?}", line, kind);
        kind
    }

    fn classify_inner(&self, line: &str) -> LineKind {
        if line.starts_with("Program exited")
            || line.starts_with("Program terminated")
            || self.inferior_exit_pattern.is_match(line)
        {
            return LineKind::ProgramExited;
        }

        if let Some(caps) = self.signal_pattern.captures(line) {
            let signal = caps[1].to_string();
            let class = if signal == "SIGINT" {
                SignalClass::Interrupt
            } else if FATAL_SIGNALS.contains(&signal.as_str()) {
                SignalClass::Fatal
            } else {
                SignalClass::Other
            };
            return LineKind::SignalReceived { signal, class };
        }

        if line.starts_with("Cannot insert breakpoint") {
            let id = self
                .cannot_insert_pattern
                .captures(line)
                .and_then(|caps| caps[1].parse().ok());
            return LineKind::BreakpointInsertFailed { id };
        }

        if line.starts_with("Watchpoint") {
            if line.contains("deleted because the program has left the block") {
                let id = self
                    .watchpoint_scope_pattern
                    .captures(line)
                    .and_then(|caps| caps[1].parse().ok());
                return LineKind::WatchpointOutOfScope { id };
            }
            return LineKind::Pause;
        }

        if line.starts_with("Stopped due to shared library event") {
            return LineKind::SharedLibraryStop;
        }

        if line.starts_with("Brea") {
            return LineKind::BreakpointNotice;
        }

        if line.starts_with(|c: char| c.is_ascii_digit()) {
            return LineKind::SourcePosition;
        }

        if RUNNING_NOTICES.iter().any(|notice| line.starts_with(notice)) {
            return LineKind::Running;
        }

        LineKind::Pause
    }

    /// Pull `file:line` out of a position echo such as
    /// `/src/foo.c:42:1234:beg:0x4005d0`. A zero line number means no source.
    pub fn parse_source_position(&self, text: &str) -> Option<SourcePosition> {
        let caps = self.source_position_pattern.captures(text)?;
        let line: u32 = caps[2].parse().ok()?;
        if line == 0 {
            return None;
        }
        Some(SourcePosition {
            file: caps[1].to_string(),
            line,
        })
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}
