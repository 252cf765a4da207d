//! Debugger commands
//!
//! Each command knows the text it sends, how it interacts with queued work
//! (run and info classes) and which tagged block, if any, completes it.

use crate::gdb::types::{ItemId, Tag};
use std::collections::VecDeque;

/// How a command relates to target execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Starts or resumes the target.
    Run,
    /// Pure query; its answer goes stale once the target runs.
    Info,
    /// Changes debugger settings. Survives every purge.
    Set,
}

/// What the reply to a command must be tied back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Plain,
    /// A breakpoint set on behalf of the breakpoint list entry `key`.
    SetBreakpoint { key: i64 },
    /// A value fetched for a variable tree item.
    InspectItem { item: ItemId },
}

#[derive(Debug, Clone)]
pub struct Command {
    text: String,
    chunks: VecDeque<String>,
    class: CommandClass,
    completion_tag: Option<Tag>,
    kind: CommandKind,
}

impl Command {
    fn build(
        text: impl Into<String>,
        class: CommandClass,
        completion_tag: Option<Tag>,
        kind: CommandKind,
    ) -> Self {
        let text = text.into();
        let chunk = match completion_tag {
            Some(tag) => format!(
                "set prompt {}\n{}\nset prompt {}\n",
                tag.prompt(),
                text,
                Tag::Idle.prompt()
            ),
            None => format!("{}\n", text),
        };
        Self {
            text,
            chunks: VecDeque::from([chunk]),
            class,
            completion_tag,
            kind,
        }
    }

    /// `run`, `continue`, `step`...
    pub fn run(text: impl Into<String>) -> Self {
        Self::build(text, CommandClass::Run, None, CommandKind::Plain)
    }

    /// A settings command whose output is not collected.
    pub fn set(text: impl Into<String>) -> Self {
        Self::build(text, CommandClass::Set, None, CommandKind::Plain)
    }

    /// A non-info command whose output arrives as a tagged block.
    pub fn tagged(text: impl Into<String>, tag: Tag) -> Self {
        Self::build(text, CommandClass::Set, Some(tag), CommandKind::Plain)
    }

    pub fn info(text: impl Into<String>, tag: Tag) -> Self {
        Self::build(text, CommandClass::Info, Some(tag), CommandKind::Plain)
    }

    pub fn set_breakpoint(text: impl Into<String>, key: i64) -> Self {
        Self::build(
            text,
            CommandClass::Set,
            Some(Tag::SetBreakpoint),
            CommandKind::SetBreakpoint { key },
        )
    }

    /// `is_info` is false for user-driven requests, which must survive a resume.
    pub fn inspect(text: impl Into<String>, item: ItemId, is_info: bool) -> Self {
        let class = if is_info {
            CommandClass::Info
        } else {
            CommandClass::Set
        };
        Self::build(
            text,
            class,
            Some(Tag::DataRequest),
            CommandKind::InspectItem { item },
        )
    }

    /// A command sent as several writes, each confirmed before the next.
    pub fn multi_line<I, S>(lines: I, class: CommandClass) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: VecDeque<String> = lines
            .into_iter()
            .map(|line| format!("{}\n", line.into()))
            .collect();
        let text = chunks.iter().map(|c| c.trim_end()).collect::<Vec<_>>().join("; ");
        Self {
            text,
            chunks,
            class,
            completion_tag: None,
            kind: CommandKind::Plain,
        }
    }

    /// The bare command, without prompt wrapping.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn is_run_command(&self) -> bool {
        self.class == CommandClass::Run
    }

    pub fn is_info_command(&self) -> bool {
        self.class == CommandClass::Info
    }

    pub fn expects_reply(&self) -> bool {
        self.completion_tag.is_some()
    }

    /// True when the block tagged `tag` is this command's reply.
    pub fn completed_by(&self, tag: Tag) -> bool {
        self.completion_tag == Some(tag)
    }

    pub fn more_to_send(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn next_chunk(&mut self) -> Option<String> {
        self.chunks.pop_front()
    }
}
