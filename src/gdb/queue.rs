//! Pending command queue

use crate::gdb::command::Command;
use std::collections::VecDeque;
use tracing::debug;

/// FIFO of commands waiting to be sent, with head insertion for urgent work.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `cmd`. A run command first drops every queued info and run
    /// command, since their results would be stale once the target moves.
    pub fn push(&mut self, cmd: Command, urgent: bool) {
        if cmd.is_run_command() {
            self.purge_info_and_run();
        }
        debug!("Queueing{} command: {}", if urgent { " urgent" } else { "" }, cmd.text());
        if urgent {
            self.pending.push_front(cmd);
        } else {
            self.pending.push_back(cmd);
        }
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.pending.pop_front()
    }

    pub fn purge_info_and_run(&mut self) {
        self.purge(|cmd| cmd.is_info_command() || cmd.is_run_command());
    }

    /// Drop queued run commands, and info commands too when `include_info`.
    pub fn purge_for_pause(&mut self, include_info: bool) {
        self.purge(|cmd| cmd.is_run_command() || (include_info && cmd.is_info_command()));
    }

    fn purge(&mut self, mut doomed: impl FnMut(&Command) -> bool) {
        let before = self.pending.len();
        self.pending.retain(|cmd| !doomed(cmd));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!("Purged {} queued commands", dropped);
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.pending.iter()
    }
}
