//! In-memory process adapter for tests

use crate::gdb::error::Result;
use crate::gdb::process::{DebuggerProcess, ProcessLauncher};
use crate::gdb::types::DebugEvent;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc;

pub const FAKE_TTY: &str = "/dev/pts/9";

/// What the controller did to the fake subprocess.
#[derive(Debug, Default)]
pub struct Recorder {
    pub launches: Vec<(String, Vec<String>)>,
    pub writes: Vec<String>,
    pub interrupts: usize,
    pub kills: usize,
    pub terminals_opened: usize,
}

impl Recorder {
    pub fn last_write(&self) -> &str {
        self.writes.last().map(String::as_str).unwrap_or("")
    }
}

pub struct FakeLauncher(pub Rc<RefCell<Recorder>>);

impl ProcessLauncher for FakeLauncher {
    fn launch(&mut self, program: &str, args: &[String]) -> Result<Box<dyn DebuggerProcess>> {
        self.0
            .borrow_mut()
            .launches
            .push((program.to_string(), args.to_vec()));
        Ok(Box::new(FakeProcess(Rc::clone(&self.0))))
    }

    fn open_terminal(&mut self) -> Result<Option<String>> {
        self.0.borrow_mut().terminals_opened += 1;
        Ok(Some(FAKE_TTY.to_string()))
    }
}

pub struct FakeProcess(Rc<RefCell<Recorder>>);

impl DebuggerProcess for FakeProcess {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.0
            .borrow_mut()
            .writes
            .push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    fn interrupt(&mut self) -> Result<()> {
        self.0.borrow_mut().interrupts += 1;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.0.borrow_mut().kills += 1;
        Ok(())
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<DebugEvent>) -> Vec<DebugEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Events other than status-bar updates.
pub fn significant(events: Vec<DebugEvent>) -> Vec<DebugEvent> {
    events
        .into_iter()
        .filter(|e| !matches!(e, DebugEvent::StatusChanged { .. }))
        .collect()
}
