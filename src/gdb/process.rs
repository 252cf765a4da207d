//! GDB process management
//!
//! The controller only sees the [`DebuggerProcess`] trait. The tokio-backed
//! implementation turns the subprocess into a stream of [`ProcessEvent`]s
//! that the host feeds back into the controller one at a time.
//!
//! The debuggee gets its own pseudo-terminal so that its output never mixes
//! with gdb's and it cannot read gdb's command input.

use crate::gdb::error::{GdbError, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, OpenptyResult};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{ttyname, Pid};
use std::fs::File;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::process::Stdio;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything the subprocess can tell the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Bytes the debuggee wrote to its terminal.
    InferiorOutput(Vec<u8>),
    /// The oldest outstanding write reached gdb's stdin.
    WriteComplete,
    Exited { code: Option<i32> },
}

/// A running debugger subprocess.
pub trait DebuggerProcess {
    /// Queue `bytes` for gdb's stdin; completion arrives as
    /// [`ProcessEvent::WriteComplete`].
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    /// SIGINT; gdb forwards it to the target.
    fn interrupt(&mut self) -> Result<()>;
    fn kill(&mut self) -> Result<()>;
}

/// Starts debugger subprocesses.
pub trait ProcessLauncher {
    fn launch(&mut self, program: &str, args: &[String]) -> Result<Box<dyn DebuggerProcess>>;
    /// Open a terminal for the debuggee. Returns the path gdb should hand
    /// to `tty`, or `None` when the debuggee should share gdb's streams.
    fn open_terminal(&mut self) -> Result<Option<String>>;
}

/// Launches gdb on the current tokio runtime.
pub struct TokioLauncher {
    events: mpsc::UnboundedSender<ProcessEvent>,
    /// Slave side of the debuggee terminal. Held open so the master does
    /// not hang up between runs of the debuggee.
    terminal: Option<File>,
}

impl TokioLauncher {
    /// Create a launcher and the receiver its processes report to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                terminal: None,
            },
            rx,
        )
    }
}

impl ProcessLauncher for TokioLauncher {
    fn launch(&mut self, program: &str, args: &[String]) -> Result<Box<dyn DebuggerProcess>> {
        info!("Starting GDB: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(GdbError::Launch)?;

        let pid = child.id().ok_or(GdbError::NoPid)?;
        let mut stdin = child.stdin.take().ok_or(GdbError::StdinClosed)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        debug!("GDB started with PID: {}", pid);

        if let Some(stdout) = stdout {
            tokio::spawn(read_loop(stdout, self.events.clone(), ProcessEvent::Stdout));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(read_loop(stderr, self.events.clone(), ProcessEvent::Stderr));
        }

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(bytes) = write_rx.recv().await {
                if let Err(e) = stdin.write_all(&bytes).await {
                    warn!("Error writing to GDB: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    warn!("Error flushing GDB stdin: {}", e);
                    break;
                }
                if events.send(ProcessEvent::WriteComplete).is_err() {
                    break;
                }
            }
            debug!("GDB writer stopped");
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Error waiting for GDB: {}", e);
                    None
                }
            };
            info!("GDB exited with {:?}", code);
            let _ = events.send(ProcessEvent::Exited { code });
        });

        Ok(Box::new(TokioProcess {
            pid: Pid::from_raw(pid as i32),
            stdin: write_tx,
        }))
    }

    fn open_terminal(&mut self) -> Result<Option<String>> {
        let OpenptyResult { master, slave } = openpty(None, None)?;
        let path = ttyname(&slave)?;

        let master = File::from(master);
        set_nonblocking(&master)?;
        let master = AsyncFd::new(master).map_err(GdbError::Terminal)?;
        tokio::spawn(terminal_loop(master, self.events.clone()));

        // Replacing an older terminal hangs up its reader.
        self.terminal = Some(File::from(slave));

        let path = path.to_string_lossy().into_owned();
        info!("Debuggee terminal: {}", path);
        Ok(Some(path))
    }
}

fn set_nonblocking(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

async fn terminal_loop(master: AsyncFd<File>, events: mpsc::UnboundedSender<ProcessEvent>) {
    let mut buf = [0u8; 4096];
    loop {
        let mut guard = match master.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Debuggee terminal failed: {}", e);
                break;
            }
        };
        match guard.try_io(|inner| {
            let mut file: &File = inner.get_ref();
            file.read(&mut buf)
        }) {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                if events
                    .send(ProcessEvent::InferiorOutput(buf[..n].to_vec()))
                    .is_err()
                {
                    break;
                }
            }
            // EIO once every slave descriptor is closed.
            Ok(Err(e)) => {
                debug!("Debuggee terminal closed: {}", e);
                break;
            }
            Err(_would_block) => continue,
        }
    }
    debug!("Debuggee terminal reader stopped");
}

async fn read_loop<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(Vec<u8>) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if events.send(wrap(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading GDB output: {}", e);
                break;
            }
        }
    }
    debug!("GDB output reader stopped");
}

/// Handle to a gdb spawned by [`TokioLauncher`].
pub struct TokioProcess {
    pid: Pid,
    stdin: mpsc::UnboundedSender<Vec<u8>>,
}

impl DebuggerProcess for TokioProcess {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin
            .send(bytes.to_vec())
            .map_err(|_| GdbError::StdinClosed)
    }

    fn interrupt(&mut self) -> Result<()> {
        debug!("Sending SIGINT to GDB PID: {}", self.pid);
        kill(self.pid, Signal::SIGINT)?;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        debug!("Sending SIGKILL to GDB PID: {}", self.pid);
        kill(self.pid, Signal::SIGKILL)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cat_echoes_writes() {
        let (mut launcher, mut events) = TokioLauncher::new();
        let mut process = launcher.launch("cat", &[]).unwrap();
        process.write(b"hello\n").unwrap();

        let mut saw_write = false;
        let mut output = Vec::new();
        while !(saw_write && output.ends_with(b"hello\n")) {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for cat")
                .expect("event channel closed");
            match event {
                ProcessEvent::WriteComplete => saw_write = true,
                ProcessEvent::Stdout(bytes) => output.extend(bytes),
                other => panic!("unexpected event {:?}", other),
            }
        }

        process.kill().unwrap();
        loop {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for exit")
                .expect("event channel closed");
            if let ProcessEvent::Exited { code } = event {
                assert_eq!(code, None);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_terminal_forwards_debuggee_output() {
        let (mut launcher, mut events) = TokioLauncher::new();
        let path = launcher.open_terminal().unwrap().unwrap();
        assert!(path.starts_with("/dev/"));

        let mut debuggee = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        std::io::Write::write_all(&mut debuggee, b"hello\n").unwrap();

        let mut output = Vec::new();
        while !output.windows(5).any(|w| w == b"hello") {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for terminal output")
                .expect("event channel closed");
            match event {
                ProcessEvent::InferiorOutput(bytes) => output.extend(bytes),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_launch_missing_binary_fails() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let (mut launcher, _events) = TokioLauncher::new();
        let result = launcher.launch("/nonexistent/gdb-binary", &[]);
        assert!(matches!(result, Err(GdbError::Launch(_))));
    }
}
