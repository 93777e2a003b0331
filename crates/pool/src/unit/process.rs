//! Process-backed execution units
//!
//! Each unit is a child process running the bootstrap over stdio
//! ([`serve_stdio`](crate::bootstrap::serve_stdio)): one JSON envelope per
//! line in, one JSON reply per line out. Unlike threads, a child can be
//! killed at any moment, so runaway tasks are really stopped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{ExecutionUnit, UnitFactory, UnitId, UnitMessage};
use crate::bootstrap::{Bootstrap, UnitReply, ENV_TASK, ENV_UNIT};
use crate::error::{TaskError, UnitError};

/// Reply slot shared between the unit handle and its stdout reader
#[derive(Debug, Default)]
struct ReplySlot {
    reply: Option<oneshot::Sender<UnitReply>>,
    closed: bool,
}

type PendingReply = Arc<Mutex<ReplySlot>>;

/// Spawns [`ProcessUnit`]s from a program that serves the bootstrap
///
/// The program must call [`serve_stdio`](crate::bootstrap::serve_stdio) with a
/// registry containing the pool's task when
/// [`is_unit_process`](crate::bootstrap::is_unit_process) is true.
#[derive(Debug, Clone)]
pub struct ProcessUnitFactory {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessUnitFactory {
    /// Units run `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Units re-run the current executable
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Append a command line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several command line arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for unit processes
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl UnitFactory for ProcessUnitFactory {
    fn spawn(&self, bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UnitError::Spawn(format!("no tokio runtime: {e}")))?;
        let _guard = runtime.enter();

        let id = UnitId::next();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(ENV_UNIT, "1")
            .env(ENV_TASK, bootstrap.task())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UnitError::Spawn(format!("{}: {e}", self.program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UnitError::Spawn("unit stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UnitError::Spawn("unit stdout was not captured".to_string()))?;

        let pending: PendingReply = Arc::new(Mutex::new(ReplySlot::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        runtime.spawn(write_loop(id, stdin, rx));
        runtime.spawn(read_loop(id, stdout, Arc::clone(&pending)));

        debug!(unit = %id, pid = ?child.id(), program = %self.program.display(), "Process unit started");

        Ok(Box::new(ProcessUnit {
            id,
            child,
            tx: Some(tx),
            pending,
        }))
    }
}

/// Execution unit running in a child process
#[derive(Debug)]
pub struct ProcessUnit {
    id: UnitId,
    child: Child,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pending: PendingReply,
}

impl ExecutionUnit for ProcessUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn send(&mut self, message: UnitMessage) -> Result<(), UnitError> {
        let tx = self.tx.as_ref().ok_or(UnitError::Disconnected)?;

        let mut line = serde_json::to_vec(&message.envelope)
            .map_err(|e| UnitError::Io(std::io::Error::other(e)))?;
        line.push(b'\n');

        {
            let mut slot = self.pending.lock();
            if slot.closed {
                return Err(UnitError::Exited);
            }
            slot.reply = Some(message.reply);
        }
        if tx.send(line).is_err() {
            self.pending.lock().reply.take();
            return Err(UnitError::Disconnected);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.tx = None;
        if let Err(e) = self.child.start_kill() {
            debug!(unit = %self.id, error = %e, "Unit process already gone");
        }
        self.pending.lock().reply.take();
    }

    fn is_alive(&mut self) -> bool {
        self.tx.is_some() && matches!(self.child.try_wait(), Ok(None))
    }
}

async fn write_loop(id: UnitId, mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(&line).await {
            warn!(unit = %id, error = %e, "Failed to write to unit");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(unit = %id, error = %e, "Failed to flush unit stdin");
            break;
        }
    }
}

async fn read_loop(id: UnitId, stdout: ChildStdout, pending: PendingReply) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let reply = serde_json::from_str::<UnitReply>(&line).unwrap_or_else(|e| {
                    UnitReply::Failed(
                        TaskError::new(format!("malformed unit reply: {e}"))
                            .with_type("malformed_message"),
                    )
                });
                let sender = pending.lock().reply.take();
                match sender {
                    Some(sender) => {
                        let _ = sender.send(reply);
                    }
                    None => warn!(unit = %id, "Unit replied without a pending message"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(unit = %id, error = %e, "Failed to read from unit");
                break;
            }
        }
    }

    // Closing the reply channel tells the pool the unit is gone
    let mut slot = pending.lock();
    slot.closed = true;
    slot.reply.take();
    drop(slot);
    debug!(unit = %id, "Process unit output closed");
}
