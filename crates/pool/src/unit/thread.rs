//! Thread-backed execution units
//!
//! Every unit owns a dedicated OS thread with its own current-thread tokio
//! runtime, so a unit that blocks never starves the coordinator or its
//! siblings. Stopping a unit cancels the task at its next await point. A
//! purely CPU-bound task cannot be interrupted; its thread is detached and
//! exits once the task returns. Use [`ProcessUnitFactory`](super::ProcessUnitFactory)
//! when tasks may spin forever.

use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{ExecutionUnit, UnitFactory, UnitId, UnitMessage};
use crate::bootstrap::Bootstrap;
use crate::error::UnitError;

/// Spawns [`ThreadUnit`]s
#[derive(Debug, Clone, Default)]
pub struct ThreadUnitFactory {
    stack_size: Option<usize>,
}

impl ThreadUnitFactory {
    /// Create a factory with platform default thread settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stack size of unit threads
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl UnitFactory for ThreadUnitFactory {
    fn spawn(&self, bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        let id = UnitId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut builder = std::thread::Builder::new().name(format!("{}-{}", bootstrap.task(), id));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let bootstrap = bootstrap.clone();
        let token = cancel.clone();
        let thread = builder
            .spawn(move || run_unit(id, bootstrap, rx, token))
            .map_err(|e| UnitError::Spawn(e.to_string()))?;

        debug!(unit = %id, "Thread unit started");

        Ok(Box::new(ThreadUnit {
            id,
            tx: Some(tx),
            cancel,
            thread: Some(thread),
        }))
    }
}

/// Execution unit running on a dedicated thread
#[derive(Debug)]
pub struct ThreadUnit {
    id: UnitId,
    tx: Option<mpsc::UnboundedSender<UnitMessage>>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionUnit for ThreadUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn send(&mut self, message: UnitMessage) -> Result<(), UnitError> {
        let tx = self.tx.as_ref().ok_or(UnitError::Disconnected)?;
        tx.send(message).map_err(|_| UnitError::Disconnected)
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.tx = None;
        // Detached: a task stuck in CPU-bound code keeps the thread until it returns
        self.thread = None;
    }

    fn is_alive(&mut self) -> bool {
        self.tx.is_some()
            && !self.cancel.is_cancelled()
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ThreadUnit {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn run_unit(
    id: UnitId,
    bootstrap: Bootstrap,
    mut rx: mpsc::UnboundedReceiver<UnitMessage>,
    cancel: CancellationToken,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(unit = %id, error = %e, "Failed to build unit runtime");
            return;
        }
    };

    runtime.block_on(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let UnitMessage { envelope, reply } = message;
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = bootstrap.execute(envelope) => {
                    // The pool may have given up on this message already
                    let _ = reply.send(outcome);
                }
            }
        }
    });

    debug!(unit = %id, "Thread unit exited");
}
