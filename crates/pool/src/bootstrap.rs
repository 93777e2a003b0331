//! Unit bootstrap
//!
//! A [`Bootstrap`] is everything an execution unit needs to serve one task:
//! receive a message holding an argument list, invoke the task with those
//! arguments (awaiting it if it is asynchronous), and send the single result
//! value back. Thread units call [`Bootstrap::execute`] directly; process
//! units run [`serve_stdio`] and exchange JSON lines with the pool.
//!
//! Generating a bootstrap never validates the task. An identifier missing
//! from the registry only fails once a unit tries to run it, and comes back
//! as an `unknown_task` failure.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::TaskError;
use crate::task::{TaskInput, TaskRegistry};

/// Set to `1` in the environment of a process unit
pub const ENV_UNIT: &str = "PARALLEL_WORKERS_UNIT";
/// Task identifier a process unit was spawned for
pub const ENV_TASK: &str = "PARALLEL_WORKERS_TASK";

/// One invocation as sent to a unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Task identifier to look up in the unit's registry
    pub task: String,

    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,

    /// Transferred buffers, base64 encoded on the wire
    #[serde(default, with = "base64_buffers", skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Vec<u8>>,
}

/// The single message a unit sends back per envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UnitReply {
    /// Task returned a value
    Ok(Value),
    /// Task raised an error
    Failed(TaskError),
}

/// Bootstrap for units serving a single task
#[derive(Clone)]
pub struct Bootstrap {
    task: Arc<str>,
    registry: Arc<TaskRegistry>,
}

impl Bootstrap {
    /// Build the bootstrap for `task`
    pub fn generate(task: impl Into<String>, registry: Arc<TaskRegistry>) -> Self {
        let task: String = task.into();
        Self {
            task: task.into(),
            registry,
        }
    }

    /// Task identifier this bootstrap serves
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Registry consulted by in-process units
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Wrap arguments and buffers into the message sent to a unit
    pub fn envelope(&self, args: Vec<Value>, buffers: Vec<Vec<u8>>) -> Envelope {
        Envelope {
            task: self.task.to_string(),
            args,
            buffers,
        }
    }

    /// Run one envelope against the registry
    pub async fn execute(&self, envelope: Envelope) -> UnitReply {
        execute(&self.registry, envelope).await
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("task", &self.task)
            .field("registry", &self.registry)
            .finish()
    }
}

async fn execute(registry: &TaskRegistry, envelope: Envelope) -> UnitReply {
    let Some(handler) = registry.get(&envelope.task) else {
        return UnitReply::Failed(TaskError::unknown_task(&envelope.task));
    };

    let input = TaskInput::new(envelope.args, envelope.buffers);
    let outcome = AssertUnwindSafe(async move { handler(input).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => UnitReply::Ok(value),
        Ok(Err(err)) => UnitReply::Failed(err),
        Err(panic) => UnitReply::Failed(
            TaskError::new(format!("task panicked: {}", panic_message(&*panic))).with_type("panic"),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Whether the current process was spawned as a process unit
pub fn is_unit_process() -> bool {
    std::env::var(ENV_UNIT).map(|v| v == "1").unwrap_or(false)
}

/// Serve envelopes from stdin, writing replies to stdout, until EOF
pub async fn serve_stdio(registry: Arc<TaskRegistry>) -> std::io::Result<()> {
    serve(registry, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve JSON-line envelopes from `reader`, one reply line per envelope
pub async fn serve<R, W>(
    registry: Arc<TaskRegistry>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                debug!(task = %envelope.task, args = envelope.args.len(), "Unit received envelope");
                execute(&registry, envelope).await
            }
            Err(e) => UnitReply::Failed(
                TaskError::new(format!("malformed message: {e}")).with_type("malformed_message"),
            ),
        };

        let mut out = serde_json::to_vec(&reply).map_err(std::io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    debug!("Unit input closed");
    Ok(())
}

/// Serde support for byte buffers as base64 strings
mod base64_buffers {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(buffers: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        buffers
            .iter()
            .map(|b| STANDARD.encode(b))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
