// Built-in tasks
//
// Design Decision: The CLI and the process units it spawns share this one
// registry, so a task name means the same thing on both sides of the pipe.

use std::time::Duration;

use parallel_workers::{TaskError, TaskInput, TaskRegistry, TaskResult};
use serde_json::{json, Value};

pub const IDENTITY: &str = "identity";
pub const ROW_SUM: &str = "row_sum";
pub const SLEEP: &str = "sleep";
pub const SPIN: &str = "spin";
pub const FAIL: &str = "fail";

pub fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register_sync(IDENTITY, |input| {
            Ok(input.args.into_iter().next().unwrap_or(Value::Null))
        })
        .register_sync(ROW_SUM, row_sum)
        .register(SLEEP, |input: TaskInput| async move {
            let millis: u64 = input.arg(0)?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, TaskError>(json!(millis))
        })
        .register_sync(SPIN, |_| loop {
            std::hint::spin_loop();
        })
        .register_sync(FAIL, |input| {
            let message = input
                .arg::<String>(0)
                .unwrap_or_else(|_| "requested failure".to_string());
            Err(TaskError::new(message).with_type("requested"))
        });
    registry
}

/// Tasks that never reach an await point once started
pub fn needs_process_isolation(task: &str) -> bool {
    task == SPIN
}

/// Sum of a matrix row, given either as a byte buffer or as a JSON array
pub fn row_sum(input: TaskInput) -> TaskResult {
    if !input.buffers.is_empty() {
        let sum: u64 = input
            .buffers
            .iter()
            .flat_map(|row| row.iter())
            .map(|&v| u64::from(v))
            .sum();
        return Ok(json!(sum));
    }

    let row: Vec<f64> = input.arg(0)?;
    Ok(json!(row.iter().sum::<f64>()))
}
