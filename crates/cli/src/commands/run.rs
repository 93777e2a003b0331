// Single task invocation

use std::time::Instant;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use super::PoolArgs;
use crate::output::{print_field, OutputFormat};
use crate::tasks;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Built-in task; spin needs --isolation process
    pub task: String,

    /// Task arguments; each is parsed as JSON, falling back to a string
    pub args: Vec<String>,

    #[command(flatten)]
    pub pool: PoolArgs,
}

#[derive(Debug, Serialize)]
struct RunReport {
    task: String,
    result: Value,
    elapsed_ms: u64,
}

pub async fn run(args: RunArgs, output: OutputFormat) -> Result<()> {
    check_isolation(&args)?;
    let pool = args.pool.pool(&args.task)?;
    let task_args = args.args.iter().map(|raw| parse_arg(raw)).collect();

    let started = Instant::now();
    let result = pool.submit(task_args).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    pool.terminate();

    let report = RunReport {
        task: args.task,
        result: result?,
        elapsed_ms,
    };

    if output.is_text() {
        print_field("Task", &report.task);
        print_field("Result", &report.result.to_string());
        print_field("Elapsed", &format!("{} ms", report.elapsed_ms));
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}

/// A thread unit cannot be stopped while its task spins, so such tasks
/// only run in process units
pub fn check_isolation(args: &RunArgs) -> Result<()> {
    if tasks::needs_process_isolation(&args.task) && args.pool.isolation != "process" {
        bail!(
            "task '{}' never yields and can only be stopped with --isolation process",
            args.task
        );
    }
    Ok(())
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
