// CLI commands

pub mod bench;
pub mod run;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use parallel_workers::{
    PoolConfig, ProcessUnitFactory, TaskRegistry, ThreadUnitFactory, UnitFactory, WorkerPool,
};

use crate::tasks;

/// Pool options shared by commands that start a pool
///
/// Unset options fall back to the PARALLEL_WORKERS_* environment variables.
#[derive(Debug, Clone, Args)]
pub struct PoolArgs {
    /// Maximum number of live units
    #[arg(long)]
    pub max_units: Option<usize>,

    /// Per-invocation deadline in milliseconds (0 disables it)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Unit isolation
    #[arg(long, default_value = "thread", value_parser = ["thread", "process"])]
    pub isolation: String,

    /// Tear the pool down on the first failed invocation
    #[arg(long)]
    pub terminate_on_error: bool,
}

impl PoolArgs {
    pub fn config(&self) -> PoolConfig {
        let mut config = PoolConfig::from_env();
        if let Some(max_units) = self.max_units {
            config = config.with_max_units(max_units);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }
        if self.terminate_on_error {
            config = config.with_terminate_on_error(true);
        }
        config
    }

    pub fn factory(&self) -> anyhow::Result<Arc<dyn UnitFactory>> {
        match self.isolation.as_str() {
            "process" => {
                let factory = ProcessUnitFactory::current_exe()
                    .context("failed to locate the current executable")?;
                Ok(Arc::new(factory.arg("unit")))
            }
            _ => Ok(Arc::new(ThreadUnitFactory::new())),
        }
    }

    /// Start a pool running `task` from the built-in registry
    pub fn pool(&self, task: &str) -> anyhow::Result<WorkerPool> {
        let registry: Arc<TaskRegistry> = Arc::new(tasks::registry());
        let pool = WorkerPool::with_factory(task, registry, self.config(), self.factory()?)
            .with_context(|| format!("failed to start a pool for task '{task}'"))?;
        Ok(pool)
    }
}
