//! # Parallel Workers
//!
//! A bounded pool of isolated execution units that run one registered task
//! concurrently. Callers submit invocations one at a time and get back a
//! deferred result per invocation.
//!
//! ## Features
//!
//! - **Lazy growth**: units are created only when work is queued, up to `max_units`
//! - **Strict FIFO dispatch**: submission order decides which invocation runs next
//! - **Exactly-once settlement**: every invocation resolves or rejects once
//! - **Deadlines**: a unit exceeding the per-invocation timeout is stopped
//! - **Isolation choices**: thread units by default, process units for killable work
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  (idle / running / waiting bookkeeping, dispatch, timeouts) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 UnitFactory / ExecutionUnit                  │
//! │  (thread units, process units speaking JSON lines)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Bootstrap + TaskRegistry                    │
//! │  (look up the task, run it with the arguments, reply once)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use parallel_workers::prelude::*;
//!
//! let mut registry = TaskRegistry::new();
//! registry.register("slow_echo", |input| async move {
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     Ok(input.args.into_iter().next().unwrap_or_default())
//! });
//!
//! let pool = WorkerPool::new("slow_echo", Arc::new(registry), PoolConfig::new().with_max_units(2))?;
//! let results = futures::future::join_all([
//!     pool.submit_value("abc"),
//!     pool.submit_value("def"),
//! ]).await;
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod pool;
pub mod task;
pub mod unit;

/// Prelude for common imports
pub mod prelude {
    pub use crate::bootstrap::{Bootstrap, Envelope, UnitReply};
    pub use crate::config::PoolConfig;
    pub use crate::error::{InvocationError, PoolError, TaskError, UnitError};
    pub use crate::pool::{Invocation, PoolStats, WorkerPool};
    pub use crate::task::{TaskInput, TaskRegistry, TaskResult};
    pub use crate::unit::{ProcessUnitFactory, ThreadUnitFactory, UnitFactory};
    pub use std::sync::Arc;
}

// Re-export key types at crate root
pub use bootstrap::{Bootstrap, Envelope, UnitReply};
pub use config::PoolConfig;
pub use error::{InvocationError, PoolError, TaskError, UnitError};
pub use pool::{Invocation, PoolCounters, PoolStats, WorkerPool};
pub use task::{TaskHandler, TaskInput, TaskRegistry, TaskResult};
pub use unit::{
    ExecutionUnit, ProcessUnit, ProcessUnitFactory, ThreadUnit, ThreadUnitFactory, UnitFactory,
    UnitId, UnitMessage,
};
