//! The worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - bounded pool running one task on isolated units
//! - [`Invocation`] - deferred result of one submission
//! - [`PoolStats`] - point-in-time introspection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │                                                              │
//! │  submit ──▶ waiting (FIFO) ──▶ dispatch cycle                │
//! │                                  │  grow up to max_units     │
//! │                                  │  pop oldest → idle unit   │
//! │                                  ▼                           │
//! │   idle ◀──────── settle ◀─── watcher (reply vs deadline)     │
//! │                    │                                         │
//! │                    └── error / timeout / terminate           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod invocation;
mod manager;
mod state;
mod timeout;

pub use invocation::Invocation;
pub use manager::WorkerPool;
pub use state::{PoolCounters, PoolStats};
