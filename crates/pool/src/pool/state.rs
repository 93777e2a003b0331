//! Pool bookkeeping
//!
//! Only ever touched with the pool's state lock held.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::invocation::{Invocation, Settlement};
use crate::unit::{ExecutionUnit, UnitId};

/// An invocation waiting for a unit
pub(crate) struct PendingInvocation {
    pub(crate) args: Vec<Value>,
    pub(crate) buffers: Vec<Vec<u8>>,
    pub(crate) settlement: Settlement,
}

impl PendingInvocation {
    pub(crate) fn new(args: Vec<Value>, buffers: Vec<Vec<u8>>) -> (Self, Invocation) {
        let (settlement, invocation) = Settlement::channel();
        (
            Self {
                args,
                buffers,
                settlement,
            },
            invocation,
        )
    }
}

/// A unit together with the invocation it is running
pub(crate) struct RunningInvocation {
    pub(crate) unit: Box<dyn ExecutionUnit>,
    pub(crate) dispatch_id: u64,
    pub(crate) settlement: Settlement,
    pub(crate) started_at: Instant,
}

/// Lifetime counters of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounters {
    /// Invocations accepted by `submit`
    pub submitted: u64,
    /// Invocations resolved with a value
    pub completed: u64,
    /// Invocations rejected by a task or unit failure
    pub failed: u64,
    /// Invocations rejected by the deadline
    pub timed_out: u64,
    /// Invocations rejected by pool shutdown
    pub terminated: u64,
    /// Units created
    pub units_spawned: u64,
}

pub(crate) struct PoolState {
    pub(crate) idle: VecDeque<Box<dyn ExecutionUnit>>,
    pub(crate) running: HashMap<UnitId, RunningInvocation>,
    pub(crate) waiting: VecDeque<PendingInvocation>,
    /// Units being started by a factory outside the lock
    pub(crate) spawning: usize,
    pub(crate) counters: PoolCounters,
    /// Cancelled on shutdown so watchers of the old units stop waiting
    pub(crate) epoch: CancellationToken,
}

impl PoolState {
    pub(crate) fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            running: HashMap::new(),
            waiting: VecDeque::new(),
            spawning: 0,
            counters: PoolCounters::default(),
            epoch: CancellationToken::new(),
        }
    }

    pub(crate) fn total_units(&self) -> usize {
        self.idle.len() + self.running.len()
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool name
    pub name: String,
    /// Configured maximum of live units
    pub max_units: usize,
    /// Units without an invocation
    pub idle: usize,
    /// Units running an invocation
    pub running: usize,
    /// Invocations not yet dispatched
    pub waiting: usize,
    /// Lifetime counters
    #[serde(flatten)]
    pub counters: PoolCounters,
}

impl PoolStats {
    /// Live units
    pub fn total_units(&self) -> usize {
        self.idle + self.running
    }
}
