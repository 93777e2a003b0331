//! Worker pool: bookkeeping, dispatch, deadlines and teardown
//!
//! All state lives behind one lock. Every event that can change it (a
//! submission, a unit reply, a unit failure, an elapsed deadline, a
//! termination) takes the lock, updates the collections, and runs a dispatch
//! cycle before releasing it. Nothing under the lock waits on a unit, and
//! unit factories run with the lock released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::invocation::Invocation;
use super::state::{PendingInvocation, PoolState, PoolStats, RunningInvocation};
use super::timeout::{self, Outcome};
use crate::bootstrap::{Bootstrap, UnitReply};
use crate::config::PoolConfig;
use crate::error::{InvocationError, PoolError, UnitError};
use crate::task::TaskRegistry;
use crate::unit::{ThreadUnitFactory, UnitFactory, UnitId, UnitMessage};

/// Bounded pool of isolated execution units running one task
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use parallel_workers::{PoolConfig, TaskRegistry, WorkerPool};
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let mut registry = TaskRegistry::new();
/// registry.register_sync("identity", |input| Ok(input.args[0].clone()));
///
/// let pool = WorkerPool::new(
///     "identity",
///     Arc::new(registry),
///     PoolConfig::new().with_max_units(2),
/// )?;
///
/// let value = pool.submit(vec![json!("abc")]).await?;
/// assert_eq!(value, json!("abc"));
///
/// pool.terminate();
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
}

struct Shared {
    config: PoolConfig,
    bootstrap: Bootstrap,
    factory: Arc<dyn UnitFactory>,
    runtime: Handle,
    state: Mutex<PoolState>,
    next_dispatch: AtomicU64,
}

impl WorkerPool {
    /// Create a pool of thread units running `task` from `registry`
    ///
    /// Must be called inside a tokio runtime; the pool keeps a handle to it.
    pub fn new(
        task: impl Into<String>,
        registry: Arc<TaskRegistry>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        Self::with_factory(task, registry, config, Arc::new(ThreadUnitFactory::new()))
    }

    /// Create a pool whose units come from `factory`
    pub fn with_factory(
        task: impl Into<String>,
        registry: Arc<TaskRegistry>,
        config: PoolConfig,
        factory: Arc<dyn UnitFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let task = task.into();
        if task.trim().is_empty() {
            return Err(PoolError::InvalidTask(
                "task identifier must not be empty".to_string(),
            ));
        }

        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        info!(
            pool = %config.name,
            task = %task,
            max_units = config.max_units,
            timeout_ms = config.timeout.as_millis() as u64,
            terminate_on_error = config.terminate_on_error,
            "Worker pool created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                bootstrap: Bootstrap::generate(task, registry),
                config,
                factory,
                runtime,
                state: Mutex::new(PoolState::new()),
                next_dispatch: AtomicU64::new(1),
            }),
        })
    }

    /// Queue an invocation with positional arguments
    pub fn submit(&self, args: Vec<Value>) -> Invocation {
        self.submit_with_buffers(args, Vec::new())
    }

    /// Queue an invocation with a single argument
    pub fn submit_value(&self, arg: impl Into<Value>) -> Invocation {
        self.submit(vec![arg.into()])
    }

    /// Queue an invocation, handing `buffers` over to the unit that runs it
    pub fn submit_with_buffers(&self, args: Vec<Value>, buffers: Vec<Vec<u8>>) -> Invocation {
        let (pending, invocation) = PendingInvocation::new(args, buffers);

        let mut guard = self.shared.state.lock();
        guard.waiting.push_back(pending);
        guard.counters.submitted += 1;
        debug!(
            pool = %self.shared.config.name,
            waiting = guard.waiting.len(),
            "Invocation queued"
        );

        self.shared.dispatch(&mut guard);
        invocation
    }

    /// Stop every unit and reject every unsettled invocation
    ///
    /// The pool stays usable: later submissions start fresh units.
    #[instrument(skip(self), fields(pool = %self.shared.config.name))]
    pub fn terminate(&self) {
        let mut guard = self.shared.state.lock();
        self.shared.shutdown(&mut guard, "terminate requested");
    }

    /// Number of units without an invocation
    pub fn idle_units(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Number of units running an invocation
    pub fn running_units(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    /// Number of live units
    pub fn total_units(&self) -> usize {
        self.shared.state.lock().total_units()
    }

    /// Number of invocations not yet dispatched
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }

    /// Identifiers of idle units, oldest first
    pub fn idle_unit_ids(&self) -> Vec<UnitId> {
        self.shared.state.lock().idle.iter().map(|u| u.id()).collect()
    }

    /// Identifiers of running units
    pub fn running_unit_ids(&self) -> Vec<UnitId> {
        let mut ids: Vec<_> = self.shared.state.lock().running.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Snapshot of the pool
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            name: self.shared.config.name.clone(),
            max_units: self.shared.config.max_units,
            idle: state.idle.len(),
            running: state.running.len(),
            waiting: state.waiting.len(),
            counters: state.counters,
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Task identifier served by this pool
    pub fn task(&self) -> &str {
        self.shared.bootstrap.task()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut guard = self.shared.state.lock();
        if guard.total_units() > 0 || !guard.waiting.is_empty() {
            self.shared.shutdown(&mut guard, "pool dropped");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("task", &self.shared.bootstrap.task())
            .finish()
    }
}

impl Shared {
    /// Grow the pool if work is queued, then hand queued work to idle units
    ///
    /// The state lock is released while the factory spawns a unit. The slot
    /// is reserved in `spawning` first, so concurrent cycles never overshoot
    /// `max_units`.
    fn dispatch(self: &Arc<Self>, guard: &mut MutexGuard<'_, PoolState>) {
        let _enter = self.runtime.enter();

        loop {
            while guard.total_units() + guard.spawning < self.config.max_units
                && guard.idle.len() + guard.spawning < guard.waiting.len()
            {
                guard.spawning += 1;
                let epoch = guard.epoch.clone();
                let spawned = MutexGuard::unlocked(guard, || self.factory.spawn(&self.bootstrap));
                guard.spawning -= 1;

                match spawned {
                    Ok(mut unit) if epoch.is_cancelled() => {
                        // Pool was shut down while this unit was starting
                        unit.stop();
                    }
                    Ok(unit) => {
                        guard.counters.units_spawned += 1;
                        debug!(
                            pool = %self.config.name,
                            unit = %unit.id(),
                            total = guard.total_units() + 1,
                            "Unit spawned"
                        );
                        guard.idle.push_back(unit);
                    }
                    Err(e) => {
                        error!(pool = %self.config.name, error = %e, "Failed to spawn unit");
                        if guard.total_units() + guard.spawning > 0 {
                            // Live units will pick the queue up as they free up
                            break;
                        }
                        // Nothing can serve the head of the queue, fail it so callers never stall
                        if let Some(pending) = guard.waiting.pop_front() {
                            guard.counters.failed += 1;
                            pending.settlement.reject(e.into());
                        }
                    }
                }
            }

            let state = &mut **guard;
            let mut lost_unit = false;
            while !state.waiting.is_empty() {
                let Some(mut unit) = state.idle.pop_front() else {
                    break;
                };
                let Some(pending) = state.waiting.pop_front() else {
                    state.idle.push_front(unit);
                    break;
                };

                let dispatch_id = self.next_dispatch.fetch_add(1, Ordering::Relaxed);
                let (reply_tx, reply_rx) = oneshot::channel();
                let PendingInvocation {
                    args,
                    buffers,
                    settlement,
                } = pending;

                let message = UnitMessage {
                    envelope: self.bootstrap.envelope(args, buffers),
                    reply: reply_tx,
                };

                match unit.send(message) {
                    Ok(()) => {
                        let unit_id = unit.id();
                        debug!(pool = %self.config.name, unit = %unit_id, dispatch_id, "Invocation dispatched");
                        state.running.insert(
                            unit_id,
                            RunningInvocation {
                                unit,
                                dispatch_id,
                                settlement,
                                started_at: Instant::now(),
                            },
                        );
                        self.watch(unit_id, dispatch_id, reply_rx, state.epoch.child_token());
                    }
                    Err(e) => {
                        warn!(pool = %self.config.name, unit = %unit.id(), error = %e, "Failed to send to unit");
                        unit.stop();
                        state.counters.failed += 1;
                        settlement.reject(e.into());
                        lost_unit = true;
                    }
                }
            }

            // A discarded unit frees capacity for a replacement. Each discard
            // consumed one invocation, so this terminates.
            if !lost_unit || state.waiting.is_empty() {
                break;
            }
        }

        debug_assert!(guard.total_units() <= self.config.max_units);
    }

    /// Await one dispatched invocation and route its outcome back
    fn watch(
        self: &Arc<Self>,
        unit_id: UnitId,
        dispatch_id: u64,
        reply: oneshot::Receiver<UnitReply>,
        epoch: CancellationToken,
    ) {
        let shared = Arc::clone(self);
        let deadline = self.config.deadline();

        self.runtime.spawn(async move {
            tokio::select! {
                outcome = timeout::guard(reply, deadline) => shared.settle(unit_id, dispatch_id, outcome),
                _ = epoch.cancelled() => {}
            }
        });
    }

    fn settle(self: &Arc<Self>, unit_id: UnitId, dispatch_id: u64, outcome: Outcome) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Entry may already be gone (shutdown) or belong to a later dispatch
        match state.running.get(&unit_id) {
            Some(entry) if entry.dispatch_id == dispatch_id => {}
            _ => {
                debug!(pool = %self.config.name, unit = %unit_id, dispatch_id, "Ignoring stale outcome");
                return;
            }
        }
        let Some(RunningInvocation {
            mut unit,
            settlement,
            started_at,
            ..
        }) = state.running.remove(&unit_id)
        else {
            return;
        };
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Replied(UnitReply::Ok(value)) => {
                debug!(pool = %self.config.name, unit = %unit_id, elapsed_ms, "Invocation completed");
                state.counters.completed += 1;
                settlement.resolve(value);
                state.idle.push_back(unit);
            }
            Outcome::Replied(UnitReply::Failed(err)) => {
                error!(pool = %self.config.name, unit = %unit_id, error = %err, elapsed_ms, "Unit reported an error");
                state.counters.failed += 1;
                settlement.reject(InvocationError::Task(err));

                if self.config.terminate_on_error {
                    unit.stop();
                    self.shutdown(state, "unit error");
                    return;
                }
                if unit.is_alive() {
                    state.idle.push_back(unit);
                } else {
                    unit.stop();
                }
            }
            Outcome::Exited => {
                error!(pool = %self.config.name, unit = %unit_id, elapsed_ms, "Unit exited before replying");
                state.counters.failed += 1;
                unit.stop();
                settlement.reject(InvocationError::Unit(UnitError::Exited));

                if self.config.terminate_on_error {
                    self.shutdown(state, "unit exited");
                    return;
                }
            }
            Outcome::TimedOut(limit) => {
                warn!(
                    pool = %self.config.name,
                    unit = %unit_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Unit timed out, stopping it"
                );
                state.counters.timed_out += 1;
                unit.stop();
                settlement.reject(InvocationError::TimedOut { limit });
            }
        }

        self.dispatch(&mut guard);
    }

    /// Stop all units and reject everything queued or in flight
    fn shutdown(&self, state: &mut PoolState, reason: &str) {
        let waiting = state.waiting.len();
        let running = state.running.len();
        let idle = state.idle.len();

        state.epoch.cancel();
        state.epoch = CancellationToken::new();

        for pending in state.waiting.drain(..) {
            pending.settlement.reject(InvocationError::Terminated);
        }
        for (_, mut entry) in state.running.drain() {
            entry.unit.stop();
            entry.settlement.reject(InvocationError::Terminated);
        }
        for mut unit in state.idle.drain(..) {
            unit.stop();
        }
        state.counters.terminated += (waiting + running) as u64;

        info!(
            pool = %self.config.name,
            reason,
            waiting,
            running,
            idle,
            "Worker pool terminated"
        );
    }
}
