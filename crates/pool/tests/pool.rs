//! Worker pool behaviour against real thread units

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parallel_workers::prelude::*;
use parallel_workers::{ExecutionUnit, UnitId, UnitMessage};
use serde_json::{json, Value};

fn registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry
        .register_sync("hello", |_| Ok(json!("Hello World")))
        .register_sync("identity", |input| {
            Ok(input.args.into_iter().next().unwrap_or(Value::Null))
        })
        .register("slow_echo", |input: TaskInput| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(input.args.into_iter().next().unwrap_or(Value::Null))
        })
        .register("quick_echo", |input: TaskInput| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(input.args.into_iter().next().unwrap_or(Value::Null))
        })
        .register("forever", |_| async {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        })
        .register("maybe_hang", |input: TaskInput| async move {
            let arg: String = input.arg(0)?;
            if arg == "hang" {
                std::future::pending::<()>().await;
            }
            Ok::<_, TaskError>(json!(arg))
        })
        .register_sync("maybe_fail", |input| {
            let arg: String = input.arg(0)?;
            if arg == "fail" {
                return Err(TaskError::new("asked to fail").with_type("test"));
            }
            Ok(json!(arg))
        })
        .register_sync("byte_sum", |input| {
            let sum: u64 = input
                .buffers
                .iter()
                .flat_map(|b| b.iter())
                .map(|&b| b as u64)
                .sum();
            Ok(json!(sum))
        });
    Arc::new(registry)
}

fn pool(task: &str, config: PoolConfig) -> WorkerPool {
    WorkerPool::new(task, registry(), config).expect("pool should build")
}

fn single() -> PoolConfig {
    PoolConfig::new().with_name("test").with_max_units(1)
}

#[test_log::test(tokio::test)]
async fn test_simple_case() {
    let pool = pool("hello", single());

    assert_eq!(pool.submit(vec![]).await.unwrap(), json!("Hello World"));
    assert_eq!(pool.submit(vec![]).await.unwrap(), json!("Hello World"));

    pool.terminate();
    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 0);

    assert_eq!(pool.submit(vec![]).await.unwrap(), json!("Hello World"));
}

#[tokio::test]
async fn test_return_value() {
    let pool = pool("identity", single());

    let result = pool.submit_value("abc").await.unwrap();
    assert_eq!(result, json!("abc"));
}

#[tokio::test]
async fn test_two_values_with_one_unit() {
    let pool = pool("identity", single());

    let results = futures::future::join_all([pool.submit_value("abc"), pool.submit_value("def")])
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(results, vec![json!("abc"), json!("def")]);
    assert_eq!(pool.total_units(), 1);
}

#[tokio::test]
async fn test_units_are_created_lazily() {
    let pool = pool("forever", PoolConfig::new().with_max_units(2));

    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 0);
    assert_eq!(pool.total_units(), 0);

    let first = pool.submit_value("abc");
    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 1);

    let second = pool.submit_value("abc");
    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 2);

    let third = pool.submit_value("abc");
    assert_eq!(pool.running_units(), 2);
    assert_eq!(pool.waiting(), 1);

    pool.terminate();

    for invocation in [first, second, third] {
        assert!(invocation.await.unwrap_err().is_terminated());
    }
}

#[tokio::test]
async fn test_terminate_running_unit_then_reuse_pool() {
    let pool = pool("forever", single());

    let stuck = pool.submit_value("abc");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 1);
    let old_unit = pool.running_unit_ids()[0];

    pool.terminate();
    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 0);
    assert_eq!(pool.total_units(), 0);
    assert!(matches!(stuck.await, Err(InvocationError::Terminated)));

    let again = pool.submit_value("abc");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.idle_units(), 0);
    assert_eq!(pool.running_units(), 1);
    assert_ne!(pool.running_unit_ids()[0], old_unit);

    pool.terminate();
    assert!(again.await.unwrap_err().is_terminated());
}

#[test_log::test(tokio::test)]
async fn test_timeout_kills_unit() {
    let pool = pool(
        "forever",
        single().with_timeout(Duration::from_millis(100)),
    );

    let start = Instant::now();
    let invocation = pool.submit_value("abc");
    let unit = pool.running_unit_ids()[0];

    let err = invocation.await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    assert!(!pool.idle_unit_ids().contains(&unit));
    assert_eq!(pool.total_units(), 0);
    assert_eq!(pool.stats().counters.timed_out, 1);
}

#[tokio::test]
async fn test_timeout_replacement_is_a_new_unit() {
    let pool = pool(
        "maybe_hang",
        single().with_timeout(Duration::from_millis(100)),
    );

    let hang = pool.submit_value("hang");
    let queued = pool.submit_value("ok");
    let hung_unit = pool.running_unit_ids()[0];

    assert!(hang.await.unwrap_err().is_timeout());
    assert_eq!(queued.await.unwrap(), json!("ok"));

    let idle = pool.idle_unit_ids();
    assert_eq!(idle.len(), 1);
    assert_ne!(idle[0], hung_unit);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invocations_run_in_parallel() {
    let pool = pool("slow_echo", PoolConfig::new().with_max_units(2));

    let start = Instant::now();
    let results = futures::future::join_all([pool.submit_value("abc"), pool.submit_value("def")])
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_millis(380), "took {elapsed:?}");
    assert_eq!(results, vec![json!("abc"), json!("def")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_unit_runs_sequentially() {
    let pool = pool("slow_echo", single());

    let start = Instant::now();
    let results = futures::future::join_all([pool.submit_value("abc"), pool.submit_value("def")])
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(400), "took {elapsed:?}");
    assert_eq!(results, vec![json!("abc"), json!("def")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unit_count_never_exceeds_max() {
    let pool = Arc::new(pool("quick_echo", PoolConfig::new().with_max_units(3)));

    let sampler = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut max_seen = 0;
            for _ in 0..100 {
                let stats = pool.stats();
                assert!(stats.total_units() <= 3, "stats: {stats:?}");
                max_seen = max_seen.max(stats.total_units());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            max_seen
        })
    };

    let invocations: Vec<_> = (0..20).map(|i| pool.submit_value(i)).collect();
    let results = futures::future::join_all(invocations).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(i));
    }

    let max_seen = sampler.await.unwrap();
    assert!(max_seen <= 3);
    assert_eq!(pool.total_units(), 3);
    assert_eq!(pool.stats().counters.units_spawned, 3);
}

#[tokio::test]
async fn test_task_error_recycles_unit() {
    let pool = pool("maybe_fail", single());

    let err = pool.submit_value("fail").await.unwrap_err();
    match err {
        InvocationError::Task(task_err) => {
            assert_eq!(task_err.message, "asked to fail");
            assert_eq!(task_err.error_type.as_deref(), Some("test"));
        }
        other => panic!("expected task error, got {other:?}"),
    }

    let unit = pool.idle_unit_ids();
    assert_eq!(unit.len(), 1);

    assert_eq!(pool.submit_value("fine").await.unwrap(), json!("fine"));
    assert_eq!(pool.idle_unit_ids(), unit);
}

#[test_log::test(tokio::test)]
async fn test_terminate_on_error_tears_down_pool() {
    let pool = pool("maybe_fail", single().with_terminate_on_error(true));

    let failing = pool.submit_value("fail");
    let queued = pool.submit_value("fine");

    assert!(matches!(failing.await, Err(InvocationError::Task(_))));
    assert!(queued.await.unwrap_err().is_terminated());
    assert_eq!(pool.total_units(), 0);
    assert_eq!(pool.waiting(), 0);

    // Still usable afterwards
    assert_eq!(pool.submit_value("again").await.unwrap(), json!("again"));
}

#[tokio::test]
async fn test_unknown_task_fails_in_unit() {
    let pool = pool("not_registered", single());

    let err = pool.submit(vec![]).await.unwrap_err();
    match err {
        InvocationError::Task(task_err) => {
            assert_eq!(task_err.error_type.as_deref(), Some("unknown_task"))
        }
        other => panic!("expected task error, got {other:?}"),
    }
    assert_eq!(pool.idle_units(), 1);
}

#[tokio::test]
async fn test_buffers_are_handed_to_the_task() {
    let pool = pool("byte_sum", single());

    let result = pool
        .submit_with_buffers(vec![], vec![vec![1, 2, 3], vec![250]])
        .await
        .unwrap();
    assert_eq!(result, json!(256));
}

#[tokio::test]
async fn test_drop_rejects_outstanding_invocations() {
    let pool = pool("forever", single());

    let running = pool.submit_value(1);
    let queued = pool.submit_value(2);
    drop(pool);

    assert!(running.await.unwrap_err().is_terminated());
    assert!(queued.await.unwrap_err().is_terminated());
}

#[tokio::test]
async fn test_stats_counters() {
    let pool = pool("maybe_fail", PoolConfig::new().with_name("stats").with_max_units(2));

    pool.submit_value("a").await.unwrap();
    pool.submit_value("fail").await.unwrap_err();
    pool.submit_value("b").await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.name, "stats");
    assert_eq!(stats.max_units, 2);
    assert_eq!(stats.counters.submitted, 3);
    assert_eq!(stats.counters.completed, 2);
    assert_eq!(stats.counters.failed, 1);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.waiting, 0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["completed"], 2);
}

#[tokio::test]
async fn test_construction_errors() {
    let err = WorkerPool::new("", registry(), single()).unwrap_err();
    assert!(matches!(err, PoolError::InvalidTask(_)));

    let config = PoolConfig {
        max_units: 0,
        ..PoolConfig::default()
    };
    let err = WorkerPool::new("identity", registry(), config).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_requires_runtime() {
    let err = WorkerPool::new("identity", registry(), single()).unwrap_err();
    assert!(matches!(err, PoolError::NoRuntime));
}

struct BrokenFactory;

impl UnitFactory for BrokenFactory {
    fn spawn(&self, _bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        Err(UnitError::Spawn("no units today".to_string()))
    }
}

#[tokio::test]
async fn test_spawn_failure_rejects_invocation() {
    let pool =
        WorkerPool::with_factory("identity", registry(), single(), Arc::new(BrokenFactory))
            .unwrap();

    let err = pool.submit_value("abc").await.unwrap_err();
    assert!(matches!(err, InvocationError::Unit(UnitError::Spawn(_))));
    assert_eq!(pool.total_units(), 0);
    assert_eq!(pool.waiting(), 0);
}

/// Hands out one thread unit, then fails every later spawn
#[derive(Default)]
struct OneShotFactory {
    calls: AtomicUsize,
}

impl UnitFactory for OneShotFactory {
    fn spawn(&self, bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            ThreadUnitFactory::new().spawn(bootstrap)
        } else {
            Err(UnitError::Spawn("transient".to_string()))
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_spawn_failure_with_live_unit_keeps_queue() {
    let pool = WorkerPool::with_factory(
        "slow_echo",
        registry(),
        PoolConfig::new().with_max_units(2),
        Arc::new(OneShotFactory::default()),
    )
    .unwrap();

    let a = pool.submit_value("a");
    let b = pool.submit_value("b");
    let c = pool.submit_value("c");
    assert_eq!(pool.running_units(), 1);
    assert_eq!(pool.waiting(), 2);

    assert_eq!(a.await.unwrap(), json!("a"));
    assert_eq!(b.await.unwrap(), json!("b"));
    assert_eq!(c.await.unwrap(), json!("c"));

    assert_eq!(pool.total_units(), 1);
    let stats = pool.stats();
    assert_eq!(stats.counters.units_spawned, 1);
    assert_eq!(stats.counters.failed, 0);
}

/// Takes a while to start each thread unit
struct SlowFactory {
    delay: Duration,
}

impl UnitFactory for SlowFactory {
    fn spawn(&self, bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        std::thread::sleep(self.delay);
        ThreadUnitFactory::new().spawn(bootstrap)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_spawn_does_not_block_callers() {
    let pool = Arc::new(
        WorkerPool::with_factory(
            "identity",
            registry(),
            single(),
            Arc::new(SlowFactory {
                delay: Duration::from_millis(500),
            }),
        )
        .unwrap(),
    );

    let submitter = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || pool.submit_value("abc"))
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let stats = pool.stats();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.total_units(), 0);

    let invocation = submitter.join().unwrap();
    assert_eq!(invocation.await.unwrap(), json!("abc"));
    assert_eq!(pool.total_units(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_terminate_during_slow_spawn_stops_new_unit() {
    let pool = Arc::new(
        WorkerPool::with_factory(
            "identity",
            registry(),
            single(),
            Arc::new(SlowFactory {
                delay: Duration::from_millis(300),
            }),
        )
        .unwrap(),
    );

    let submitter = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || pool.submit_value("abc"))
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.terminate();

    let invocation = submitter.join().unwrap();
    assert!(invocation.await.unwrap_err().is_terminated());
    assert_eq!(pool.total_units(), 0);
    assert_eq!(pool.stats().counters.units_spawned, 0);
}

/// Unit that drops every message unanswered, as if it crashed mid-task
struct CrashingUnit {
    id: UnitId,
    alive: bool,
}

impl ExecutionUnit for CrashingUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn send(&mut self, message: UnitMessage) -> Result<(), UnitError> {
        self.alive = false;
        drop(message);
        Ok(())
    }

    fn stop(&mut self) {
        self.alive = false;
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }
}

struct CrashingFactory;

impl UnitFactory for CrashingFactory {
    fn spawn(&self, _bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        Ok(Box::new(CrashingUnit {
            id: UnitId::next(),
            alive: true,
        }))
    }
}

#[tokio::test]
async fn test_unit_exit_rejects_invocation() {
    let pool =
        WorkerPool::with_factory("identity", registry(), single(), Arc::new(CrashingFactory))
            .unwrap();

    let err = pool.submit_value("abc").await.unwrap_err();
    assert!(matches!(err, InvocationError::Unit(UnitError::Exited)));
    assert_eq!(pool.total_units(), 0);

    let stats = pool.stats();
    assert_eq!(stats.counters.failed, 1);
    assert_eq!(stats.counters.terminated, 0);
}

#[tokio::test]
async fn test_unit_exit_with_terminate_on_error() {
    let pool = WorkerPool::with_factory(
        "identity",
        registry(),
        single().with_terminate_on_error(true),
        Arc::new(CrashingFactory),
    )
    .unwrap();

    let first = pool.submit_value("first");
    let second = pool.submit_value("second");

    assert!(matches!(
        first.await,
        Err(InvocationError::Unit(UnitError::Exited))
    ));
    assert!(second.await.unwrap_err().is_terminated());
    assert_eq!(pool.total_units(), 0);
    assert_eq!(pool.waiting(), 0);
}

/// Unit that accepts messages but never answers and reports itself dead
struct SilentUnit {
    id: UnitId,
    inbox: Vec<UnitMessage>,
}

impl ExecutionUnit for SilentUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn send(&mut self, message: UnitMessage) -> Result<(), UnitError> {
        self.inbox.push(message);
        Ok(())
    }

    fn stop(&mut self) {
        self.inbox.clear();
    }

    fn is_alive(&mut self) -> bool {
        false
    }
}

struct SilentFactory;

impl UnitFactory for SilentFactory {
    fn spawn(&self, _bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        Ok(Box::new(SilentUnit {
            id: UnitId::next(),
            inbox: Vec::new(),
        }))
    }
}

#[tokio::test]
async fn test_timeout_with_custom_unit() {
    let pool = WorkerPool::with_factory(
        "identity",
        registry(),
        single().with_timeout(Duration::from_millis(50)),
        Arc::new(SilentFactory),
    )
    .unwrap();

    let err = pool.submit_value("abc").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(pool.total_units(), 0);
}
