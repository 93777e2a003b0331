//! Task registry mapping identifiers to handlers
//!
//! The registry is the dispatch table a unit's bootstrap consults: the
//! invocation payload names a task, the registry supplies the code.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TaskError;

/// Task execution result
pub type TaskResult = Result<Value, TaskError>;

/// Task handler function type
pub type TaskHandler =
    Arc<dyn Fn(TaskInput) -> Pin<Box<dyn Future<Output = TaskResult> + Send>> + Send + Sync>;

/// Arguments of one invocation as seen by a handler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskInput {
    /// Positional arguments
    pub args: Vec<Value>,

    /// Buffers handed over by the caller
    pub buffers: Vec<Vec<u8>>,
}

impl TaskInput {
    /// Create an input from positional arguments and buffers
    pub fn new(args: Vec<Value>, buffers: Vec<Vec<u8>>) -> Self {
        Self { args, buffers }
    }

    /// Deserialize the positional argument at `index`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, TaskError> {
        let value = self.args.get(index).ok_or_else(|| {
            TaskError::invalid_argument(format!(
                "missing argument {index} (got {})",
                self.args.len()
            ))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| TaskError::invalid_argument(format!("argument {index}: {e}")))
    }

    /// Take ownership of the buffer at `index`, leaving it empty
    pub fn take_buffer(&mut self, index: usize) -> Result<Vec<u8>, TaskError> {
        self.buffers
            .get_mut(index)
            .map(std::mem::take)
            .ok_or_else(|| TaskError::invalid_argument(format!("missing buffer {index}")))
    }
}

/// Registry of task handlers
///
/// # Example
///
/// ```
/// use parallel_workers::TaskRegistry;
///
/// let mut registry = TaskRegistry::new();
/// registry.register_sync("double", |input| {
///     let n: i64 = input.arg(0)?;
///     Ok(serde_json::json!(n * 2))
/// });
/// assert!(registry.contains("double"));
/// ```
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl TaskRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register an async task handler
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(TaskInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |input| Box::pin(handler(input)));
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Register a synchronous task handler
    pub fn register_sync<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(TaskInput) -> TaskResult + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |input| {
            let handler = Arc::clone(&handler);
            async move { handler(input) }
        })
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<TaskHandler> {
        self.handlers.get(name).cloned()
    }

    /// Check if a task is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get the number of registered tasks
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Get all registered task names
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
