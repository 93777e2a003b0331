//! Task definitions
//!
//! Units cannot receive code at runtime, so every task a pool may run is
//! registered ahead of time in a [`TaskRegistry`] under a stable identifier.

mod registry;

pub use registry::{TaskHandler, TaskInput, TaskRegistry, TaskResult};
