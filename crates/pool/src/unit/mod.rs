//! Isolated execution units
//!
//! The pool never runs task code itself. It talks to units through the
//! [`ExecutionUnit`] trait and creates them through a [`UnitFactory`]:
//!
//! - [`ThreadUnitFactory`] - one dedicated OS thread per unit (default)
//! - [`ProcessUnitFactory`] - one child process per unit, killable at any time
//!
//! Each dispatched message carries its own one-shot reply channel. A unit
//! answers exactly once; dropping the channel without answering means the
//! unit died.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::bootstrap::{Bootstrap, Envelope, UnitReply};
use crate::error::UnitError;

mod process;
mod thread;

pub use process::{ProcessUnit, ProcessUnitFactory};
pub use thread::{ThreadUnit, ThreadUnitFactory};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// A dispatched invocation on its way to a unit
#[derive(Debug)]
pub struct UnitMessage {
    /// Task payload
    pub envelope: Envelope,

    /// Where the unit sends its single reply
    pub reply: oneshot::Sender<UnitReply>,
}

/// Handle to one isolated execution unit
///
/// Owned by exactly one place at a time: the pool's idle queue or one of its
/// running entries.
pub trait ExecutionUnit: Send {
    /// Unit identifier
    fn id(&self) -> UnitId;

    /// Hand a message to the unit without waiting for it to run
    fn send(&mut self, message: UnitMessage) -> Result<(), UnitError>;

    /// Stop the unit; it never runs another message afterwards
    fn stop(&mut self);

    /// Whether the unit can still accept messages
    fn is_alive(&mut self) -> bool;
}

/// Creates execution units from a bootstrap
pub trait UnitFactory: Send + Sync {
    /// Start a new unit serving `bootstrap`
    fn spawn(&self, bootstrap: &Bootstrap) -> Result<Box<dyn ExecutionUnit>, UnitError>;
}
