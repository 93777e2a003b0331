//! Deferred results

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::InvocationError;

type Settled = Result<Value, InvocationError>;

/// Deferred result of one submitted invocation
///
/// Resolves exactly once: with the task's value, or with the reason the
/// invocation failed. Dropping it does not cancel the work.
#[derive(Debug)]
#[must_use = "an invocation does nothing unless awaited"]
pub struct Invocation {
    rx: oneshot::Receiver<Settled>,
}

impl Future for Invocation {
    type Output = Settled;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(InvocationError::Terminated)))
    }
}

/// Settling half of an [`Invocation`]
#[derive(Debug)]
pub(crate) struct Settlement {
    tx: oneshot::Sender<Settled>,
}

impl Settlement {
    pub(crate) fn channel() -> (Self, Invocation) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, Invocation { rx })
    }

    pub(crate) fn resolve(self, value: Value) {
        // Caller may have dropped the invocation
        let _ = self.tx.send(Ok(value));
    }

    pub(crate) fn reject(self, error: InvocationError) {
        let _ = self.tx.send(Err(error));
    }
}
