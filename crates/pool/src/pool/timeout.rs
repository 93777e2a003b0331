//! Per-dispatch deadline

use std::time::Duration;

use tokio::sync::oneshot;

use crate::bootstrap::UnitReply;

/// How a dispatched invocation ended, from the coordinator's point of view
#[derive(Debug, PartialEq)]
pub(crate) enum Outcome {
    /// The unit answered
    Replied(UnitReply),
    /// The unit dropped the reply channel without answering
    Exited,
    /// The deadline elapsed first
    TimedOut(Duration),
}

/// Wait for a unit's reply, racing it against `deadline` when one is set
pub(crate) async fn guard(reply: oneshot::Receiver<UnitReply>, deadline: Option<Duration>) -> Outcome {
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, reply).await {
            Ok(Ok(reply)) => Outcome::Replied(reply),
            Ok(Err(_)) => Outcome::Exited,
            Err(_) => Outcome::TimedOut(limit),
        },
        None => match reply.await {
            Ok(reply) => Outcome::Replied(reply),
            Err(_) => Outcome::Exited,
        },
    }
}
