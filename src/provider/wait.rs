//! Polling of provider actions until they reach a terminal status.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::poll::{CancelToken, PollPolicy, PollStop};

use super::{ActionId, ActionKind, ActionStatus, PendingAction, Provider};

/// Errors raised while waiting for an action.
#[derive(Debug, Error)]
pub enum AwaitError<E>
where
    E: std::error::Error + 'static,
{
    /// Reading the action status failed.
    #[error("failed to read status of action {action_id}: {source}")]
    Provider {
        /// Action being polled.
        action_id: ActionId,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The action reached the `errored` status.
    #[error("action {action_id} ({kind}) finished with status errored")]
    Failed {
        /// Action that failed.
        action_id: ActionId,
        /// Operation performed by the action.
        kind: ActionKind,
    },
    /// The polling bound was exhausted first.
    #[error("action {action_id} ({kind}) still in progress after {} seconds", waited.as_secs())]
    TimedOut {
        /// Action that did not finish.
        action_id: ActionId,
        /// Operation performed by the action.
        kind: ActionKind,
        /// How long the poll ran.
        waited: Duration,
    },
    /// The run was cancelled while polling.
    #[error("cancelled while waiting for action {action_id}")]
    Cancelled {
        /// Action being polled.
        action_id: ActionId,
    },
}

/// Polls `action` at the policy interval until it completes.
///
/// The supplied action is checked first, so an action that is already
/// terminal returns without a provider round trip.
///
/// # Errors
///
/// Returns [`AwaitError::Failed`] when the action ends in `errored`,
/// [`AwaitError::TimedOut`] when the policy bound is exhausted,
/// [`AwaitError::Cancelled`] when `cancel` fires, and
/// [`AwaitError::Provider`] when a status read fails.
pub async fn await_action<P>(
    provider: &P,
    action: &PendingAction,
    policy: &PollPolicy,
    cancel: &CancelToken,
) -> Result<PendingAction, AwaitError<P::Error>>
where
    P: Provider + ?Sized,
{
    let mut poller = policy.start();
    let mut current = action.clone();
    loop {
        match current.status {
            ActionStatus::Completed => return Ok(current),
            ActionStatus::Errored => {
                return Err(AwaitError::Failed {
                    action_id: current.id,
                    kind: current.kind,
                });
            }
            ActionStatus::InProgress => {
                debug!(action = %current.id, kind = %current.kind, "action still in progress");
            }
        }

        if let Err(stop) = poller.next_attempt(cancel).await {
            return Err(match stop {
                PollStop::Exhausted { elapsed, .. } => AwaitError::TimedOut {
                    action_id: current.id,
                    kind: current.kind,
                    waited: elapsed,
                },
                PollStop::Cancelled => AwaitError::Cancelled {
                    action_id: current.id,
                },
            });
        }

        current = provider
            .action(&current.id)
            .await
            .map_err(|source| AwaitError::Provider {
                action_id: current.id.clone(),
                source,
            })?;
    }
}
