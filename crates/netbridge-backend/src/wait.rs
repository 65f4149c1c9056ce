//! Bounded waits on backend state transitions.
//!
//! Backends that talk to a remote service can't answer an operation
//! immediately: they fire a request and then watch the client's status until
//! it reaches the state the operation asked for. Every such wait is bounded by
//! a [`WaitPolicy`]; nothing here loops forever.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::BackendError;

/// How long a handler waits for a backend transition before giving up.
///
/// There is no `Default`: every backend that waits must be
/// given a timeout explicitly in its config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Replaces a zero timeout with one millisecond.
    ///
    /// A zero timeout would fail every wait without polling once.
    pub fn validated(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = Duration::from_millis(1);
        }
        self
    }
}

/// Waits until `done` holds for the value in `rx`, returning a clone of it.
///
/// The current value is checked first, so an already-satisfied condition
/// returns without waiting. If the sender is dropped the wait fails with
/// [`BackendError::NotConnected`]; if the deadline passes it fails with
/// [`BackendError::Timeout`] naming `operation`.
pub async fn wait_until<T, F>(
    rx: &mut watch::Receiver<T>,
    policy: WaitPolicy,
    operation: &'static str,
    done: F,
) -> Result<T, BackendError>
where
    T: Clone + Send + Sync,
    F: FnMut(&T) -> bool + Send,
{
    let waited = tokio::time::timeout(policy.timeout, async {
        rx.wait_for(done).await.map(|value| value.clone())
    })
    .await;

    match waited {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_closed)) => Err(BackendError::NotConnected),
        Err(_elapsed) => {
            tracing::warn!(operation, after = ?policy.timeout, "backend wait timed out");
            Err(BackendError::Timeout {
                operation,
                after: policy.timeout,
            })
        }
    }
}

/// Runs a single service call under `policy`.
///
/// For backends whose service calls are futures rather than status flags.
pub async fn bounded<T, F>(
    policy: WaitPolicy,
    operation: &'static str,
    call: F,
) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>> + Send,
{
    match tokio::time::timeout(policy.timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(operation, after = ?policy.timeout, "service call timed out");
            Err(BackendError::Timeout {
                operation,
                after: policy.timeout,
            })
        }
    }
}
