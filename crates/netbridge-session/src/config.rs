//! Facade configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`SessionFacade`](crate::SessionFacade).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacadeConfig {
    /// Capacity of the public broadcast channel.
    ///
    /// A subscriber that falls further behind than this loses the oldest
    /// events (it sees `RecvError::Lagged`); the facade itself never waits.
    pub event_capacity: usize,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
        }
    }
}

impl FacadeConfig {
    /// `tokio::sync::broadcast` panics on a zero capacity.
    pub fn validated(mut self) -> Self {
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}
