//! The facade's lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the facade is in its lifecycle.
///
/// ```text
///            initialize            success               connect
///   Idle ─────────────→ Initializing ───────→ Ready ─────────────→ Connecting
///    ↑                       │ failure          ↑  ↑ failure            │
///    │                       └──────→ Idle      │  └────────────────────┤
///    │                                          │ disconnect            │ success
///    │                                          └──────────── Connected ←┘
///    │      shutdown (from any state with a handler)
///    └──────────────────────── ShuttingDown
/// ```
///
/// Lobby and room membership is a sub-state of `Connected`, tracked through
/// the station id and host flag rather than separate variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacadeState {
    /// No handler attached.
    Idle,
    /// A handler is attached and bootstrapping.
    Initializing,
    /// Handler active, no identity bound.
    Ready,
    /// A `connect` is in flight.
    Connecting,
    /// Identity bound; lobby and room operations are available.
    Connected,
    /// The handler is being torn down. Every operation fails fast.
    ShuttingDown,
}

impl FacadeState {
    /// Returns `true` if a handler is attached.
    pub fn has_handler(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        use FacadeState::*;

        matches!(
            (self, target),
            (Idle, Initializing)
                | (Initializing, Ready | Idle | ShuttingDown)
                | (Ready, Connecting | ShuttingDown)
                | (Connecting, Connected | Ready | ShuttingDown)
                | (Connected, Connecting | Ready | ShuttingDown)
                | (ShuttingDown, Idle)
        )
    }
}

impl fmt::Display for FacadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}
