//! Backend layer for Netbridge.
//!
//! Defines the [`BackendHandler`] contract the session facade talks to,
//! the [`EventEmitter`] handlers report through, and the concrete adapters.
//!
//! # Feature Flags
//!
//! - `dummy` (default): in-process simulation with configurable latency
//! - `matchmaking` (default): adapter for a room-based matchmaking service,
//!   plus an in-process [`LocalMatchmaker`]
//! - `relay` (default): adapter for a lobby + relay service pair, plus an
//!   in-process [`LocalRelayHub`]

mod emitter;
mod error;
mod handler;
mod wait;

#[cfg(feature = "dummy")]
pub mod dummy;
#[cfg(feature = "matchmaking")]
pub mod matchmaking;
#[cfg(feature = "relay")]
pub mod relay;

pub use emitter::{Completion, EventEmitter, Subscription};
pub use error::BackendError;
pub use handler::BackendHandler;
pub use wait::{WaitPolicy, bounded, wait_until};

#[cfg(feature = "dummy")]
pub use dummy::{DummyConfig, DummyHandler};
#[cfg(feature = "matchmaking")]
pub use matchmaking::{LocalMatchmaker, MatchmakingConfig, MatchmakingHandler};
#[cfg(feature = "relay")]
pub use relay::{LocalRelayHub, RelayConfig, RelayHandler};

#[cfg(feature = "rand")]
pub(crate) fn random_hex(len: usize) -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect()
}
