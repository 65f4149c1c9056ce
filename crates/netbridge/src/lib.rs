//! # Netbridge
//!
//! One session facade over swappable multiplayer backends.
//!
//! The application talks to a [`SessionFacade`](prelude::SessionFacade);
//! the facade forwards to whichever [`BackendHandler`](prelude::BackendHandler)
//! is active and republishes its events with roster and identity
//! bookkeeping applied.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use netbridge::prelude::*;
//!
//! # async fn demo() -> Result<(), NetbridgeError> {
//! netbridge::init_tracing();
//! let facade = SessionFacade::default();
//! facade.initialize(Arc::new(DummyHandler::default())).await?;
//! facade.connect("u1", "Alice").await?;
//! facade.create_lobby("Room1", None).await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::NetbridgeError;

pub use netbridge_backend as backend;
pub use netbridge_protocol as protocol;
pub use netbridge_session as session;
pub use netbridge_tick as tick;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str =
    "netbridge=info,netbridge_session=info,netbridge_backend=info,netbridge_tick=info";

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already set, in which case
/// nothing changes.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

pub mod prelude {
    pub use crate::NetbridgeError;
    pub use netbridge_backend::{
        BackendError, BackendHandler, DummyConfig, DummyHandler, LocalMatchmaker, LocalRelayHub,
        MatchmakingConfig, MatchmakingHandler, RelayConfig, RelayHandler, WaitPolicy,
    };
    pub use netbridge_protocol::{
        AccountId, NetworkEvent, NickName, Operation, OperationOutcome, Scope, Settings,
        SettingsFactory, StationId,
    };
    pub use netbridge_session::{
        FacadeConfig, FacadeState, SessionError, SessionFacade, SettingsHandle,
    };
    pub use netbridge_tick::{TickConfig, Tickable, UpdateLoop};
}
