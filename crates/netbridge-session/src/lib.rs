//! Session facade for Netbridge.
//!
//! Applications talk to one [`SessionFacade`]. It owns at most one
//! backend handler at a time and gives every backend the same shape:
//!
//! 1. **Lifecycle**: attach/initialize, connect, disconnect, shut down,
//!    tracked as a [`FacadeState`] machine
//! 2. **Event translation**: backend events update the connection flag,
//!    host flag, identity mirror and [`Roster`] before they are republished
//! 3. **Settings staging**: [`SessionFacade::prepare_settings`] hands out a
//!    [`SettingsHandle`] the next create operation consumes
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)  ← calls the facade, subscribes to its events
//!     ↕
//! Session Layer (this crate)  ← owns the active handler, derives state
//!     ↕
//! Backend Layer (below)  ← BackendHandler implementations
//! ```

mod config;
mod error;
mod facade;
mod roster;
mod settings;
mod state;

pub use config::FacadeConfig;
pub use error::SessionError;
pub use facade::SessionFacade;
pub use roster::Roster;
pub use settings::SettingsHandle;
pub use state::FacadeState;
