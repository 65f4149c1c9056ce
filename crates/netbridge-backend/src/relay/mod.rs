//! Adapter for a lobby service paired with a packet relay.
//!
//! Nothing is pushed to us here: membership, host changes and incoming
//! packets are all discovered by polling. [`RelayHandler`]'s `update_state`
//! schedules that polling (plus the host's lobby heartbeat) on a background
//! task, at most one at a time.

mod handler;
mod local;
mod services;

pub use handler::{RelayConfig, RelayHandler};
pub use local::LocalRelayHub;
pub use services::{
    CreateLobbyRequest, HOST_ID_KEY, JOIN_CODE_KEY, LobbyMember, LobbyQuery, LobbyRecord,
    RelayAllocation, RelayServices,
};

use netbridge_protocol::{Settings, SettingsFactory};

/// Extension namespace and log name.
pub const BACKEND: &str = "relay";

/// Extension key: public data attached to the local player in the lobby.
pub const PLAYER_DATA: &str = "relay.player_data";

/// Default [`Settings`] for the relay backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaySettingsFactory;

impl SettingsFactory for RelaySettingsFactory {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn create_settings(&self) -> Settings {
        let mut settings = Settings::for_backend(BACKEND)
            .with_max_players(4)
            .with_property("gameMode", "Default");
        settings.set_extension(PLAYER_DATA, serde_json::json!({}));
        settings
    }
}
