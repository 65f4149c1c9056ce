//! Adapter for a room-based matchmaking service.
//!
//! The service is push-driven: requests are answered by status changes and
//! other participants' actions arrive as callbacks, which a pump task owned
//! by the handler turns into [`NetworkEvent`](netbridge_protocol::NetworkEvent)s.
//! Lobbies and rooms are both service rooms; they differ only in the
//! completion event reported.

mod client;
mod handler;
mod local;

pub use client::{
    ActorNumber, ClientPhase, ClientStatus, DATA_EVENT_CODE, MatchmakingClient, PlayerInfo,
    Receivers, RoomInfo, RoomOptions, RoomSnapshot, ServiceCallback,
};
pub use handler::{MatchmakingConfig, MatchmakingHandler};
pub use local::{LocalMatchmaker, LocalMatchmakingClient, ROOM_CLOSED, ROOM_EXISTS, ROOM_FULL, ROOM_MISSING};

use netbridge_protocol::{Settings, SettingsFactory};

/// Extension namespace and log name.
pub const BACKEND: &str = "matchmaking";

/// Extension key: custom property names exposed in room listings.
pub const LOBBY_PROPERTIES: &str = "matchmaking.lobby_properties";

/// Default [`Settings`] for the matchmaking backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchmakingSettingsFactory;

impl SettingsFactory for MatchmakingSettingsFactory {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn create_settings(&self) -> Settings {
        let mut settings = Settings::for_backend(BACKEND)
            .with_max_players(4)
            .with_property("gameMode", "Default");
        settings.set_extension(LOBBY_PROPERTIES, serde_json::json!(["gameMode"]));
        settings
    }
}
