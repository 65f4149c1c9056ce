//! The service-side surface the matchmaking adapter drives.
//!
//! A matchmaking client works the way most room services do: requests are
//! fire-and-forget, the outcome shows up later as a change in the client's
//! status, and things other participants do arrive as callbacks. The adapter
//! never reaches for a global client instance; it is handed an
//! `Arc<dyn MatchmakingClient>` at construction.

use netbridge_protocol::{AccountId, NickName, PropertyMap, Settings};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// Service-assigned number of a participant inside a room.
pub type ActorNumber = u32;

/// Event code the adapter uses for application payloads.
pub const DATA_EVENT_CODE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub actor: ActorNumber,
    pub user_id: AccountId,
    pub nick_name: NickName,
}

/// Where the client is in the service's connection flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClientPhase {
    #[default]
    Disconnected,
    ConnectingToMaster,
    ConnectedToMaster,
    JoiningLobby,
    InLobby,
    Joining,
    InRoom,
    Leaving,
}

/// The room the client currently sits in.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub name: String,
    pub master: ActorNumber,
    pub players: Vec<PlayerInfo>,
    pub options: RoomOptions,
}

impl RoomSnapshot {
    pub fn player(&self, user_id: &str) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.user_id.as_str() == user_id)
    }
}

/// Everything the adapter waits on, published through a `watch` channel.
///
/// `revision` increases on every change, so a waiter can tell "the service
/// answered my request" apart from "this was already the state".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientStatus {
    pub phase: ClientPhase,
    pub local: Option<PlayerInfo>,
    pub room: Option<RoomSnapshot>,
    /// Text of the last refused request, verbatim from the service.
    pub rejection: Option<String>,
    pub revision: u64,
}

impl ClientStatus {
    /// Connected to the master server and able to take requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.phase,
            ClientPhase::ConnectedToMaster
                | ClientPhase::JoiningLobby
                | ClientPhase::InLobby
                | ClientPhase::Joining
                | ClientPhase::InRoom
                | ClientPhase::Leaving
        )
    }

    pub fn in_lobby(&self) -> bool {
        self.phase == ClientPhase::InLobby
    }

    pub fn in_room(&self) -> bool {
        self.phase == ClientPhase::InRoom && self.room.is_some()
    }

    pub fn is_master(&self) -> bool {
        match (&self.local, &self.room) {
            (Some(local), Some(room)) => room.master == local.actor,
            _ => false,
        }
    }
}

/// Room creation parameters in the service's own terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOptions {
    pub max_players: u32,
    pub is_visible: bool,
    pub is_open: bool,
    pub custom_properties: PropertyMap,
    /// Custom property keys exposed in room listings.
    pub lobby_properties: Vec<String>,
}

impl RoomOptions {
    /// Converts already-conformed settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let lobby_properties = settings
            .extension(super::LOBBY_PROPERTIES)
            .and_then(|v| v.as_array())
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            max_players: settings.max_players,
            is_visible: settings.is_visible,
            is_open: settings.is_open,
            custom_properties: settings.custom_properties.clone(),
            lobby_properties,
        }
    }
}

/// One entry of the lobby's room list.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub name: String,
    pub player_count: u32,
    pub max_players: u32,
    pub is_visible: bool,
    pub is_open: bool,
    /// Only the properties the creator exposed to listings.
    pub custom_properties: PropertyMap,
}

impl RoomInfo {
    pub fn has_free_slot(&self) -> bool {
        self.player_count < self.max_players
    }
}

/// Who a raised event goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receivers {
    /// Everyone in the room except the sender.
    Others,
    Actors(Vec<ActorNumber>),
}

/// Something another participant (or the service) did.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCallback {
    PlayerEntered(PlayerInfo),
    PlayerLeft(PlayerInfo),
    MasterSwitched(PlayerInfo),
    Event {
        code: u8,
        data: Vec<u8>,
        sender: ActorNumber,
    },
    Disconnected { cause: String },
}

/// Handle to a room-based matchmaking service.
///
/// Request methods return immediately; their outcome is observed through
/// [`status`](Self::status).
pub trait MatchmakingClient: Send + Sync + 'static {
    fn status(&self) -> watch::Receiver<ClientStatus>;

    /// Opens a fresh callback stream, replacing any previous one.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ServiceCallback>;

    fn connect_to_master(&self, app_version: &str);

    /// Sets the user id and nickname other participants will see.
    fn set_identity(&self, user_id: &str, nick_name: &str);

    fn join_lobby(&self);

    fn create_room(&self, name: &str, options: RoomOptions);

    fn join_room(&self, name: &str);

    fn leave_room(&self);

    fn disconnect(&self);

    fn raise_event(&self, code: u8, data: &[u8], receivers: Receivers);

    /// Rooms currently known to the lobby, unfiltered.
    fn room_list(&self) -> Vec<RoomInfo>;
}
