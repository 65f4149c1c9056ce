//! The lobby + relay service surface the relay adapter drives.

use async_trait::async_trait;
use netbridge_protocol::{AccountId, NickName, PropertyMap};

use crate::BackendError;

/// Lobby data key holding the relay join code.
pub const JOIN_CODE_KEY: &str = "JoinCode";

/// Lobby data key holding the host's account id.
pub const HOST_ID_KEY: &str = "HostId";

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyMember {
    pub id: AccountId,
    pub name: NickName,
    pub data: PropertyMap,
}

/// A lobby as the service reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyRecord {
    pub id: String,
    /// Short human-shareable code.
    pub code: String,
    pub name: String,
    pub host_id: AccountId,
    pub max_players: u32,
    pub is_private: bool,
    pub is_locked: bool,
    pub members: Vec<LobbyMember>,
    pub data: PropertyMap,
}

impl LobbyRecord {
    pub fn available_slots(&self) -> u32 {
        self.max_players
            .saturating_sub(self.members.len() as u32)
    }

    pub fn member(&self, id: &str) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.id.as_str() == id)
    }

    pub fn join_code(&self) -> Option<&str> {
        self.data.get(JOIN_CODE_KEY).and_then(|v| v.as_str())
    }

    /// The host's nickname, or `"Unknown"` if the host isn't a member.
    pub fn host_name(&self) -> &str {
        self.member(self.host_id.as_str())
            .map(|m| m.name.as_str())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateLobbyRequest {
    pub name: String,
    pub max_players: u32,
    pub is_private: bool,
    pub is_locked: bool,
    pub host: LobbyMember,
    pub data: PropertyMap,
}

/// Server-side lobby filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyQuery {
    pub name_contains: Option<String>,
    pub min_available_slots: u32,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAllocation {
    pub allocation_id: String,
    pub join_code: String,
}

/// Handle to the authentication, lobby and relay services.
///
/// Errors are returned as [`BackendError::Rejected`] carrying the service's
/// own text.
#[async_trait]
pub trait RelayServices: Send + Sync + 'static {
    /// Signs in as `player_id`, or anonymously when `None`.
    async fn sign_in(&self, player_id: Option<&str>) -> Result<AccountId, BackendError>;

    async fn sign_out(&self, player_id: &AccountId);

    async fn create_lobby(&self, request: CreateLobbyRequest) -> Result<LobbyRecord, BackendError>;

    async fn join_lobby(&self, lobby_id: &str, member: LobbyMember) -> Result<LobbyRecord, BackendError>;

    async fn remove_player(&self, lobby_id: &str, player_id: &AccountId) -> Result<(), BackendError>;

    async fn delete_lobby(&self, lobby_id: &str) -> Result<(), BackendError>;

    async fn get_lobby(&self, lobby_id: &str) -> Result<LobbyRecord, BackendError>;

    async fn query_lobbies(&self, query: LobbyQuery) -> Result<Vec<LobbyRecord>, BackendError>;

    async fn heartbeat(&self, lobby_id: &str) -> Result<(), BackendError>;

    async fn allocate_relay(&self, max_players: u32, host: &AccountId) -> Result<RelayAllocation, BackendError>;

    async fn join_relay(&self, join_code: &str, player: &AccountId) -> Result<RelayAllocation, BackendError>;

    async fn leave_relay(&self, allocation_id: &str, player: &AccountId);

    /// Queues `payload` for `to`, or for every other participant when `None`.
    async fn relay_send(
        &self,
        allocation_id: &str,
        from: &AccountId,
        to: Option<&AccountId>,
        payload: &[u8],
    ) -> Result<(), BackendError>;

    /// Takes everything queued for `player`.
    async fn relay_drain(&self, allocation_id: &str, player: &AccountId) -> Result<Vec<Vec<u8>>, BackendError>;
}
