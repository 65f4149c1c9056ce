//! In-process lobby and relay services.
//!
//! Lobbies expire when their host stops sending heartbeats, so tests can
//! exercise the keep-alive path with tokio's paused clock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use netbridge_protocol::AccountId;
use tokio::time::Instant;

use super::{
    CreateLobbyRequest, HOST_ID_KEY, LobbyMember, LobbyQuery, LobbyRecord, RelayAllocation,
    RelayServices,
};
use crate::{BackendError, random_hex};

const LOBBY_NOT_FOUND: &str = "lobby not found";
const LOBBY_FULL: &str = "lobby is full";
const LOBBY_LOCKED: &str = "lobby is locked";
const NOT_A_MEMBER: &str = "player is not a lobby member";
const ALLOCATION_NOT_FOUND: &str = "relay allocation not found";
const ALLOCATION_FULL: &str = "relay allocation is full";
const NOT_ON_RELAY: &str = "player is not connected to the relay";

fn rejected(text: &str) -> BackendError {
    BackendError::Rejected(text.to_owned())
}

struct HubLobby {
    record: LobbyRecord,
    last_heartbeat: Instant,
}

struct Allocation {
    join_code: String,
    capacity: usize,
    queues: BTreeMap<AccountId, VecDeque<Vec<u8>>>,
}

#[derive(Default)]
struct HubState {
    signed_in: BTreeSet<AccountId>,
    lobbies: BTreeMap<String, HubLobby>,
    allocations: BTreeMap<String, Allocation>,
}

impl HubState {
    fn purge(&mut self, ttl: Duration) {
        let before = self.lobbies.len();
        self.lobbies
            .retain(|_, lobby| lobby.last_heartbeat.elapsed() <= ttl);
        let expired = before - self.lobbies.len();
        if expired > 0 {
            tracing::debug!(expired, "expired idle lobbies");
        }
    }

    /// Finds a lobby by id or by its join code.
    fn lobby_mut(&mut self, id_or_code: &str) -> Result<&mut HubLobby, BackendError> {
        let key = if self.lobbies.contains_key(id_or_code) {
            id_or_code.to_owned()
        } else {
            self.lobbies
                .values()
                .find(|l| l.record.code.eq_ignore_ascii_case(id_or_code))
                .map(|l| l.record.id.clone())
                .ok_or_else(|| rejected(LOBBY_NOT_FOUND))?
        };
        self.lobbies
            .get_mut(&key)
            .ok_or_else(|| rejected(LOBBY_NOT_FOUND))
    }
}

/// Lobby service and packet relay living in this process.
///
/// Cloning shares the same state.
#[derive(Clone)]
pub struct LocalRelayHub {
    state: Arc<Mutex<HubState>>,
    lobby_ttl: Duration,
}

impl Default for LocalRelayHub {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOBBY_TTL)
    }
}

impl LocalRelayHub {
    pub const DEFAULT_LOBBY_TTL: Duration = Duration::from_secs(30);

    /// A hub whose lobbies expire `lobby_ttl` after their last heartbeat.
    pub fn new(lobby_ttl: Duration) -> Self {
        Self {
            state: Arc::default(),
            lobby_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live lobbies, after dropping expired ones.
    pub fn lobby_count(&self) -> usize {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);
        state.lobbies.len()
    }

    pub fn is_signed_in(&self, player_id: &str) -> bool {
        self.lock()
            .signed_in
            .iter()
            .any(|id| id.as_str() == player_id)
    }
}

#[async_trait]
impl RelayServices for LocalRelayHub {
    async fn sign_in(&self, player_id: Option<&str>) -> Result<AccountId, BackendError> {
        let id = match player_id {
            Some("") => return Err(rejected("player id must not be empty")),
            Some(id) => AccountId::from(id),
            None => AccountId::new(format!("anon_{}", random_hex(8))),
        };
        self.lock().signed_in.insert(id.clone());
        Ok(id)
    }

    async fn sign_out(&self, player_id: &AccountId) {
        self.lock().signed_in.remove(player_id);
    }

    async fn create_lobby(&self, request: CreateLobbyRequest) -> Result<LobbyRecord, BackendError> {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);

        let record = LobbyRecord {
            id: format!("lobby_{}", random_hex(8)),
            code: random_hex(6).to_uppercase(),
            name: request.name,
            host_id: request.host.id.clone(),
            max_players: request.max_players,
            is_private: request.is_private,
            is_locked: request.is_locked,
            members: vec![request.host],
            data: request.data,
        };
        tracing::debug!(lobby = %record.id, code = %record.code, "lobby created");
        state.lobbies.insert(
            record.id.clone(),
            HubLobby {
                record: record.clone(),
                last_heartbeat: Instant::now(),
            },
        );
        Ok(record)
    }

    async fn join_lobby(&self, lobby_id: &str, member: LobbyMember) -> Result<LobbyRecord, BackendError> {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);
        let lobby = state.lobby_mut(lobby_id)?;
        let record = &mut lobby.record;

        if record.member(member.id.as_str()).is_some() {
            return Ok(record.clone());
        }
        if record.is_locked {
            return Err(rejected(LOBBY_LOCKED));
        }
        if record.available_slots() == 0 {
            return Err(rejected(LOBBY_FULL));
        }
        record.members.push(member);
        Ok(record.clone())
    }

    async fn remove_player(&self, lobby_id: &str, player_id: &AccountId) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);
        let lobby = state.lobby_mut(lobby_id)?;
        let record = &mut lobby.record;

        let before = record.members.len();
        record.members.retain(|m| m.id != *player_id);
        if record.members.len() == before {
            return Err(rejected(NOT_A_MEMBER));
        }

        let id = record.id.clone();
        if record.members.is_empty() {
            state.lobbies.remove(&id);
            tracing::debug!(lobby = %id, "last member left, lobby removed");
        } else if record.host_id == *player_id {
            let next = record.members[0].id.clone();
            tracing::debug!(lobby = %id, host = %next, "host migrated");
            record.data.insert(HOST_ID_KEY.to_owned(), next.as_str().into());
            record.host_id = next;
            lobby.last_heartbeat = Instant::now();
        }
        Ok(())
    }

    async fn delete_lobby(&self, lobby_id: &str) -> Result<(), BackendError> {
        self.lock()
            .lobbies
            .remove(lobby_id)
            .map(|_| ())
            .ok_or_else(|| rejected(LOBBY_NOT_FOUND))
    }

    async fn get_lobby(&self, lobby_id: &str) -> Result<LobbyRecord, BackendError> {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);
        state
            .lobbies
            .get(lobby_id)
            .map(|l| l.record.clone())
            .ok_or_else(|| rejected(LOBBY_NOT_FOUND))
    }

    async fn query_lobbies(&self, query: LobbyQuery) -> Result<Vec<LobbyRecord>, BackendError> {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);
        Ok(state
            .lobbies
            .values()
            .map(|l| &l.record)
            .filter(|r| r.available_slots() >= query.min_available_slots)
            .filter(|r| {
                query
                    .name_contains
                    .as_deref()
                    .is_none_or(|needle| r.name.contains(needle))
            })
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn heartbeat(&self, lobby_id: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.purge(self.lobby_ttl);
        let lobby = state
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| rejected(LOBBY_NOT_FOUND))?;
        lobby.last_heartbeat = Instant::now();
        Ok(())
    }

    async fn allocate_relay(&self, max_players: u32, host: &AccountId) -> Result<RelayAllocation, BackendError> {
        let allocation = RelayAllocation {
            allocation_id: format!("alloc_{}", random_hex(8)),
            join_code: random_hex(6).to_uppercase(),
        };
        self.lock().allocations.insert(
            allocation.allocation_id.clone(),
            Allocation {
                join_code: allocation.join_code.clone(),
                capacity: max_players.max(1) as usize,
                queues: BTreeMap::from([(host.clone(), VecDeque::new())]),
            },
        );
        Ok(allocation)
    }

    async fn join_relay(&self, join_code: &str, player: &AccountId) -> Result<RelayAllocation, BackendError> {
        let mut state = self.lock();
        let (allocation_id, allocation) = state
            .allocations
            .iter_mut()
            .find(|(_, a)| a.join_code == join_code)
            .ok_or_else(|| rejected(ALLOCATION_NOT_FOUND))?;

        if !allocation.queues.contains_key(player) {
            if allocation.queues.len() >= allocation.capacity {
                return Err(rejected(ALLOCATION_FULL));
            }
            allocation.queues.insert(player.clone(), VecDeque::new());
        }
        Ok(RelayAllocation {
            allocation_id: allocation_id.clone(),
            join_code: allocation.join_code.clone(),
        })
    }

    async fn leave_relay(&self, allocation_id: &str, player: &AccountId) {
        let mut state = self.lock();
        let emptied = state
            .allocations
            .get_mut(allocation_id)
            .is_some_and(|a| {
                a.queues.remove(player);
                a.queues.is_empty()
            });
        if emptied {
            state.allocations.remove(allocation_id);
        }
    }

    async fn relay_send(
        &self,
        allocation_id: &str,
        from: &AccountId,
        to: Option<&AccountId>,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        let allocation = state
            .allocations
            .get_mut(allocation_id)
            .ok_or_else(|| rejected(ALLOCATION_NOT_FOUND))?;
        if !allocation.queues.contains_key(from) {
            return Err(rejected(NOT_ON_RELAY));
        }

        match to {
            Some(to) => allocation
                .queues
                .get_mut(to)
                .ok_or_else(|| rejected(NOT_ON_RELAY))?
                .push_back(payload.to_vec()),
            None => allocation
                .queues
                .iter_mut()
                .filter(|(id, _)| *id != from)
                .for_each(|(_, queue)| queue.push_back(payload.to_vec())),
        }
        Ok(())
    }

    async fn relay_drain(&self, allocation_id: &str, player: &AccountId) -> Result<Vec<Vec<u8>>, BackendError> {
        let mut state = self.lock();
        let queue = state
            .allocations
            .get_mut(allocation_id)
            .ok_or_else(|| rejected(ALLOCATION_NOT_FOUND))?
            .queues
            .get_mut(player)
            .ok_or_else(|| rejected(NOT_ON_RELAY))?;
        Ok(queue.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use netbridge_protocol::{NickName, PropertyMap};

    use super::*;

    fn member(id: &str) -> LobbyMember {
        LobbyMember {
            id: AccountId::from(id),
            name: NickName::from(id),
            data: PropertyMap::new(),
        }
    }

    fn request(name: &str, host: &str, max_players: u32) -> CreateLobbyRequest {
        CreateLobbyRequest {
            name: name.to_owned(),
            max_players,
            is_private: false,
            is_locked: false,
            host: member(host),
            data: PropertyMap::new(),
        }
    }

    #[tokio::test]
    async fn test_sign_in_anonymous_generates_id() {
        let hub = LocalRelayHub::default();
        let a = hub.sign_in(None).await.unwrap();
        let b = hub.sign_in(None).await.unwrap();
        assert!(a.as_str().starts_with("anon_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_join_lobby_full_rejected() {
        let hub = LocalRelayHub::default();
        let lobby = hub.create_lobby(request("Duel", "alice", 2)).await.unwrap();
        hub.join_lobby(&lobby.id, member("bob")).await.unwrap();

        let result = hub.join_lobby(&lobby.id, member("carol")).await;

        assert_eq!(result, Err(BackendError::Rejected(LOBBY_FULL.into())));
    }

    #[tokio::test]
    async fn test_join_lobby_locked_rejected() {
        let hub = LocalRelayHub::default();
        let lobby = hub
            .create_lobby(CreateLobbyRequest {
                is_locked: true,
                ..request("Closed", "alice", 4)
            })
            .await
            .unwrap();

        let result = hub.join_lobby(&lobby.id, member("bob")).await;

        assert_eq!(result, Err(BackendError::Rejected(LOBBY_LOCKED.into())));
    }

    #[tokio::test]
    async fn test_join_lobby_by_code_case_insensitive() {
        let hub = LocalRelayHub::default();
        let lobby = hub.create_lobby(request("Arena", "alice", 4)).await.unwrap();

        let joined = hub
            .join_lobby(&lobby.code.to_lowercase(), member("bob"))
            .await
            .unwrap();

        assert_eq!(joined.id, lobby.id);
        assert_eq!(joined.members.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_host_migrates_to_next_member() {
        let hub = LocalRelayHub::default();
        let lobby = hub.create_lobby(request("Arena", "alice", 4)).await.unwrap();
        hub.join_lobby(&lobby.id, member("bob")).await.unwrap();

        hub.remove_player(&lobby.id, &AccountId::from("alice"))
            .await
            .unwrap();

        let lobby = hub.get_lobby(&lobby.id).await.unwrap();
        assert_eq!(lobby.host_id.as_str(), "bob");
        assert_eq!(lobby.data.get(HOST_ID_KEY), Some(&"bob".into()));
    }

    #[tokio::test]
    async fn test_remove_last_member_deletes_lobby() {
        let hub = LocalRelayHub::default();
        let lobby = hub.create_lobby(request("Solo", "alice", 4)).await.unwrap();

        hub.remove_player(&lobby.id, &AccountId::from("alice"))
            .await
            .unwrap();

        assert_eq!(hub.lobby_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_expires_after_ttl_without_heartbeat() {
        let hub = LocalRelayHub::new(Duration::from_secs(10));
        let lobby = hub.create_lobby(request("Arena", "alice", 4)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(8)).await;
        hub.heartbeat(&lobby.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(hub.lobby_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hub.lobby_count(), 0);
        assert_eq!(
            hub.heartbeat(&lobby.id).await,
            Err(BackendError::Rejected(LOBBY_NOT_FOUND.into()))
        );
    }

    #[tokio::test]
    async fn test_query_lobbies_filters_by_name_and_slots() {
        let hub = LocalRelayHub::default();
        let full = hub.create_lobby(request("Arena One", "alice", 1)).await.unwrap();
        hub.create_lobby(request("Arena Two", "bob", 4)).await.unwrap();
        hub.create_lobby(request("Garden", "carol", 4)).await.unwrap();

        let found = hub
            .query_lobbies(LobbyQuery {
                name_contains: Some("Arena".into()),
                min_available_slots: 1,
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Arena Two");
        assert_ne!(found[0].id, full.id);
    }

    #[tokio::test]
    async fn test_relay_broadcast_skips_sender() {
        let hub = LocalRelayHub::default();
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        let allocation = hub.allocate_relay(4, &alice).await.unwrap();
        hub.join_relay(&allocation.join_code, &bob).await.unwrap();

        hub.relay_send(&allocation.allocation_id, &alice, None, b"move")
            .await
            .unwrap();

        let id = allocation.allocation_id.as_str();
        assert_eq!(hub.relay_drain(id, &bob).await.unwrap(), vec![b"move".to_vec()]);
        assert!(hub.relay_drain(id, &alice).await.unwrap().is_empty());
        assert!(hub.relay_drain(id, &bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_relay_over_capacity_rejected() {
        let hub = LocalRelayHub::default();
        let allocation = hub
            .allocate_relay(2, &AccountId::from("alice"))
            .await
            .unwrap();
        hub.join_relay(&allocation.join_code, &AccountId::from("bob"))
            .await
            .unwrap();

        let result = hub
            .join_relay(&allocation.join_code, &AccountId::from("carol"))
            .await;

        assert_eq!(result, Err(BackendError::Rejected(ALLOCATION_FULL.into())));
    }

    #[tokio::test]
    async fn test_leave_relay_last_player_frees_allocation() {
        let hub = LocalRelayHub::default();
        let alice = AccountId::from("alice");
        let allocation = hub.allocate_relay(2, &alice).await.unwrap();

        hub.leave_relay(&allocation.allocation_id, &alice).await;

        assert_eq!(
            hub.join_relay(&allocation.join_code, &alice).await,
            Err(BackendError::Rejected(ALLOCATION_NOT_FOUND.into()))
        );
    }
}
