//! In-process matchmaking service.
//!
//! Good enough to run several [`MatchmakingHandler`](super::MatchmakingHandler)s
//! against each other in one process: rooms with capacity and visibility,
//! master migration when the master leaves, version-separated room lists,
//! and a stall switch that stops the service from answering requests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use netbridge_protocol::{AccountId, NickName};
use tokio::sync::{mpsc, watch};

use super::{
    ActorNumber, ClientPhase, ClientStatus, MatchmakingClient, PlayerInfo, Receivers, RoomInfo,
    RoomOptions, RoomSnapshot, ServiceCallback,
};

pub const ROOM_EXISTS: &str = "A game with the specified id already exist.";
pub const ROOM_MISSING: &str = "Game does not exist";
pub const ROOM_FULL: &str = "Game full";
pub const ROOM_CLOSED: &str = "Game closed";
const NOT_READY: &str = "Operation not allowed while not connected to the master server";

type ClientId = u64;

struct Slot {
    status: watch::Sender<ClientStatus>,
    callbacks: Option<mpsc::UnboundedSender<ServiceCallback>>,
    user_id: String,
    nick_name: String,
    app_version: String,
}

struct Room {
    options: RoomOptions,
    app_version: String,
    members: Vec<ClientId>,
    master: ClientId,
}

#[derive(Default)]
struct Hub {
    next_client: ClientId,
    next_actor: ActorNumber,
    clients: BTreeMap<ClientId, Slot>,
    rooms: BTreeMap<String, Room>,
    stalled: bool,
}

impl Hub {
    fn update(&self, id: ClientId, f: impl FnOnce(&mut ClientStatus)) {
        if let Some(slot) = self.clients.get(&id) {
            slot.status.send_modify(|status| {
                f(status);
                status.revision += 1;
            });
        }
    }

    fn notify(&self, id: ClientId, callback: ServiceCallback) {
        if let Some(tx) = self.clients.get(&id).and_then(|slot| slot.callbacks.as_ref()) {
            // A closed stream just means nobody is listening any more.
            let _ = tx.send(callback);
        }
    }

    fn player(&self, id: ClientId) -> Option<PlayerInfo> {
        self.clients
            .get(&id)
            .and_then(|slot| slot.status.borrow().local.clone())
    }

    fn phase(&self, id: ClientId) -> ClientPhase {
        self.clients
            .get(&id)
            .map(|slot| slot.status.borrow().phase)
            .unwrap_or_default()
    }

    fn is_ready(&self, id: ClientId) -> bool {
        self.clients
            .get(&id)
            .is_some_and(|slot| slot.status.borrow().is_ready())
    }

    fn room_of(&self, id: ClientId) -> Option<String> {
        self.rooms
            .iter()
            .find(|(_, room)| room.members.contains(&id))
            .map(|(name, _)| name.clone())
    }

    fn reject(&self, id: ClientId, text: &str) {
        tracing::debug!(client = id, text, "local matchmaker rejected request");
        self.update(id, |s| s.rejection = Some(text.to_owned()));
    }

    /// Pushes the current room snapshot to every member.
    fn refresh_room(&self, name: &str) {
        let Some(room) = self.rooms.get(name) else {
            return;
        };
        let players: Vec<PlayerInfo> = room
            .members
            .iter()
            .filter_map(|id| self.player(*id))
            .collect();
        let master = self.player(room.master).map(|p| p.actor).unwrap_or_default();
        let snapshot = RoomSnapshot {
            name: name.to_owned(),
            master,
            players,
            options: room.options.clone(),
        };

        for id in &room.members {
            let snapshot = snapshot.clone();
            self.update(*id, move |s| {
                s.phase = ClientPhase::InRoom;
                s.room = Some(snapshot);
            });
        }
    }

    /// Removes `id` from its room, migrating the master role if needed.
    fn leave(&mut self, id: ClientId) {
        let Some(name) = self.room_of(id) else {
            return;
        };
        let leaver = self.player(id);

        let (remaining, new_master) = match self.rooms.get_mut(&name) {
            Some(room) => {
                room.members.retain(|member| *member != id);
                let migrated = room.master == id && !room.members.is_empty();
                if migrated {
                    room.master = room.members[0];
                }
                (room.members.clone(), migrated.then_some(room.master))
            }
            None => return,
        };

        if remaining.is_empty() {
            self.rooms.remove(&name);
        } else {
            if let Some(leaver) = leaver {
                for member in &remaining {
                    self.notify(*member, ServiceCallback::PlayerLeft(leaver.clone()));
                }
            }
            if let Some(master) = new_master.and_then(|m| self.player(m)) {
                for member in &remaining {
                    self.notify(*member, ServiceCallback::MasterSwitched(master.clone()));
                }
            }
            self.refresh_room(&name);
        }

        self.update(id, |s| {
            s.phase = ClientPhase::ConnectedToMaster;
            s.room = None;
        });
    }

    fn drop_connection(&mut self, id: ClientId, cause: &str) {
        self.leave(id);
        self.update(id, |s| {
            s.phase = ClientPhase::Disconnected;
            s.local = None;
            s.room = None;
        });
        self.notify(
            id,
            ServiceCallback::Disconnected {
                cause: cause.to_owned(),
            },
        );
    }
}

/// Shared in-process service. Cloning shares the same rooms.
#[derive(Clone, Default)]
pub struct LocalMatchmaker {
    hub: Arc<Mutex<Hub>>,
}

impl LocalMatchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client connection.
    pub fn client(&self) -> Arc<LocalMatchmakingClient> {
        let mut hub = lock(&self.hub);
        hub.next_client += 1;
        let id = hub.next_client;
        let (status, _) = watch::channel(ClientStatus::default());
        hub.clients.insert(
            id,
            Slot {
                status,
                callbacks: None,
                user_id: String::new(),
                nick_name: String::new(),
                app_version: String::new(),
            },
        );

        Arc::new(LocalMatchmakingClient {
            id,
            hub: Arc::clone(&self.hub),
        })
    }

    /// While stalled, connect/join/create/leave requests are accepted but
    /// never answered.
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.hub).stalled = stalled;
    }

    /// Drops the connection of the client with `user_id`, as if the server
    /// had closed it. Returns `false` if nobody has that id.
    pub fn kick(&self, user_id: &str) -> bool {
        let mut hub = lock(&self.hub);
        let target = hub
            .clients
            .iter()
            .find(|(_, slot)| slot.user_id == user_id)
            .map(|(id, _)| *id);

        match target {
            Some(id) => {
                hub.drop_connection(id, "kicked by server");
                true
            }
            None => false,
        }
    }

    pub fn room_count(&self) -> usize {
        lock(&self.hub).rooms.len()
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One connection to a [`LocalMatchmaker`].
pub struct LocalMatchmakingClient {
    id: ClientId,
    hub: Arc<Mutex<Hub>>,
}

impl Drop for LocalMatchmakingClient {
    fn drop(&mut self) {
        let mut hub = lock(&self.hub);
        hub.leave(self.id);
        hub.clients.remove(&self.id);
    }
}

impl MatchmakingClient for LocalMatchmakingClient {
    fn status(&self) -> watch::Receiver<ClientStatus> {
        lock(&self.hub)
            .clients
            .get(&self.id)
            .map(|slot| slot.status.subscribe())
            .unwrap_or_else(|| watch::channel(ClientStatus::default()).1)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ServiceCallback> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(slot) = lock(&self.hub).clients.get_mut(&self.id) {
            slot.callbacks = Some(tx);
        }
        rx
    }

    fn connect_to_master(&self, app_version: &str) {
        let mut hub = lock(&self.hub);
        if hub.stalled {
            hub.update(self.id, |s| s.phase = ClientPhase::ConnectingToMaster);
            return;
        }

        hub.next_actor += 1;
        let actor = hub.next_actor;
        let Some(slot) = hub.clients.get_mut(&self.id) else {
            return;
        };
        if slot.user_id.is_empty() {
            slot.user_id = format!("player{actor}");
        }
        slot.app_version = app_version.to_owned();
        let local = PlayerInfo {
            actor,
            user_id: AccountId::new(slot.user_id.clone()),
            nick_name: NickName::new(slot.nick_name.clone()),
        };

        hub.update(self.id, |s| {
            s.phase = ClientPhase::ConnectedToMaster;
            s.local = Some(local);
            s.rejection = None;
        });
    }

    fn set_identity(&self, user_id: &str, nick_name: &str) {
        let mut hub = lock(&self.hub);
        if let Some(slot) = hub.clients.get_mut(&self.id) {
            slot.user_id = user_id.to_owned();
            slot.nick_name = nick_name.to_owned();
        }
        hub.update(self.id, |s| {
            if let Some(local) = s.local.as_mut() {
                local.user_id = AccountId::from(user_id);
                local.nick_name = NickName::from(nick_name);
            }
        });
        if let Some(room) = hub.room_of(self.id) {
            hub.refresh_room(&room);
        }
    }

    fn join_lobby(&self) {
        let hub = lock(&self.hub);
        if hub.stalled {
            hub.update(self.id, |s| s.phase = ClientPhase::JoiningLobby);
            return;
        }
        if hub.is_ready(self.id) && hub.room_of(self.id).is_none() {
            hub.update(self.id, |s| s.phase = ClientPhase::InLobby);
        }
    }

    fn create_room(&self, name: &str, options: RoomOptions) {
        let mut hub = lock(&self.hub);
        hub.update(self.id, |s| s.rejection = None);
        if hub.stalled {
            hub.update(self.id, |s| s.phase = ClientPhase::Joining);
            return;
        }
        if !hub.is_ready(self.id) {
            return hub.reject(self.id, NOT_READY);
        }
        if hub.rooms.contains_key(name) {
            return hub.reject(self.id, ROOM_EXISTS);
        }

        hub.leave(self.id);
        let app_version = hub
            .clients
            .get(&self.id)
            .map(|slot| slot.app_version.clone())
            .unwrap_or_default();
        hub.rooms.insert(
            name.to_owned(),
            Room {
                options,
                app_version,
                members: vec![self.id],
                master: self.id,
            },
        );
        hub.refresh_room(name);
    }

    fn join_room(&self, name: &str) {
        let mut hub = lock(&self.hub);
        hub.update(self.id, |s| s.rejection = None);
        if hub.stalled {
            hub.update(self.id, |s| s.phase = ClientPhase::Joining);
            return;
        }
        if !hub.is_ready(self.id) {
            return hub.reject(self.id, NOT_READY);
        }

        let version = hub
            .clients
            .get(&self.id)
            .map(|slot| slot.app_version.clone())
            .unwrap_or_default();
        let refusal = match hub.rooms.get(name) {
            None => Some(ROOM_MISSING),
            Some(room) if room.app_version != version => Some(ROOM_MISSING),
            Some(room) if room.members.contains(&self.id) => None,
            Some(room) if !room.options.is_open => Some(ROOM_CLOSED),
            Some(room) if room.members.len() >= room.options.max_players as usize => {
                Some(ROOM_FULL)
            }
            Some(_) => None,
        };
        if let Some(text) = refusal {
            return hub.reject(self.id, text);
        }

        if hub.room_of(self.id).as_deref() != Some(name) {
            hub.leave(self.id);
            let joiner = hub.player(self.id);
            let others = match hub.rooms.get_mut(name) {
                Some(room) => {
                    let others = room.members.clone();
                    room.members.push(self.id);
                    others
                }
                None => Vec::new(),
            };
            if let Some(joiner) = joiner {
                for member in others {
                    hub.notify(member, ServiceCallback::PlayerEntered(joiner.clone()));
                }
            }
        }
        hub.refresh_room(name);
    }

    fn leave_room(&self) {
        let mut hub = lock(&self.hub);
        if hub.stalled {
            if hub.phase(self.id) == ClientPhase::InRoom {
                hub.update(self.id, |s| s.phase = ClientPhase::Leaving);
            }
            return;
        }
        hub.leave(self.id);
    }

    fn disconnect(&self) {
        let mut hub = lock(&self.hub);
        if hub.phase(self.id) != ClientPhase::Disconnected {
            hub.drop_connection(self.id, "client disconnect");
        }
    }

    fn raise_event(&self, code: u8, data: &[u8], receivers: Receivers) {
        let hub = lock(&self.hub);
        let Some(room) = hub.room_of(self.id).and_then(|name| hub.rooms.get(&name)) else {
            return;
        };
        let Some(sender) = hub.player(self.id) else {
            return;
        };

        for member in &room.members {
            let deliver = match &receivers {
                Receivers::Others => *member != self.id,
                Receivers::Actors(actors) => hub
                    .player(*member)
                    .is_some_and(|p| actors.contains(&p.actor)),
            };
            if deliver {
                hub.notify(
                    *member,
                    ServiceCallback::Event {
                        code,
                        data: data.to_vec(),
                        sender: sender.actor,
                    },
                );
            }
        }
    }

    fn room_list(&self) -> Vec<RoomInfo> {
        let hub = lock(&self.hub);
        let version = hub
            .clients
            .get(&self.id)
            .map(|slot| slot.app_version.as_str())
            .unwrap_or_default();

        hub.rooms
            .iter()
            .filter(|(_, room)| room.app_version == version)
            .map(|(name, room)| RoomInfo {
                name: name.clone(),
                player_count: room.members.len() as u32,
                max_players: room.options.max_players,
                is_visible: room.options.is_visible,
                is_open: room.options.is_open,
                custom_properties: room
                    .options
                    .custom_properties
                    .iter()
                    .filter(|(key, _)| room.options.lobby_properties.contains(key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            })
            .collect()
    }
}
