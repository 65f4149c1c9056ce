use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use netbridge_protocol::{
    AccountId, NetworkEvent, NickName, Operation, PropertyMap, Scope, Settings, SettingsFactory,
    StationId,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    BACKEND, CreateLobbyRequest, HOST_ID_KEY, JOIN_CODE_KEY, LobbyMember, LobbyQuery,
    LobbyRecord, PLAYER_DATA, RelayAllocation, RelayServices, RelaySettingsFactory,
};
use crate::{BackendError, BackendHandler, Completion, EventEmitter, WaitPolicy, bounded};

/// Configuration for [`RelayHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upper bound on every service call.
    pub wait: WaitPolicy,
    /// How often the host pings the lobby to keep it alive.
    pub heartbeat_interval: Duration,
    /// Most lobbies a search returns.
    pub query_limit: usize,
}

impl RelayConfig {
    /// 15 s heartbeat, 25 search results.
    pub fn new(wait: WaitPolicy) -> Self {
        Self {
            wait,
            heartbeat_interval: Duration::from_secs(15),
            query_limit: 25,
        }
    }

    pub fn validated(mut self) -> Self {
        self.wait = self.wait.validated();
        self.heartbeat_interval = self.heartbeat_interval.max(Duration::from_millis(100));
        self.query_limit = self.query_limit.max(1);
        self
    }
}

struct Session {
    lobby: LobbyRecord,
    allocation: RelayAllocation,
    last_heartbeat: Instant,
}

#[derive(Default)]
struct RelayState {
    initialized: bool,
    signed_in: bool,
    closing: bool,
    host: bool,
    account_id: Option<AccountId>,
    nick_name: Option<NickName>,
    session: Option<Session>,
    maintenance: Option<JoinHandle<()>>,
}

impl RelayState {
    /// Diffs a fresh lobby record against the one we hold.
    fn apply_lobby(&mut self, lobby: LobbyRecord, me: &AccountId) -> Vec<NetworkEvent> {
        if lobby.member(me.as_str()).is_none() {
            tracing::warn!(backend = BACKEND, lobby = %lobby.id, "no longer a lobby member");
            return self.lose_session(me);
        }
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        let mut events: Vec<NetworkEvent> = session
            .lobby
            .members
            .iter()
            .filter(|old| lobby.member(old.id.as_str()).is_none())
            .map(|gone| NetworkEvent::PlayerDisconnected {
                id: gone.id.clone(),
                name: gone.name.clone(),
            })
            .collect();
        events.extend(
            lobby
                .members
                .iter()
                .filter(|m| session.lobby.member(m.id.as_str()).is_none())
                .map(|joined| NetworkEvent::PlayerConnected {
                    id: joined.id.clone(),
                    name: joined.name.clone(),
                }),
        );

        let host = lobby.host_id == *me;
        session.lobby = lobby;
        if host != self.host {
            tracing::info!(backend = BACKEND, host, "host changed");
            self.host = host;
            events.push(NetworkEvent::HostStatusChanged(host));
        }
        events
    }

    /// Drops a lobby that disappeared or dropped us.
    fn lose_session(&mut self, me: &AccountId) -> Vec<NetworkEvent> {
        let mut events: Vec<NetworkEvent> = self
            .session
            .take()
            .map(|session| {
                session
                    .lobby
                    .members
                    .into_iter()
                    .filter(|m| m.id != *me)
                    .map(|m| NetworkEvent::PlayerDisconnected {
                        id: m.id,
                        name: m.name,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if self.host {
            self.host = false;
            events.push(NetworkEvent::HostStatusChanged(false));
        }
        events
    }
}

struct Inner {
    services: Arc<dyn RelayServices>,
    config: RelayConfig,
    events: EventEmitter,
    state: Mutex<RelayState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signed-in identity. The nickname falls back to the account id.
    fn me(&self) -> Result<(AccountId, NickName), BackendError> {
        let state = self.lock();
        match (&state.account_id, state.signed_in) {
            (Some(id), true) => {
                let name = state
                    .nick_name
                    .clone()
                    .unwrap_or_else(|| NickName::new(id.as_str()));
                Ok((id.clone(), name))
            }
            _ => Err(BackendError::NotConnected),
        }
    }

    /// One polling pass: heartbeat if due, refresh membership, drain packets.
    async fn maintain(self: Arc<Self>) {
        let snapshot = {
            let state = self.lock();
            match (&state.session, &state.account_id) {
                (Some(session), Some(me)) => Some((
                    session.lobby.id.clone(),
                    session.allocation.allocation_id.clone(),
                    me.clone(),
                    state.host
                        && session.last_heartbeat.elapsed() >= self.config.heartbeat_interval,
                )),
                _ => None,
            }
        };
        let Some((lobby_id, allocation_id, me, heartbeat_due)) = snapshot else {
            return;
        };
        let wait = self.config.wait;

        if heartbeat_due {
            match bounded(wait, "Heartbeat", self.services.heartbeat(&lobby_id)).await {
                Ok(()) => {
                    let mut state = self.lock();
                    if let Some(session) = state.session.as_mut() {
                        if session.lobby.id == lobby_id {
                            session.last_heartbeat = Instant::now();
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(backend = BACKEND, lobby = %lobby_id, error = %err, "heartbeat failed");
                }
            }
        }

        let refreshed = bounded(wait, "GetLobby", self.services.get_lobby(&lobby_id)).await;
        let packets = bounded(
            wait,
            "RelayDrain",
            self.services.relay_drain(&allocation_id, &me),
        )
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(backend = BACKEND, error = %err, "relay drain failed");
            Vec::new()
        });

        let mut events = {
            let mut state = self.lock();
            let current = state
                .session
                .as_ref()
                .is_some_and(|s| s.lobby.id == lobby_id);
            if !current {
                // We left or switched lobbies while polling.
                return;
            }
            match refreshed {
                Ok(lobby) => state.apply_lobby(lobby, &me),
                Err(err) => {
                    tracing::warn!(backend = BACKEND, lobby = %lobby_id, error = %err, "lobby lost");
                    state.lose_session(&me)
                }
            }
        };
        events.extend(packets.into_iter().map(NetworkEvent::DataReceived));
        self.events.emit_all(events);
    }
}

fn player_data(settings: &Settings) -> PropertyMap {
    settings
        .extension(PLAYER_DATA)
        .and_then(|value| value.as_object())
        .map(|data| {
            data.iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Backend over a [`RelayServices`] handle.
pub struct RelayHandler {
    factory: RelaySettingsFactory,
    inner: Arc<Inner>,
}

impl RelayHandler {
    pub fn new(services: Arc<dyn RelayServices>, config: RelayConfig) -> Self {
        Self {
            factory: RelaySettingsFactory,
            inner: Arc::new(Inner {
                services,
                config: config.validated(),
                events: EventEmitter::new(),
                state: Mutex::new(RelayState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn is_host(&self) -> bool {
        self.inner.lock().host
    }

    /// Short code of the current lobby, for sharing with friends.
    pub fn lobby_code(&self) -> Option<String> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.lobby.code.clone())
    }

    fn wait(&self) -> WaitPolicy {
        self.inner.config.wait
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.inner.lock().closing {
            Err(BackendError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn stop_maintenance(&self) {
        if let Some(task) = self.inner.lock().maintenance.take() {
            task.abort();
        }
    }

    /// Leaves the current lobby and relay without reporting a completion.
    ///
    /// The host deletes the lobby; anyone else removes themselves.
    async fn leave_session(&self) -> Vec<NetworkEvent> {
        let (session, me, was_host) = {
            let mut state = self.inner.lock();
            let was_host = state.host;
            state.host = false;
            (state.session.take(), state.account_id.clone(), was_host)
        };

        if let (Some(session), Some(me)) = (session, me) {
            let services = &self.inner.services;
            let lobby_id = session.lobby.id.as_str();
            let left = if was_host {
                bounded(self.wait(), "DeleteLobby", services.delete_lobby(lobby_id)).await
            } else {
                bounded(
                    self.wait(),
                    "RemovePlayer",
                    services.remove_player(lobby_id, &me),
                )
                .await
            };
            if let Err(err) = left {
                tracing::warn!(backend = BACKEND, lobby = lobby_id, error = %err, "leaving lobby failed");
            }

            let allocation_id = session.allocation.allocation_id.as_str();
            let released = bounded(self.wait(), "LeaveRelay", async {
                services.leave_relay(allocation_id, &me).await;
                Ok(())
            })
            .await;
            if let Err(err) = released {
                tracing::warn!(backend = BACKEND, error = %err, "leaving relay failed");
            }
            tracing::info!(backend = BACKEND, lobby = lobby_id, was_host, "left lobby");
        }

        if was_host {
            vec![NetworkEvent::HostStatusChanged(false)]
        } else {
            Vec::new()
        }
    }

    /// Signs out. Returns `true` if we were signed in.
    async fn sign_out(&self) -> bool {
        let signed_in = {
            let mut state = self.inner.lock();
            let was_signed_in = state.signed_in;
            let account = state.account_id.take().filter(|_| was_signed_in);
            state.signed_in = false;
            state.nick_name = None;
            account
        };

        let Some(account) = signed_in else {
            return false;
        };
        let services = &self.inner.services;
        let done = bounded(self.wait(), "SignOut", async {
            services.sign_out(&account).await;
            Ok(())
        })
        .await;
        if let Err(err) = done {
            tracing::warn!(backend = BACKEND, error = %err, "sign-out did not complete");
        }
        true
    }

    async fn create_inner(&self, name: &str, settings: Settings) -> Completion {
        self.ensure_open()?;
        let (me, nick) = self.inner.me()?;

        for key in settings.foreign_extensions(BACKEND) {
            tracing::debug!(backend = BACKEND, key, "ignoring foreign settings extension");
        }
        let effective = settings.conform_to(&self.factory.create_settings());

        let mut events = self.leave_session().await;
        let services = &self.inner.services;
        let allocation = bounded(
            self.wait(),
            "AllocateRelay",
            services.allocate_relay(effective.max_players, &me),
        )
        .await?;

        let mut data = effective.custom_properties.clone();
        data.insert(JOIN_CODE_KEY.to_owned(), allocation.join_code.clone().into());
        data.insert(HOST_ID_KEY.to_owned(), me.as_str().into());
        let request = CreateLobbyRequest {
            name: name.to_owned(),
            max_players: effective.max_players,
            is_private: !effective.is_visible,
            is_locked: !effective.is_open,
            host: LobbyMember {
                id: me.clone(),
                name: nick.clone(),
                data: player_data(&effective),
            },
            data,
        };

        let lobby = match bounded(self.wait(), "CreateLobby", services.create_lobby(request)).await {
            Ok(lobby) => lobby,
            Err(err) => {
                services.leave_relay(&allocation.allocation_id, &me).await;
                return Err(err);
            }
        };

        let lobby_id = lobby.id.clone();
        tracing::info!(backend = BACKEND, lobby = %lobby_id, code = %lobby.code, "created lobby");
        {
            let mut state = self.inner.lock();
            state.session = Some(Session {
                lobby,
                allocation,
                last_heartbeat: Instant::now(),
            });
            state.host = true;
        }

        events.push(NetworkEvent::HostStatusChanged(true));
        events.push(NetworkEvent::PlayerConnected { id: me, name: nick });
        Ok((events, lobby_id))
    }

    async fn join_inner(&self, id: &str) -> Completion {
        self.ensure_open()?;
        let (me, nick) = self.inner.me()?;

        let mut events = self.leave_session().await;
        let services = &self.inner.services;
        let member = LobbyMember {
            id: me.clone(),
            name: nick.clone(),
            data: player_data(&self.factory.create_settings()),
        };
        let lobby = bounded(self.wait(), "JoinLobby", services.join_lobby(id, member)).await?;

        let joined_relay = match lobby.join_code() {
            Some(code) => bounded(self.wait(), "JoinRelay", services.join_relay(code, &me)).await,
            None => Err(BackendError::Rejected("lobby has no relay join code".to_owned())),
        };
        let allocation = match joined_relay {
            Ok(allocation) => allocation,
            Err(err) => {
                if let Err(cleanup) = services.remove_player(&lobby.id, &me).await {
                    tracing::warn!(backend = BACKEND, error = %cleanup, "leaving lobby failed");
                }
                return Err(err);
            }
        };

        let host = lobby.host_id == me;
        events.push(NetworkEvent::HostStatusChanged(host));
        events.push(NetworkEvent::PlayerConnected {
            id: me.clone(),
            name: nick,
        });
        events.extend(
            lobby
                .members
                .iter()
                .filter(|m| m.id != me)
                .map(|m| NetworkEvent::PlayerConnected {
                    id: m.id.clone(),
                    name: m.name.clone(),
                }),
        );

        let lobby_id = lobby.id.clone();
        tracing::info!(backend = BACKEND, lobby = %lobby_id, "joined lobby");
        {
            let mut state = self.inner.lock();
            state.session = Some(Session {
                lobby,
                allocation,
                last_heartbeat: Instant::now(),
            });
            state.host = host;
        }
        Ok((events, lobby_id))
    }

    async fn search_inner(&self, query: &str) -> Result<Vec<String>, BackendError> {
        self.ensure_open()?;
        self.inner.me()?;

        let limit = self.inner.config.query_limit;
        let filter = LobbyQuery {
            name_contains: (!query.is_empty()).then(|| query.to_owned()),
            min_available_slots: 1,
            limit,
        };
        let lobbies = bounded(
            self.wait(),
            "QueryLobbies",
            self.inner.services.query_lobbies(filter),
        )
        .await?;

        Ok(lobbies
            .iter()
            .filter(|l| !l.is_locked && !l.is_private && l.available_slots() > 0)
            .filter(|l| query.is_empty() || l.name.contains(query))
            .take(limit)
            .map(|l| {
                format!(
                    "{} by {} ({}/{}) - Code: {}",
                    l.name,
                    l.host_name(),
                    l.members.len(),
                    l.max_players,
                    l.code
                )
            })
            .collect())
    }

    async fn create(&self, scope: Scope, name: &str, settings: Settings) -> Result<(), BackendError> {
        let result = self.create_inner(name, settings).await;
        self.inner.events.complete(Operation::create(scope), result)
    }

    async fn join(&self, scope: Scope, id: &str) -> Result<(), BackendError> {
        let result = self.join_inner(id).await;
        self.inner.events.complete(Operation::connect(scope), result)
    }

    async fn leave(&self, scope: Scope) {
        let events = self.leave_session().await;
        let _ = self
            .inner
            .events
            .complete(Operation::disconnect(scope), Ok((events, String::new())));
    }

    async fn search(&self, scope: Scope, query: &str) -> Result<Vec<String>, BackendError> {
        let operation = Operation::search(scope);
        match self.search_inner(query).await {
            Ok(found) => {
                let message = format!("{} found", found.len());
                self.inner.events.complete(operation, Ok((Vec::new(), message)))?;
                Ok(found)
            }
            Err(err) => self.inner.events.complete(operation, Err(err)).map(|()| Vec::new()),
        }
    }
}

impl Drop for RelayHandler {
    fn drop(&mut self) {
        self.stop_maintenance();
    }
}

#[async_trait]
impl BackendHandler for RelayHandler {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    fn settings_factory(&self) -> &dyn SettingsFactory {
        &self.factory
    }

    fn account_id(&self) -> Option<AccountId> {
        self.inner.lock().account_id.clone()
    }

    fn nick_name(&self) -> Option<NickName> {
        self.inner.lock().nick_name.clone()
    }

    fn station_id(&self) -> Option<StationId> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| StationId::new(s.lobby.id.clone()))
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        self.ensure_open()?;
        if self.inner.lock().initialized {
            return Ok(());
        }

        let account = bounded(self.wait(), "SignIn", self.inner.services.sign_in(None))
            .await
            .inspect_err(|err| {
                tracing::error!(backend = BACKEND, error = %err, "initialize failed");
            })?;

        {
            let mut state = self.inner.lock();
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
            state.signed_in = true;
            state.account_id = Some(account.clone());
        }
        tracing::info!(backend = BACKEND, %account, "signed in anonymously");
        self.inner
            .events
            .emit(NetworkEvent::ConnectionStatusChanged(true));
        Ok(())
    }

    async fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            if state.closing || !state.initialized {
                return;
            }
            state.closing = true;
        }

        tracing::info!(backend = BACKEND, "shutting down");
        self.stop_maintenance();
        let mut events = self.leave_session().await;
        if self.sign_out().await {
            events.push(NetworkEvent::ConnectionStatusChanged(false));
        }
        *self.inner.lock() = RelayState::default();
        self.inner.events.emit_all(events);
    }

    async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), BackendError> {
        self.ensure_open()?;
        let (initialized, signed_in, same_identity) = {
            let state = self.inner.lock();
            (
                state.initialized,
                state.signed_in,
                state
                    .account_id
                    .as_ref()
                    .is_some_and(|id| id.as_str() == user_id),
            )
        };
        if !initialized {
            return Err(BackendError::NotInitialized);
        }
        if signed_in && same_identity {
            self.inner.lock().nick_name = Some(NickName::from(user_name));
            return Ok(());
        }

        let mut events = Vec::new();
        if signed_in {
            tracing::info!(backend = BACKEND, user_id, "signed-in identity differs, signing in again");
            events = self.leave_session().await;
            self.sign_out().await;
        }

        match bounded(
            self.wait(),
            "SignIn",
            self.inner.services.sign_in(Some(user_id)),
        )
        .await
        {
            Ok(account) => {
                {
                    let mut state = self.inner.lock();
                    state.signed_in = true;
                    state.account_id = Some(account);
                    state.nick_name = Some(NickName::from(user_name));
                }
                tracing::info!(backend = BACKEND, user_id, user_name, "connected");
                events.push(NetworkEvent::ConnectionStatusChanged(true));
                self.inner.events.emit_all(events);
                Ok(())
            }
            Err(err) => {
                tracing::error!(backend = BACKEND, user_id, error = %err, "sign-in failed");
                if signed_in {
                    events.push(NetworkEvent::ConnectionStatusChanged(false));
                }
                self.inner.events.emit_all(events);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) {
        let mut events = self.leave_session().await;
        if self.sign_out().await {
            events.push(NetworkEvent::ConnectionStatusChanged(false));
            tracing::info!(backend = BACKEND, "disconnected");
        }
        self.inner.events.emit_all(events);
    }

    async fn create_lobby(&self, name: &str, settings: Settings) -> Result<(), BackendError> {
        self.create(Scope::Lobby, name, settings).await
    }

    async fn connect_lobby(&self, id: &str) -> Result<(), BackendError> {
        self.join(Scope::Lobby, id).await
    }

    async fn disconnect_lobby(&self) {
        self.leave(Scope::Lobby).await
    }

    async fn search_lobby(&self, query: &str) -> Result<Vec<String>, BackendError> {
        self.search(Scope::Lobby, query).await
    }

    async fn create_room(&self, name: &str, settings: Settings) -> Result<(), BackendError> {
        self.create(Scope::Room, name, settings).await
    }

    async fn connect_room(&self, id: &str) -> Result<(), BackendError> {
        self.join(Scope::Room, id).await
    }

    async fn disconnect_room(&self) {
        self.leave(Scope::Room).await
    }

    async fn search_room(&self, query: &str) -> Result<Vec<String>, BackendError> {
        self.search(Scope::Room, query).await
    }

    async fn send_data(&self, payload: &[u8], target: Option<&str>) -> Result<(), BackendError> {
        self.ensure_open()?;
        let (me, _) = self.inner.me()?;

        let (allocation_id, to) = {
            let state = self.inner.lock();
            let Some(session) = state.session.as_ref() else {
                return Err(BackendError::NotInStation);
            };
            let to = match target {
                None => None,
                Some(target) => match session.lobby.member(target) {
                    Some(member) => Some(member.id.clone()),
                    None => {
                        tracing::warn!(backend = BACKEND, target, "unicast target not found");
                        return Err(BackendError::TargetNotFound(target.to_owned()));
                    }
                },
            };
            (session.allocation.allocation_id.clone(), to)
        };

        bounded(
            self.wait(),
            "RelaySend",
            self.inner
                .services
                .relay_send(&allocation_id, &me, to.as_ref(), payload),
        )
        .await
    }

    fn update_state(&self) {
        let mut state = self.inner.lock();
        if state.closing || state.session.is_none() {
            return;
        }
        if state.maintenance.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::trace!(backend = BACKEND, "no runtime, skipping maintenance");
            return;
        };
        state.maintenance = Some(runtime.spawn(Arc::clone(&self.inner).maintain()));
    }
}
