//! In-process backend that simulates a network with fixed delays.
//!
//! Nothing leaves the process. Lobbies and rooms are the same thing here:
//! room operations run the lobby code path and only differ in which
//! completion event they report. Data sent to yourself (or broadcast) loops
//! straight back as [`NetworkEvent::DataReceived`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use netbridge_protocol::{
    AccountId, NetworkEvent, NickName, Operation, Scope, Settings, SettingsFactory, StationId,
};
use serde::{Deserialize, Serialize};

use crate::{BackendError, BackendHandler, EventEmitter, random_hex};

/// Extension namespace and log name.
pub const BACKEND: &str = "dummy";

/// What `search_lobby`/`search_room` pretend the network holds.
const CATALOGUE: [&str; 3] = [
    "DummyLobby1 (1/4)",
    "DummyLobby2 (3/4)",
    "TestLobby (0/2)",
];

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Simulated latencies and default settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DummyConfig {
    pub init_delay: Duration,
    pub connect_delay: Duration,
    /// Applies to create, join and leave.
    pub lobby_delay: Duration,
    pub search_delay: Duration,
    pub send_delay: Duration,
    pub default_settings: Settings,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            init_delay: Duration::from_millis(100),
            connect_delay: Duration::from_millis(200),
            lobby_delay: Duration::from_millis(300),
            search_delay: Duration::from_millis(150),
            send_delay: Duration::from_millis(50),
            default_settings: DummySettingsFactory::standard(),
        }
    }
}

impl DummyConfig {
    /// Same as the default, with every delay set to zero.
    pub fn instant() -> Self {
        Self {
            init_delay: Duration::ZERO,
            connect_delay: Duration::ZERO,
            lobby_delay: Duration::ZERO,
            search_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Forces the default settings into the dummy namespace.
    pub fn validated(mut self) -> Self {
        self.default_settings = self.default_settings.validated();
        self.default_settings.origin = Some(BACKEND.to_owned());
        self
    }
}

/// Default [`Settings`] for the dummy backend.
#[derive(Debug, Clone)]
pub struct DummySettingsFactory {
    defaults: Settings,
}

impl DummySettingsFactory {
    pub fn new(defaults: Settings) -> Self {
        Self { defaults }
    }

    /// Two players, visible, open, `dummyMode = "DefaultDummyGame"`.
    pub fn standard() -> Settings {
        Settings::for_backend(BACKEND)
            .with_max_players(2)
            .with_property("dummyMode", "DefaultDummyGame")
    }
}

impl SettingsFactory for DummySettingsFactory {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn create_settings(&self) -> Settings {
        self.defaults.clone()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Station {
    settings: Settings,
    participants: Vec<(AccountId, NickName)>,
}

#[derive(Debug, Default)]
struct DummyState {
    initialized: bool,
    connected: bool,
    /// Identity came from `connect` rather than the provisional one
    /// `initialize` hands out.
    bound: bool,
    host: bool,
    account_id: Option<AccountId>,
    nick_name: Option<NickName>,
    station_id: Option<StationId>,
    station: Option<Station>,
}

impl DummyState {
    fn ensure_connected(&self) -> Result<(), BackendError> {
        if !self.initialized {
            Err(BackendError::NotInitialized)
        } else if !self.connected {
            Err(BackendError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn me(&self) -> (AccountId, NickName) {
        (
            self.account_id.clone().unwrap_or_else(|| AccountId::new("")),
            self.nick_name.clone().unwrap_or_else(|| NickName::new("")),
        )
    }

    /// Leaves the current station without reporting a completion.
    fn leave_station(&mut self, events: &mut Vec<NetworkEvent>) {
        if self.station.take().is_some() {
            self.station_id = None;
        }
        if self.host {
            self.host = false;
            events.push(NetworkEvent::HostStatusChanged(false));
        }
    }

    /// Enters a station as its only participant so far.
    fn enter_station(
        &mut self,
        id: StationId,
        settings: Settings,
        host: bool,
        events: &mut Vec<NetworkEvent>,
    ) {
        let (account_id, nick_name) = self.me();
        self.station = Some(Station {
            settings,
            participants: vec![(account_id.clone(), nick_name.clone())],
        });
        self.station_id = Some(id);
        if self.host != host {
            self.host = host;
            events.push(NetworkEvent::HostStatusChanged(host));
        }
        events.push(NetworkEvent::PlayerConnected {
            id: account_id,
            name: nick_name,
        });
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// The reference backend.
#[derive(Debug)]
pub struct DummyHandler {
    config: DummyConfig,
    factory: DummySettingsFactory,
    events: EventEmitter,
    state: Mutex<DummyState>,
}

impl Default for DummyHandler {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl DummyHandler {
    pub fn new(config: DummyConfig) -> Self {
        let config = config.validated();
        Self {
            factory: DummySettingsFactory::new(config.default_settings.clone()),
            config,
            events: EventEmitter::new(),
            state: Mutex::new(DummyState::default()),
        }
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Effective settings of the lobby/room we're in, if any.
    pub fn current_settings(&self) -> Option<Settings> {
        self.lock().station.as_ref().map(|s| s.settings.clone())
    }

    pub fn is_host(&self) -> bool {
        self.lock().host
    }

    /// Participants of the current station, self included.
    pub fn participants(&self) -> Vec<NickName> {
        self.lock()
            .station
            .as_ref()
            .map(|s| s.participants.iter().map(|(_, n)| n.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn create(
        &self,
        scope: Scope,
        name: &str,
        settings: Settings,
    ) -> Result<(), BackendError> {
        let operation = Operation::create(scope);
        tokio::time::sleep(self.config.lobby_delay).await;

        for key in settings.foreign_extensions(BACKEND) {
            tracing::debug!(backend = BACKEND, key, "ignoring foreign settings extension");
        }
        let effective = settings.conform_to(&self.config.default_settings);

        let result = {
            let mut state = self.lock();
            state.ensure_connected().map(|()| {
                let mut events = Vec::new();
                state.leave_station(&mut events);
                let id = StationId::new(format!("{name}_{}", random_hex(4)));
                state.enter_station(id.clone(), effective, true, &mut events);
                (events, id.into_inner())
            })
        };
        self.events.complete(operation, result)
    }

    async fn join(&self, scope: Scope, id: &str) -> Result<(), BackendError> {
        let operation = Operation::connect(scope);
        tokio::time::sleep(self.config.lobby_delay).await;

        let result = {
            let mut state = self.lock();
            state.ensure_connected().map(|()| {
                let mut events = Vec::new();
                state.leave_station(&mut events);
                let settings = self.config.default_settings.clone();
                state.enter_station(StationId::from(id), settings, false, &mut events);
                (events, id.to_owned())
            })
        };
        self.events.complete(operation, result)
    }

    async fn leave(&self, scope: Scope) {
        let operation = Operation::disconnect(scope);
        tokio::time::sleep(self.config.lobby_delay).await;

        let mut events = Vec::new();
        self.lock().leave_station(&mut events);
        // Leaving when not in a station is still a success.
        let _ = self.events.complete(operation, Ok((events, String::new())));
    }

    async fn search(&self, scope: Scope, query: &str) -> Result<Vec<String>, BackendError> {
        let operation = Operation::search(scope);
        tokio::time::sleep(self.config.search_delay).await;

        let found: Vec<String> = CATALOGUE
            .iter()
            .filter(|entry| query.is_empty() || entry.contains(query))
            .map(|entry| (*entry).to_owned())
            .collect();

        self.events.complete(operation, Ok((Vec::new(), format!("{} found", found.len()))))?;
        Ok(found)
    }
}

#[async_trait]
impl BackendHandler for DummyHandler {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn events(&self) -> &EventEmitter {
        &self.events
    }

    fn settings_factory(&self) -> &dyn SettingsFactory {
        &self.factory
    }

    fn account_id(&self) -> Option<AccountId> {
        self.lock().account_id.clone()
    }

    fn nick_name(&self) -> Option<NickName> {
        self.lock().nick_name.clone()
    }

    fn station_id(&self) -> Option<StationId> {
        self.lock().station_id.clone()
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        if self.lock().initialized {
            return Ok(());
        }
        tokio::time::sleep(self.config.init_delay).await;

        let account_id = {
            let mut state = self.lock();
            if state.initialized {
                return Ok(());
            }
            let account_id = AccountId::new(format!("dummyUser_{}", random_hex(8)));
            state.initialized = true;
            state.connected = true;
            state.account_id = Some(account_id.clone());
            state.nick_name = Some(NickName::from("DummyPlayer"));
            state.station_id = Some(StationId::new(format!("dummyStation_{}", random_hex(8))));
            account_id
        };

        tracing::info!(backend = BACKEND, %account_id, "initialized");
        self.events.emit(NetworkEvent::ConnectionStatusChanged(true));
        Ok(())
    }

    async fn shutdown(&self) {
        let events = {
            let mut state = self.lock();
            if !state.initialized {
                return;
            }
            let mut events = Vec::new();
            state.leave_station(&mut events);
            if state.connected {
                events.push(NetworkEvent::ConnectionStatusChanged(false));
            }
            *state = DummyState::default();
            events
        };

        tracing::info!(backend = BACKEND, "shut down");
        self.events.emit_all(events);
    }

    async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), BackendError> {
        {
            let state = self.lock();
            if !state.initialized {
                return Err(BackendError::NotInitialized);
            }
            if state.bound && state.account_id.as_ref().is_some_and(|id| id.as_str() == user_id) {
                return Ok(());
            }
        }
        tokio::time::sleep(self.config.connect_delay).await;

        {
            let mut state = self.lock();
            if !state.initialized {
                return Err(BackendError::NotInitialized);
            }
            if state.bound {
                return match &state.account_id {
                    Some(id) if id.as_str() == user_id => Ok(()),
                    Some(id) => Err(BackendError::Rejected(format!(
                        "already connected as {id}"
                    ))),
                    None => Err(BackendError::NotConnected),
                };
            }
            state.bound = true;
            state.connected = true;
            state.account_id = Some(AccountId::from(user_id));
            state.nick_name = Some(NickName::from(user_name));
            state.station_id = Some(StationId::new(format!("dummySession_{}", random_hex(8))));
        }

        tracing::info!(backend = BACKEND, user_id, user_name, "connected");
        self.events.emit(NetworkEvent::ConnectionStatusChanged(true));
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.lock().connected {
            return;
        }
        tokio::time::sleep(self.config.connect_delay).await;

        let events = {
            let mut state = self.lock();
            if !state.connected {
                return;
            }
            let mut events = Vec::new();
            state.leave_station(&mut events);
            state.connected = false;
            state.bound = false;
            state.account_id = None;
            state.nick_name = None;
            state.station_id = None;
            events.push(NetworkEvent::ConnectionStatusChanged(false));
            events
        };

        tracing::info!(backend = BACKEND, "disconnected");
        self.events.emit_all(events);
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
        {
            let state = self.lock();
            state.ensure_connected()?;
            if let Some(target) = target {
                let is_self = state
                    .account_id
                    .as_ref()
                    .is_some_and(|id| id.as_str() == target);
                if !is_self {
                    tracing::warn!(backend = BACKEND, target, "unicast target not found");
                    return Err(BackendError::TargetNotFound(target.to_owned()));
                }
            }
        }
        tokio::time::sleep(self.config.send_delay).await;

        tracing::trace!(backend = BACKEND, bytes = payload.len(), "loop-back");
        self.events.emit(NetworkEvent::DataReceived(payload.to_vec()));
        Ok(())
    }

    fn update_state(&self) {}
}
