use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use netbridge_protocol::{
    AccountId, NetworkEvent, NickName, Operation, Scope, Settings, SettingsFactory, StationId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{
    BACKEND, ClientPhase, ClientStatus, DATA_EVENT_CODE, MatchmakingClient,
    MatchmakingSettingsFactory, Receivers, RoomOptions, ServiceCallback,
};
use crate::{BackendError, BackendHandler, Completion, EventEmitter, WaitPolicy, wait_until};

/// Configuration for [`MatchmakingHandler`].
///
/// There is no `Default`; the wait timeout has to be chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Sent to the master server; only clients with the same version see
    /// each other's rooms.
    pub app_version: String,
    pub wait: WaitPolicy,
}

impl MatchmakingConfig {
    pub fn new(app_version: impl Into<String>, wait: WaitPolicy) -> Self {
        Self {
            app_version: app_version.into(),
            wait,
        }
    }

    pub fn validated(mut self) -> Self {
        self.wait = self.wait.validated();
        self
    }
}

#[derive(Debug, Default)]
struct MatchmakingState {
    initialized: bool,
    connected: bool,
    closing: bool,
    host: bool,
    account_id: Option<AccountId>,
    nick_name: Option<NickName>,
    station_id: Option<StationId>,
    pump: Option<JoinHandle<()>>,
}

/// Shared between the handler and its callback pump.
struct Inner {
    client: Arc<dyn MatchmakingClient>,
    events: EventEmitter,
    state: Mutex<MatchmakingState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MatchmakingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> ClientStatus {
        self.client.status().borrow().clone()
    }

    fn on_callback(&self, callback: ServiceCallback) {
        let events = match callback {
            ServiceCallback::PlayerEntered(player) => {
                tracing::debug!(backend = BACKEND, user_id = %player.user_id, "player entered");
                vec![NetworkEvent::PlayerConnected {
                    id: player.user_id,
                    name: player.nick_name,
                }]
            }
            ServiceCallback::PlayerLeft(player) => {
                tracing::debug!(backend = BACKEND, user_id = %player.user_id, "player left");
                vec![NetworkEvent::PlayerDisconnected {
                    id: player.user_id,
                    name: player.nick_name,
                }]
            }
            ServiceCallback::MasterSwitched(master) => {
                let is_me = self
                    .status()
                    .local
                    .is_some_and(|local| local.actor == master.actor);
                let mut state = self.lock();
                if state.station_id.is_none() || state.host == is_me {
                    Vec::new()
                } else {
                    state.host = is_me;
                    tracing::info!(backend = BACKEND, new_master = %master.nick_name, is_me, "master switched");
                    vec![NetworkEvent::HostStatusChanged(is_me)]
                }
            }
            ServiceCallback::Event { code, data, sender } => {
                if code == DATA_EVENT_CODE {
                    vec![NetworkEvent::DataReceived(data)]
                } else {
                    tracing::trace!(backend = BACKEND, code, sender, "ignoring event code");
                    Vec::new()
                }
            }
            ServiceCallback::Disconnected { cause } => {
                let events = self.mark_disconnected();
                if !events.is_empty() {
                    tracing::warn!(backend = BACKEND, %cause, "disconnected by service");
                }
                events
            }
        };
        self.events.emit_all(events);
    }

    /// Clears session and identity state.
    ///
    /// Only the first caller after a connection gets the status events, so
    /// the pump and an explicit disconnect can't both report it.
    fn mark_disconnected(&self) -> Vec<NetworkEvent> {
        let mut state = self.lock();
        let mut events = Vec::new();
        if state.host {
            state.host = false;
            events.push(NetworkEvent::HostStatusChanged(false));
        }
        if state.connected {
            state.connected = false;
            events.push(NetworkEvent::ConnectionStatusChanged(false));
        }
        state.account_id = None;
        state.nick_name = None;
        state.station_id = None;
        events
    }
}

/// Backend over a [`MatchmakingClient`].
pub struct MatchmakingHandler {
    config: MatchmakingConfig,
    factory: MatchmakingSettingsFactory,
    inner: Arc<Inner>,
}

impl MatchmakingHandler {
    pub fn new(client: Arc<dyn MatchmakingClient>, config: MatchmakingConfig) -> Self {
        Self {
            config: config.validated(),
            factory: MatchmakingSettingsFactory,
            inner: Arc::new(Inner {
                client,
                events: EventEmitter::new(),
                state: Mutex::new(MatchmakingState::default()),
            }),
        }
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    pub fn is_host(&self) -> bool {
        self.inner.lock().host
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.inner.lock().closing {
            Err(BackendError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn ensure_pump(&self) {
        let mut state = self.inner.lock();
        if state.pump.as_ref().is_some_and(|pump| !pump.is_finished()) {
            return;
        }

        let mut callbacks = self.inner.client.subscribe();
        let inner = Arc::clone(&self.inner);
        state.pump = Some(tokio::spawn(async move {
            while let Some(callback) = callbacks.recv().await {
                inner.on_callback(callback);
            }
            tracing::debug!(backend = BACKEND, "callback stream closed");
        }));
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.inner.lock().pump.take() {
            pump.abort();
        }
    }

    /// Mirrors the client's identity and reports presence.
    fn report_ready(&self, status: &ClientStatus) {
        let host = status.is_master();
        {
            let mut state = self.inner.lock();
            state.connected = true;
            state.host = host;
            state.account_id = status.local.as_ref().map(|p| p.user_id.clone());
            state.nick_name = status.local.as_ref().map(|p| p.nick_name.clone());
            state.station_id = status.room.as_ref().map(|r| StationId::new(r.name.clone()));
        }
        tracing::info!(backend = BACKEND, app_version = %self.config.app_version, "connected to master");
        self.inner.events.emit_all([
            NetworkEvent::ConnectionStatusChanged(true),
            NetworkEvent::HostStatusChanged(host),
        ]);
    }

    async fn connect_master(&self) -> Result<(), BackendError> {
        let mut rx = self.inner.client.status();
        let start = rx.borrow().revision;
        tracing::info!(backend = BACKEND, app_version = %self.config.app_version, "connecting to master");
        self.inner.client.connect_to_master(&self.config.app_version);

        let waited = wait_until(&mut rx, self.config.wait, "ConnectToMaster", |s| {
            s.revision > start && (s.is_ready() || s.phase == ClientPhase::Disconnected)
        })
        .await;

        match waited {
            Ok(status) if status.is_ready() => {
                self.report_ready(&status);
                Ok(())
            }
            Ok(status) => Err(BackendError::Rejected(
                status
                    .rejection
                    .unwrap_or_else(|| "connection to master failed".to_owned()),
            )),
            Err(err) => {
                self.inner.client.disconnect();
                Err(err)
            }
        }
    }

    async fn join_lobby(&self) -> Result<(), BackendError> {
        let mut rx = self.inner.client.status();
        self.inner.client.join_lobby();
        let status = wait_until(&mut rx, self.config.wait, "JoinLobby", |s| {
            s.in_lobby() || s.in_room() || s.phase == ClientPhase::Disconnected
        })
        .await?;

        if status.in_lobby() || status.in_room() {
            Ok(())
        } else {
            Err(BackendError::NotConnected)
        }
    }

    /// Waits for the answer to a create/join request issued at `start`.
    async fn await_room(
        &self,
        rx: &mut watch::Receiver<ClientStatus>,
        start: u64,
        operation: &'static str,
    ) -> Result<ClientStatus, BackendError> {
        let status = wait_until(rx, self.config.wait, operation, move |s| {
            s.revision > start
                && (s.in_room() || s.rejection.is_some() || s.phase == ClientPhase::Disconnected)
        })
        .await?;

        if status.in_room() {
            Ok(status)
        } else if let Some(text) = status.rejection {
            Err(BackendError::Rejected(text))
        } else {
            Err(BackendError::NotConnected)
        }
    }

    /// Mirrors the room we just entered and lists everyone in it.
    fn entered_room(&self, status: ClientStatus) -> (Vec<NetworkEvent>, String) {
        let is_master = status.is_master();
        let Some(room) = status.room else {
            return (Vec::new(), String::new());
        };

        {
            let mut state = self.inner.lock();
            state.station_id = Some(StationId::new(room.name.clone()));
            state.host = is_master;
        }

        let local_actor = status.local.as_ref().map(|p| p.actor);
        let mut events = vec![NetworkEvent::HostStatusChanged(is_master)];
        if let Some(local) = status.local {
            events.push(NetworkEvent::PlayerConnected {
                id: local.user_id,
                name: local.nick_name,
            });
        }
        events.extend(
            room.players
                .into_iter()
                .filter(|p| Some(p.actor) != local_actor)
                .map(|p| NetworkEvent::PlayerConnected {
                    id: p.user_id,
                    name: p.nick_name,
                }),
        );
        (events, room.name)
    }

    /// Leaves the current room, if any, without reporting a completion.
    async fn leave_room(&self) -> Vec<NetworkEvent> {
        let status = self.inner.status();
        if status.in_room() || status.phase == ClientPhase::Joining {
            let mut rx = self.inner.client.status();
            self.inner.client.leave_room();
            let left = wait_until(&mut rx, self.config.wait, "LeaveRoom", |s| {
                !s.in_room() && s.phase != ClientPhase::Leaving
            })
            .await;
            if let Err(err) = left {
                tracing::warn!(backend = BACKEND, error = %err, "leaving room did not complete");
            }
        }

        let mut state = self.inner.lock();
        state.station_id = None;
        if state.host {
            state.host = false;
            vec![NetworkEvent::HostStatusChanged(false)]
        } else {
            Vec::new()
        }
    }

    async fn create_inner(&self, name: &str, settings: Settings) -> Completion {
        self.ensure_open()?;
        if !self.inner.status().is_ready() {
            return Err(BackendError::NotConnected);
        }

        for key in settings.foreign_extensions(BACKEND) {
            tracing::debug!(backend = BACKEND, key, "ignoring foreign settings extension");
        }
        let effective = settings.conform_to(&self.factory.create_settings());
        let options = RoomOptions::from_settings(&effective);

        let mut events = self.leave_room().await;
        let mut rx = self.inner.client.status();
        let start = rx.borrow().revision;
        self.inner.client.create_room(name, options);
        let status = self.await_room(&mut rx, start, "CreateRoom").await?;

        let (entered, message) = self.entered_room(status);
        events.extend(entered);
        Ok((events, message))
    }

    async fn join_inner(&self, id: &str) -> Completion {
        self.ensure_open()?;
        if !self.inner.status().is_ready() {
            return Err(BackendError::NotConnected);
        }

        let mut events = self.leave_room().await;
        let mut rx = self.inner.client.status();
        let start = rx.borrow().revision;
        self.inner.client.join_room(id);
        let status = self.await_room(&mut rx, start, "JoinRoom").await?;

        let (entered, message) = self.entered_room(status);
        events.extend(entered);
        Ok((events, message))
    }

    async fn search_inner(&self, query: &str) -> Result<Vec<String>, BackendError> {
        self.ensure_open()?;
        let status = self.inner.status();
        if !status.is_ready() {
            return Err(BackendError::NotConnected);
        }
        if !status.in_lobby() && !status.in_room() {
            tracing::debug!(backend = BACKEND, "joining lobby to list rooms");
            self.join_lobby().await?;
        }

        Ok(self
            .inner
            .client
            .room_list()
            .into_iter()
            .filter(|room| room.is_visible && room.is_open && room.has_free_slot())
            .filter(|room| query.is_empty() || room.name.contains(query))
            .map(|room| format!("{} ({}/{})", room.name, room.player_count, room.max_players))
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
        let events = self.leave_room().await;
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

impl Drop for MatchmakingHandler {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[async_trait]
impl BackendHandler for MatchmakingHandler {
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
        self.inner.lock().station_id.clone()
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.ensure_pump();

        let status = self.inner.status();
        if status.is_ready() {
            if !self.inner.lock().connected {
                self.report_ready(&status);
            }
            self.inner.lock().initialized = true;
            return Ok(());
        }

        match self.connect_master().await {
            Ok(()) => {
                self.inner.lock().initialized = true;
                Ok(())
            }
            Err(err) => {
                tracing::error!(backend = BACKEND, error = %err, "initialize failed");
                self.stop_pump();
                Err(err)
            }
        }
    }

    async fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            if state.closing || (!state.initialized && state.pump.is_none()) {
                return;
            }
            state.closing = true;
        }

        tracing::info!(backend = BACKEND, "shutting down");
        self.disconnect().await;
        self.stop_pump();
        *self.inner.lock() = MatchmakingState::default();
    }

    async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), BackendError> {
        if !self.inner.lock().initialized {
            return Err(BackendError::NotInitialized);
        }
        self.ensure_open()?;

        let mut status = self.inner.status();
        if !status.is_ready() {
            self.ensure_pump();
            self.connect_master().await?;
            status = self.inner.status();
        }

        let joined = status.in_lobby() || status.in_room();
        let same_identity = self
            .inner
            .lock()
            .account_id
            .as_ref()
            .is_some_and(|id| id.as_str() == user_id);
        if joined && same_identity {
            return Ok(());
        }

        self.inner.client.set_identity(user_id, user_name);
        {
            let mut state = self.inner.lock();
            state.account_id = Some(AccountId::from(user_id));
            state.nick_name = Some(NickName::from(user_name));
        }

        if !joined {
            self.join_lobby().await?;
        }
        tracing::info!(backend = BACKEND, user_id, user_name, "connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.inner.status().phase != ClientPhase::Disconnected {
            let mut rx = self.inner.client.status();
            self.inner.client.disconnect();
            let done = wait_until(&mut rx, self.config.wait, "Disconnect", |s| {
                s.phase == ClientPhase::Disconnected
            })
            .await;
            if let Err(err) = done {
                tracing::warn!(backend = BACKEND, error = %err, "disconnect did not complete");
            }
        }

        let events = self.inner.mark_disconnected();
        tracing::info!(backend = BACKEND, "disconnected");
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
        let status = self.inner.status();
        if !status.is_ready() {
            return Err(BackendError::NotConnected);
        }
        let Some(room) = status.room.as_ref().filter(|_| status.in_room()) else {
            return Err(BackendError::NotInStation);
        };

        let receivers = match target {
            None => Receivers::Others,
            Some(target) => match room.player(target) {
                Some(player) => Receivers::Actors(vec![player.actor]),
                None => {
                    tracing::warn!(backend = BACKEND, target, "unicast target not found");
                    return Err(BackendError::TargetNotFound(target.to_owned()));
                }
            },
        };

        tracing::trace!(backend = BACKEND, bytes = payload.len(), ?receivers, "raise event");
        self.inner.client.raise_event(DATA_EVENT_CODE, payload, receivers);
        Ok(())
    }

    fn update_state(&self) {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use netbridge_protocol::OperationOutcome;

    use super::*;
    use crate::matchmaking::{LocalMatchmaker, ROOM_EXISTS, ROOM_FULL};

    type Log = Arc<Mutex<Vec<NetworkEvent>>>;

    fn config() -> MatchmakingConfig {
        MatchmakingConfig::new("1.0", WaitPolicy::new(Duration::from_secs(5)))
    }

    fn record(handler: &MatchmakingHandler) -> (Log, crate::Subscription) {
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        let sub = handler
            .events()
            .subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (log, sub)
    }

    async fn connected(service: &LocalMatchmaker, user: &str) -> MatchmakingHandler {
        let handler = MatchmakingHandler::new(service.client(), config());
        handler.initialize().await.unwrap();
        handler.connect(user, user).await.unwrap();
        handler
    }

    /// Lets the callback pumps run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_reports_connection() {
        let service = LocalMatchmaker::new();
        let handler = MatchmakingHandler::new(service.client(), config());
        let (log, _sub) = record(&handler);

        handler.initialize().await.unwrap();

        assert!(handler.account_id().is_some());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                NetworkEvent::ConnectionStatusChanged(true),
                NetworkEvent::HostStatusChanged(false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_twice_has_no_side_effects() {
        let service = LocalMatchmaker::new();
        let handler = MatchmakingHandler::new(service.client(), config());
        handler.initialize().await.unwrap();
        let (log, _sub) = record(&handler);

        handler.initialize().await.unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_stalled_service_times_out() {
        let service = LocalMatchmaker::new();
        service.set_stalled(true);
        let handler = MatchmakingHandler::new(service.client(), config());

        let result = handler.initialize().await;

        assert!(matches!(
            result,
            Err(BackendError::Timeout { operation: "ConnectToMaster", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_before_initialize_returns_not_initialized() {
        let service = LocalMatchmaker::new();
        let handler = MatchmakingHandler::new(service.client(), config());
        assert_eq!(
            handler.connect("u1", "Alice").await,
            Err(BackendError::NotInitialized)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_binds_identity() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        assert_eq!(handler.account_id().unwrap().as_str(), "u1");
        assert_eq!(handler.nick_name().unwrap().as_str(), "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_room_makes_creator_host() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        let (log, _sub) = record(&handler);

        handler
            .create_room("Arena", handler.settings_factory().create_settings())
            .await
            .unwrap();

        assert_eq!(handler.station_id().unwrap().as_str(), "Arena");
        assert!(handler.is_host());
        let events = log.lock().unwrap().clone();
        assert_eq!(events[0], NetworkEvent::HostStatusChanged(true));
        assert_eq!(
            events.last().unwrap(),
            &NetworkEvent::RoomOperationCompleted(OperationOutcome::succeeded(
                Operation::CreateRoom,
                "Arena"
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_lobby_name_collision_surfaces_service_text() {
        let service = LocalMatchmaker::new();
        let first = connected(&service, "u1").await;
        let second = connected(&service, "u2").await;
        first.create_lobby("Arena", Settings::default()).await.unwrap();
        let (log, _sub) = record(&second);

        let result = second.create_lobby("Arena", Settings::default()).await;

        assert_eq!(result, Err(BackendError::Rejected(ROOM_EXISTS.into())));
        assert_eq!(
            *log.lock().unwrap(),
            vec![NetworkEvent::LobbyOperationCompleted(OperationOutcome::failed(
                Operation::CreateLobby,
                ROOM_EXISTS
            ))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_room_full_is_rejected() {
        let service = LocalMatchmaker::new();
        let host = connected(&service, "u1").await;
        let guest = connected(&service, "u2").await;
        host.create_room("Solo", Settings::default().with_max_players(1))
            .await
            .unwrap();

        let result = guest.connect_room("Solo").await;

        assert_eq!(result, Err(BackendError::Rejected(ROOM_FULL.into())));
        assert!(guest.station_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_room_announces_everyone_to_joiner_and_joiner_to_host() {
        let service = LocalMatchmaker::new();
        let host = connected(&service, "u1").await;
        let guest = connected(&service, "u2").await;
        host.create_room("Arena", Settings::default()).await.unwrap();
        let (host_log, _hs) = record(&host);
        let (guest_log, _gs) = record(&guest);

        guest.connect_room("Arena").await.unwrap();
        settle().await;

        assert!(!guest.is_host());
        let joined: Vec<String> = guest_log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                NetworkEvent::PlayerConnected { name, .. } => Some(name.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(joined, vec!["u2", "u1"]);
        assert!(host_log.lock().unwrap().contains(&NetworkEvent::PlayerConnected {
            id: AccountId::from("u2"),
            name: NickName::from("u2"),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_leaving_migrates_host_to_remaining_player() {
        let service = LocalMatchmaker::new();
        let host = connected(&service, "u1").await;
        let guest = connected(&service, "u2").await;
        host.create_room("Arena", Settings::default()).await.unwrap();
        guest.connect_room("Arena").await.unwrap();
        settle().await;
        let (log, _sub) = record(&guest);

        host.disconnect_room().await;
        settle().await;

        assert!(guest.is_host());
        assert!(!host.is_host());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                NetworkEvent::PlayerDisconnected {
                    id: AccountId::from("u1"),
                    name: NickName::from("u1"),
                },
                NetworkEvent::HostStatusChanged(true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_data_reaches_others_not_sender() {
        let service = LocalMatchmaker::new();
        let host = connected(&service, "u1").await;
        let guest = connected(&service, "u2").await;
        host.create_room("Arena", Settings::default()).await.unwrap();
        guest.connect_room("Arena").await.unwrap();
        settle().await;
        let (host_log, _hs) = record(&host);
        let (guest_log, _gs) = record(&guest);

        host.send_data(b"hi", None).await.unwrap();
        settle().await;

        assert_eq!(
            *guest_log.lock().unwrap(),
            vec![NetworkEvent::DataReceived(b"hi".to_vec())]
        );
        assert!(host_log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_data_unknown_target_returns_target_not_found() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        handler.create_room("Arena", Settings::default()).await.unwrap();

        let result = handler.send_data(b"hi", Some("ghost")).await;

        assert_eq!(result, Err(BackendError::TargetNotFound("ghost".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_data_outside_room_returns_not_in_station() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        assert_eq!(
            handler.send_data(b"hi", None).await,
            Err(BackendError::NotInStation)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_lobby_lists_only_joinable_rooms() {
        let service = LocalMatchmaker::new();
        let a = connected(&service, "a").await;
        let b = connected(&service, "b").await;
        let c = connected(&service, "c").await;
        let seeker = connected(&service, "seeker").await;
        a.create_room("Open", Settings::default().with_max_players(4))
            .await
            .unwrap();
        b.create_room("Hidden", Settings::default().with_visibility(false))
            .await
            .unwrap();
        c.create_room("Full", Settings::default().with_max_players(1))
            .await
            .unwrap();

        let found = seeker.search_lobby("").await.unwrap();

        assert_eq!(found, vec!["Open (1/4)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_room_reports_room_completion() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        let (log, _sub) = record(&handler);

        handler.search_room("x").await.unwrap();

        assert!(matches!(
            log.lock().unwrap().last(),
            Some(NetworkEvent::RoomOperationCompleted(o)) if o.operation == Operation::SearchRoom
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_room_stalled_times_out_with_failed_completion() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        service.set_stalled(true);
        let (log, _sub) = record(&handler);

        let result = handler.create_room("Arena", Settings::default()).await;

        assert!(matches!(result, Err(BackendError::Timeout { .. })));
        assert!(matches!(
            log.lock().unwrap().last(),
            Some(NetworkEvent::RoomOperationCompleted(o)) if !o.success
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kicked_client_reports_connection_lost() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        let (log, _sub) = record(&handler);

        assert!(service.kick("u1"));
        settle().await;

        assert!(log
            .lock()
            .unwrap()
            .contains(&NetworkEvent::ConnectionStatusChanged(false)));
        assert!(handler.account_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_reports_connection_lost_once() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        let (log, _sub) = record(&handler);

        handler.disconnect().await;
        settle().await;

        let lost = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == NetworkEvent::ConnectionStatusChanged(false))
            .count();
        assert_eq!(lost, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_disconnect_reconnects_to_master() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;
        handler.disconnect().await;
        let (log, _sub) = record(&handler);

        handler.connect("u2", "Bob").await.unwrap();

        assert_eq!(handler.account_id().unwrap().as_str(), "u2");
        assert!(log
            .lock()
            .unwrap()
            .contains(&NetworkEvent::ConnectionStatusChanged(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_twice_is_noop() {
        let service = LocalMatchmaker::new();
        let handler = connected(&service, "u1").await;

        handler.shutdown().await;
        handler.shutdown().await;

        assert!(handler.account_id().is_none());
        assert_eq!(handler.inner.status().phase, ClientPhase::Disconnected);
    }
}
