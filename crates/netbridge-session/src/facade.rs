//! The facade: one stable object over a swappable backend handler.
//!
//! # Concurrency note
//!
//! All facade state lives behind one `std::sync::Mutex` that is never held
//! across an `.await`. Operations take a snapshot (handler, generation,
//! ticket) under the lock, release it, await the backend, then re-lock and
//! check the snapshot is still current before touching state. Event
//! translation runs inline on the handler's emitting task and uses the same
//! lock, so a transition and the event that describes it are applied in one
//! critical section.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use netbridge_backend::{BackendError, BackendHandler, EventEmitter, Subscription};
use netbridge_protocol::{AccountId, NetworkEvent, NickName, Operation, Settings, StationId};
use tokio::sync::broadcast;

use crate::{FacadeConfig, FacadeState, Roster, SessionError, SettingsHandle};

// ---------------------------------------------------------------------------
// Core state
// ---------------------------------------------------------------------------

/// Read-only mirror of the active handler's identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Identity {
    account_id: Option<AccountId>,
    nick_name: Option<NickName>,
    station_id: Option<StationId>,
}

impl Identity {
    fn of(handler: &dyn BackendHandler) -> Self {
        Self {
            account_id: handler.account_id(),
            nick_name: handler.nick_name(),
            station_id: handler.station_id(),
        }
    }
}

/// The handler currently attached, and our registration on its emitter.
struct Active {
    handler: Arc<dyn BackendHandler>,
    subscription: Subscription,
}

struct Core {
    phase: FacadeState,
    /// Bumped whenever a handler is attached or retired. Events and results
    /// tagged with an older generation are discarded.
    generation: u64,
    /// Bumped by every `connect`/`disconnect`. Only the latest ticket may
    /// settle the connect transition.
    connect_ticket: u64,
    active: Option<Active>,
    identity: Identity,
    connected: bool,
    host: bool,
    roster: Roster,
    staged: Option<SettingsHandle>,
}

impl Core {
    fn new() -> Self {
        Self {
            phase: FacadeState::Idle,
            generation: 0,
            connect_ticket: 0,
            active: None,
            identity: Identity::default(),
            connected: false,
            host: false,
            roster: Roster::new(),
            staged: None,
        }
    }

    fn set_phase(&mut self, target: FacadeState) {
        if self.phase == target {
            return;
        }
        if !self.phase.can_transition_to(target) {
            tracing::warn!(from = %self.phase, to = %target, "unexpected facade transition");
        }
        tracing::debug!(from = %self.phase, to = %target, "facade state");
        self.phase = target;
    }

    fn clear_session_state(&mut self) {
        self.identity = Identity::default();
        self.connected = false;
        self.host = false;
        self.roster.clear();
        self.staged = None;
    }

    /// The handler operations may be issued against.
    fn handler(&self) -> Result<(Arc<dyn BackendHandler>, u64), SessionError> {
        match (self.phase, &self.active) {
            (FacadeState::ShuttingDown, _) => Err(SessionError::ShuttingDown),
            (_, Some(active)) => Ok((Arc::clone(&active.handler), self.generation)),
            (_, None) => Err(SessionError::HandlerMissing),
        }
    }

    /// Same as [`handler`](Self::handler), but only once connected.
    fn connected_handler(
        &self,
        operation: &'static str,
    ) -> Result<(Arc<dyn BackendHandler>, u64), SessionError> {
        let found = self.handler()?;
        match self.phase {
            FacadeState::Connected => Ok(found),
            FacadeState::Ready | FacadeState::Connecting => Err(SessionError::NotConnected),
            from => Err(SessionError::InvalidTransition { from, operation }),
        }
    }

    /// Applies a backend event to the facade's own fields.
    fn apply(&mut self, handler: &Weak<dyn BackendHandler>, event: &NetworkEvent) {
        match event {
            NetworkEvent::PlayerConnected { name, .. } => {
                self.roster.player_connected(name.as_str());
            }
            NetworkEvent::PlayerDisconnected { name, .. } => {
                self.roster.player_disconnected(name.as_str());
            }
            NetworkEvent::ConnectionStatusChanged(connected) => {
                self.connected = *connected;
                if let Some(handler) = handler.upgrade() {
                    self.identity = Identity::of(handler.as_ref());
                }
                if !*connected {
                    self.host = false;
                    self.roster.clear_connected();
                    if self.phase == FacadeState::Connected {
                        tracing::warn!("backend reported connection loss");
                        self.set_phase(FacadeState::Ready);
                    }
                }
            }
            NetworkEvent::HostStatusChanged(host) => self.host = *host,
            NetworkEvent::LobbyOperationCompleted(outcome)
            | NetworkEvent::RoomOperationCompleted(outcome) => {
                if !outcome.success {
                    return;
                }
                if let Some(handler) = handler.upgrade() {
                    self.identity = Identity::of(handler.as_ref());
                }
                if matches!(
                    outcome.operation,
                    Operation::DisconnectLobby | Operation::DisconnectRoom
                ) {
                    self.host = false;
                    self.roster.clear_connected();
                }
            }
            NetworkEvent::DataReceived(_) => {}
        }
    }
}

struct Shared {
    core: Mutex<Core>,
    publisher: broadcast::Sender<NetworkEvent>,
    observers: EventEmitter,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listener body registered on the active handler's emitter.
    fn translate(&self, generation: u64, handler: &Weak<dyn BackendHandler>, event: &NetworkEvent) {
        {
            let mut core = self.lock();
            if core.generation != generation {
                tracing::trace!(kind = event.kind(), "dropping event from retired handler");
                return;
            }
            core.apply(handler, event);
            tracing::debug!(kind = event.kind(), "republishing backend event");
            // Nobody listening is fine.
            let _ = self.publisher.send(event.clone());
        }
        self.observers.emit(event.clone());
    }
}

// ---------------------------------------------------------------------------
// SessionFacade
// ---------------------------------------------------------------------------

/// The single object an application talks to.
///
/// Holds at most one [`BackendHandler`] at a time, forwards operations to
/// it, and turns its events into facade state (connection flag, host flag,
/// identity mirror, roster) before republishing them.
///
/// Cloning is cheap and every clone drives the same session.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use netbridge_backend::DummyHandler;
/// # use netbridge_session::{FacadeConfig, SessionFacade};
/// # async fn demo() -> Result<(), netbridge_session::SessionError> {
/// let facade = SessionFacade::new(FacadeConfig::default());
/// facade.initialize(Arc::new(DummyHandler::default())).await?;
/// facade.connect("u1", "Alice").await?;
/// facade.create_lobby("Room1", None).await?;
/// facade.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionFacade {
    shared: Arc<Shared>,
}

impl Default for SessionFacade {
    fn default() -> Self {
        Self::new(FacadeConfig::default())
    }
}

impl SessionFacade {
    pub fn new(config: FacadeConfig) -> Self {
        let config = config.validated();
        let (publisher, _) = broadcast::channel(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::new()),
                publisher,
                observers: EventEmitter::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.shared.lock()
    }

    /// Registers the facade's translator on `handler`'s emitter.
    fn attach(&self, handler: &Arc<dyn BackendHandler>, generation: u64) -> Subscription {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let source: Weak<dyn BackendHandler> = Arc::downgrade(handler);
        handler.events().subscribe(move |event| {
            if let Some(shared) = shared.upgrade() {
                shared.translate(generation, &source, event);
            }
        })
    }

    /// Settles a forwarded operation, refreshing the identity mirror on
    /// success.
    fn finish<T>(
        &self,
        handler: &Arc<dyn BackendHandler>,
        generation: u64,
        result: Result<T, BackendError>,
    ) -> Result<T, SessionError> {
        let mut core = self.lock();
        if core.generation != generation {
            return Err(SessionError::Superseded);
        }
        if result.is_ok() {
            core.identity = Identity::of(handler.as_ref());
        }
        Ok(result?)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Attaches `handler` and initializes it.
    ///
    /// An already attached handler is shut down completely first, so two
    /// handlers are never active together. If initialization fails the
    /// handler is shut down and detached, and the facade is `Idle` again.
    pub async fn initialize(&self, handler: Arc<dyn BackendHandler>) -> Result<(), SessionError> {
        let previous = {
            let core = self.lock();
            match core.phase {
                FacadeState::ShuttingDown => return Err(SessionError::ShuttingDown),
                FacadeState::Idle => None,
                _ => core.active.as_ref().map(|a| a.handler.backend()),
            }
        };
        if let Some(previous) = previous {
            tracing::warn!(previous, next = handler.backend(), "replacing active handler");
            self.shutdown().await;
        }

        let generation = {
            let mut core = self.lock();
            if core.phase != FacadeState::Idle {
                // Another initialize attached its handler first.
                return Err(SessionError::Superseded);
            }
            core.generation += 1;
            let generation = core.generation;
            core.active = Some(Active {
                subscription: self.attach(&handler, generation),
                handler: Arc::clone(&handler),
            });
            core.set_phase(FacadeState::Initializing);
            generation
        };

        tracing::info!(backend = handler.backend(), "initializing backend");
        let result = handler.initialize().await;

        let failed = {
            let mut core = self.lock();
            if core.generation != generation {
                return Err(SessionError::Superseded);
            }
            match result {
                Ok(()) => {
                    core.identity = Identity::of(handler.as_ref());
                    core.set_phase(FacadeState::Ready);
                    tracing::info!(
                        backend = handler.backend(),
                        account_id = ?core.identity.account_id,
                        "backend ready"
                    );
                    None
                }
                Err(err) => {
                    tracing::error!(backend = handler.backend(), error = %err, "initialize failed");
                    core.generation += 1;
                    core.active = None;
                    core.clear_session_state();
                    core.set_phase(FacadeState::Idle);
                    Some(err)
                }
            }
        };

        match failed {
            None => Ok(()),
            Some(err) => {
                handler.shutdown().await;
                Err(err.into())
            }
        }
    }

    /// Detaches and shuts down the active handler, then clears identity,
    /// roster and staged settings.
    ///
    /// The handler's own teardown events are not republished. Calling this
    /// with nothing attached, or while another shutdown runs, does nothing.
    pub async fn shutdown(&self) {
        let active = {
            let mut core = self.lock();
            if matches!(core.phase, FacadeState::Idle | FacadeState::ShuttingDown) {
                return;
            }
            core.set_phase(FacadeState::ShuttingDown);
            core.generation += 1;
            core.connect_ticket += 1;
            core.active.take()
        };

        if let Some(Active {
            handler,
            subscription,
        }) = active
        {
            subscription.cancel();
            tracing::info!(backend = handler.backend(), "shutting down backend");
            handler.shutdown().await;
        }

        let mut core = self.lock();
        core.clear_session_state();
        core.set_phase(FacadeState::Idle);
        tracing::info!("session idle");
    }

    /// Binds an identity on the active handler.
    ///
    /// When two connects overlap, the one issued last decides the facade
    /// state; the other returns [`SessionError::Superseded`]. The identity
    /// mirror always reflects whichever finished last.
    pub async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), SessionError> {
        let (handler, generation, ticket, before) = {
            let mut core = self.lock();
            let (handler, generation) = core.handler()?;
            let before = core.phase;
            if !matches!(
                core.phase,
                FacadeState::Ready | FacadeState::Connecting | FacadeState::Connected
            ) {
                return Err(SessionError::InvalidTransition {
                    from: core.phase,
                    operation: "Connect",
                });
            }
            core.connect_ticket += 1;
            core.set_phase(FacadeState::Connecting);
            (handler, generation, core.connect_ticket, before)
        };

        tracing::info!(user_id, user_name, "connecting");
        let result = handler.connect(user_id, user_name).await;

        let mut core = self.lock();
        if core.generation != generation {
            return Err(SessionError::Superseded);
        }
        core.identity = Identity::of(handler.as_ref());
        if core.connect_ticket != ticket {
            tracing::warn!(user_id, "connect overtaken by a newer operation");
            return Err(SessionError::Superseded);
        }
        match result {
            Ok(()) => {
                core.set_phase(FacadeState::Connected);
                tracing::info!(user_id, "connected");
                Ok(())
            }
            Err(err) => {
                // A refused reconnect leaves the earlier binding in place.
                let still_bound = before == FacadeState::Connected
                    && core.connected
                    && core.identity.account_id.is_some();
                core.set_phase(if still_bound {
                    FacadeState::Connected
                } else {
                    FacadeState::Ready
                });
                tracing::error!(user_id, still_bound, error = %err, "connect failed");
                Err(err.into())
            }
        }
    }

    /// Drops the bound identity. Any connect still in flight is superseded.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (handler, generation) = {
            let mut core = self.lock();
            let found = core.handler()?;
            core.connect_ticket += 1;
            if matches!(core.phase, FacadeState::Connecting | FacadeState::Connected) {
                core.set_phase(FacadeState::Ready);
            }
            found
        };

        handler.disconnect().await;

        let mut core = self.lock();
        if core.generation == generation {
            core.identity = Identity::of(handler.as_ref());
            core.host = false;
            core.roster.clear();
        }
        tracing::info!("disconnected");
        Ok(())
    }

    /// Reconnects under a new identity.
    ///
    /// Disconnects first if connected. If the new connect fails the facade
    /// is left `Ready` and the error is returned.
    pub async fn switch_network(&self, user_id: &str, user_name: &str) -> Result<(), SessionError> {
        if self.state() == FacadeState::Connected {
            tracing::info!(user_id, "switching network identity");
            self.disconnect().await?;
        }
        self.connect(user_id, user_name).await
    }

    // -- lobby and room ----------------------------------------------------

    async fn create(
        &self,
        operation: Operation,
        name: &str,
        settings: Option<Settings>,
    ) -> Result<(), SessionError> {
        let (handler, generation, settings) = {
            let mut core = self.lock();
            let (handler, generation) = core.connected_handler(operation.as_str())?;
            let staged = core.staged.take();
            let settings = match (settings, staged) {
                (Some(explicit), _) => explicit,
                (None, Some(staged)) => staged.get(),
                (None, None) => handler.settings_factory().create_settings(),
            };
            (handler, generation, settings)
        };

        tracing::info!(%operation, name, max_players = settings.max_players, "creating");
        let result = match operation {
            Operation::CreateRoom => handler.create_room(name, settings).await,
            _ => handler.create_lobby(name, settings).await,
        };
        self.finish(&handler, generation, result)
    }

    /// Creates a lobby and joins it as host.
    ///
    /// Settings come from `settings` if given, else from the value staged by
    /// [`prepare_settings`](Self::prepare_settings), else from the backend's
    /// defaults. The staged value is consumed either way.
    pub async fn create_lobby(&self, name: &str, settings: Option<Settings>) -> Result<(), SessionError> {
        self.create(Operation::CreateLobby, name, settings).await
    }

    pub async fn connect_lobby(&self, id: &str) -> Result<(), SessionError> {
        let (handler, generation) = self.lock().connected_handler("ConnectLobby")?;
        let result = handler.connect_lobby(id).await;
        self.finish(&handler, generation, result)
    }

    pub async fn disconnect_lobby(&self) -> Result<(), SessionError> {
        let (handler, generation) = self.lock().connected_handler("DisconnectLobby")?;
        handler.disconnect_lobby().await;
        self.finish(&handler, generation, Ok(()))
    }

    /// Descriptors of joinable lobbies whose name contains `query`.
    pub async fn search_lobby(&self, query: &str) -> Result<Vec<String>, SessionError> {
        let (handler, generation) = self.lock().connected_handler("SearchLobby")?;
        let result = handler.search_lobby(query).await;
        self.finish(&handler, generation, result)
    }

    /// Room counterpart of [`create_lobby`](Self::create_lobby).
    pub async fn create_room(&self, name: &str, settings: Option<Settings>) -> Result<(), SessionError> {
        self.create(Operation::CreateRoom, name, settings).await
    }

    pub async fn connect_room(&self, id: &str) -> Result<(), SessionError> {
        let (handler, generation) = self.lock().connected_handler("ConnectRoom")?;
        let result = handler.connect_room(id).await;
        self.finish(&handler, generation, result)
    }

    /// Leaves the current room. Also clears the host flag and the
    /// connected-player list.
    pub async fn disconnect_room(&self) -> Result<(), SessionError> {
        let (handler, generation) = self.lock().connected_handler("DisconnectRoom")?;
        handler.disconnect_room().await;
        self.finish(&handler, generation, Ok(()))
    }

    pub async fn search_room(&self, query: &str) -> Result<Vec<String>, SessionError> {
        let (handler, generation) = self.lock().connected_handler("SearchRoom")?;
        let result = handler.search_room(query).await;
        self.finish(&handler, generation, result)
    }

    /// Sends to `target`, or to everyone when `target` is `None`.
    pub async fn send_data(&self, payload: &[u8], target: Option<&str>) -> Result<(), SessionError> {
        let (handler, generation) = self.lock().connected_handler("SendData")?;
        let result = handler.send_data(payload, target).await;
        self.finish(&handler, generation, result)
    }

    /// Polling hook. Forwards to the handler's `update_state`; never waits.
    pub fn tick(&self) {
        let handler = {
            let core = self.lock();
            match core.phase {
                FacadeState::Idle | FacadeState::Initializing | FacadeState::ShuttingDown => None,
                _ => core.active.as_ref().map(|a| Arc::clone(&a.handler)),
            }
        };
        if let Some(handler) = handler {
            handler.update_state();
        }
    }

    /// Stages a fresh copy of the backend's default settings for the next
    /// create operation and returns a handle to edit it.
    ///
    /// There is one slot: preparing again replaces the staged value.
    pub fn prepare_settings(&self) -> Result<SettingsHandle, SessionError> {
        let mut core = self.lock();
        let (handler, _) = core.handler()?;
        let handle = SettingsHandle::new(handler.settings_factory().create_settings());
        if core.staged.replace(handle.clone()).is_some() {
            tracing::debug!("replacing previously prepared settings");
        }
        Ok(handle)
    }

    // -- events -------------------------------------------------------------

    /// A receiver for every event the facade republishes, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.shared.publisher.subscribe()
    }

    /// Registers a synchronous observer.
    ///
    /// Observers run on the task that raised the event, after the facade
    /// has applied it and released its lock, so they may read facade state.
    pub fn observe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(listener)
    }

    // -- state --------------------------------------------------------------

    pub fn state(&self) -> FacadeState {
        self.lock().phase
    }

    /// Name of the attached backend.
    pub fn backend(&self) -> Option<&'static str> {
        self.lock().active.as_ref().map(|a| a.handler.backend())
    }

    /// Latest connection status the backend reported.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_host(&self) -> bool {
        self.lock().host
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.lock().identity.account_id.clone()
    }

    pub fn nick_name(&self) -> Option<NickName> {
        self.lock().identity.nick_name.clone()
    }

    pub fn station_id(&self) -> Option<StationId> {
        self.lock().identity.station_id.clone()
    }

    pub fn connected_players(&self) -> Vec<String> {
        self.lock().roster.connected().map(str::to_owned).collect()
    }

    pub fn disconnected_players(&self) -> Vec<String> {
        self.lock().roster.disconnected().map(str::to_owned).collect()
    }

    /// A copy of the roster.
    pub fn roster(&self) -> Roster {
        self.lock().roster.clone()
    }
}

impl fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("SessionFacade")
            .field("state", &core.phase)
            .field("backend", &core.active.as_ref().map(|a| a.handler.backend()))
            .field("account_id", &core.identity.account_id)
            .field("station_id", &core.identity.station_id)
            .field("connected", &core.connected)
            .field("host", &core.host)
            .finish()
    }
}
