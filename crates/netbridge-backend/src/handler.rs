//! The contract every concrete backend implements.

use async_trait::async_trait;
use netbridge_protocol::{AccountId, NickName, Settings, SettingsFactory, StationId};

use crate::{BackendError, EventEmitter};

/// A pluggable multiplayer backend.
///
/// The facade holds one handler at a time behind `Arc<dyn BackendHandler>`
/// and forwards every operation to it unchanged. Handlers keep their own
/// state behind interior mutability, so every method takes `&self`.
///
/// # Events
///
/// State changes are reported through [`events`](Self::events). A handler
/// must:
///
/// - emit the events describing an operation's effects **before** the
///   operation's future resolves;
/// - mutate its own state (and release its locks) **before** emitting, so a
///   listener reading [`account_id`](Self::account_id) and friends sees the
///   new values;
/// - emit exactly one completion event per invocation of each lobby/room
///   operation, named after the operation the caller invoked (a room
///   operation implemented on top of the lobby machinery still reports the
///   room name).
///
/// # Failures
///
/// Operations return `Err` for every failure. Lobby/room operations also emit
/// a completion event with `success == false` carrying the error text.
/// Nothing here panics on a backend refusal.
#[async_trait]
pub trait BackendHandler: Send + Sync + 'static {
    /// Short backend name; also the extension namespace of its settings.
    fn backend(&self) -> &'static str;

    /// Observer list the facade subscribes to.
    fn events(&self) -> &EventEmitter;

    /// Produces this backend's default settings.
    fn settings_factory(&self) -> &dyn SettingsFactory;

    fn account_id(&self) -> Option<AccountId>;

    fn nick_name(&self) -> Option<NickName>;

    fn station_id(&self) -> Option<StationId>;

    /// Brings the backend to a usable state. Idempotent.
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Tears everything down. Safe to call repeatedly or before `initialize`.
    async fn shutdown(&self);

    /// Establishes network presence and binds the given identity.
    async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), BackendError>;

    /// Drops network presence. Safe when not connected.
    async fn disconnect(&self);

    async fn create_lobby(&self, name: &str, settings: Settings) -> Result<(), BackendError>;

    async fn connect_lobby(&self, id: &str) -> Result<(), BackendError>;

    async fn disconnect_lobby(&self);

    async fn search_lobby(&self, query: &str) -> Result<Vec<String>, BackendError>;

    async fn create_room(&self, name: &str, settings: Settings) -> Result<(), BackendError>;

    async fn connect_room(&self, id: &str) -> Result<(), BackendError>;

    async fn disconnect_room(&self);

    async fn search_room(&self, query: &str) -> Result<Vec<String>, BackendError>;

    /// Sends `payload` to `target`, or broadcasts when `target` is `None`.
    async fn send_data(&self, payload: &[u8], target: Option<&str>) -> Result<(), BackendError>;

    /// Per-tick hook. Must not block; long work goes on a spawned task.
    fn update_state(&self);
}
