//! A handler that journals its lifecycle calls, for ordering assertions.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netbridge_backend::{BackendError, BackendHandler, DummyConfig, DummyHandler, EventEmitter};
use netbridge_protocol::{AccountId, NickName, Settings, SettingsFactory, StationId};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Delegates to an instant [`DummyHandler`], recording lifecycle calls and
/// failing on request.
pub struct JournalHandler {
    label: &'static str,
    inner: DummyHandler,
    journal: Journal,
    pub fail_initialize: bool,
    pub fail_connect: AtomicBool,
    pub shutdown_delay: Duration,
    pub ticks: AtomicUsize,
}

impl JournalHandler {
    pub fn new(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            inner: DummyHandler::new(DummyConfig::instant()),
            journal: Arc::clone(journal),
            fail_initialize: false,
            fail_connect: AtomicBool::new(false),
            shutdown_delay: Duration::ZERO,
            ticks: AtomicUsize::new(0),
        }
    }

    fn record(&self, call: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}.{call}", self.label));
    }
}

#[async_trait]
impl BackendHandler for JournalHandler {
    fn backend(&self) -> &'static str {
        self.label
    }

    fn events(&self) -> &EventEmitter {
        self.inner.events()
    }

    fn settings_factory(&self) -> &dyn SettingsFactory {
        self.inner.settings_factory()
    }

    fn account_id(&self) -> Option<AccountId> {
        self.inner.account_id()
    }

    fn nick_name(&self) -> Option<NickName> {
        self.inner.nick_name()
    }

    fn station_id(&self) -> Option<StationId> {
        self.inner.station_id()
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        self.record("initialize");
        if self.fail_initialize {
            return Err(BackendError::Rejected("refused by test handler".into()));
        }
        self.inner.initialize().await
    }

    async fn shutdown(&self) {
        self.record("shutdown.begin");
        tokio::time::sleep(self.shutdown_delay).await;
        self.inner.shutdown().await;
        self.record("shutdown.end");
    }

    async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), BackendError> {
        self.record("connect");
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("refused by test handler".into()));
        }
        self.inner.connect(user_id, user_name).await
    }

    async fn disconnect(&self) {
        self.record("disconnect");
        self.inner.disconnect().await
    }

    async fn create_lobby(&self, name: &str, settings: Settings) -> Result<(), BackendError> {
        self.inner.create_lobby(name, settings).await
    }

    async fn connect_lobby(&self, id: &str) -> Result<(), BackendError> {
        self.inner.connect_lobby(id).await
    }

    async fn disconnect_lobby(&self) {
        self.inner.disconnect_lobby().await
    }

    async fn search_lobby(&self, query: &str) -> Result<Vec<String>, BackendError> {
        self.inner.search_lobby(query).await
    }

    async fn create_room(&self, name: &str, settings: Settings) -> Result<(), BackendError> {
        self.inner.create_room(name, settings).await
    }

    async fn connect_room(&self, id: &str) -> Result<(), BackendError> {
        self.inner.connect_room(id).await
    }

    async fn disconnect_room(&self) {
        self.inner.disconnect_room().await
    }

    async fn search_room(&self, query: &str) -> Result<Vec<String>, BackendError> {
        self.inner.search_room(query).await
    }

    async fn send_data(&self, payload: &[u8], target: Option<&str>) -> Result<(), BackendError> {
        self.inner.send_data(payload, target).await
    }

    fn update_state(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}
