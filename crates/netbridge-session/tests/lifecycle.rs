//! Facade lifecycle: handler swaps, teardown, identity switches.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use netbridge_backend::{BackendError, BackendHandler};
use netbridge_protocol::NetworkEvent;
use netbridge_session::{FacadeState, SessionError, SessionFacade};

use support::{Journal, JournalHandler, entries};

#[tokio::test]
async fn test_initialize_second_handler_shuts_first_down_before_starting() {
    let journal = Journal::default();
    let first = Arc::new(JournalHandler::new("h1", &journal));
    let second = Arc::new(JournalHandler::new("h2", &journal));
    let facade = SessionFacade::default();

    facade.initialize(first.clone()).await.unwrap();
    facade.initialize(second.clone()).await.unwrap();

    assert_eq!(
        entries(&journal),
        vec!["h1.initialize", "h1.shutdown.begin", "h1.shutdown.end", "h2.initialize"]
    );
    assert_eq!(facade.backend(), Some("h2"));
    assert_eq!(facade.state(), FacadeState::Ready);
}

#[tokio::test]
async fn test_retired_handler_events_never_reach_subscribers() {
    let journal = Journal::default();
    let first = Arc::new(JournalHandler::new("h1", &journal));
    let facade = SessionFacade::default();
    facade.initialize(first.clone()).await.unwrap();
    facade
        .initialize(Arc::new(JournalHandler::new("h2", &journal)))
        .await
        .unwrap();
    let mut events = facade.subscribe();

    first.events().emit(NetworkEvent::HostStatusChanged(true));

    assert!(events.try_recv().is_err());
    assert!(!facade.is_host());
}

#[tokio::test]
async fn test_initialize_failure_returns_to_idle_and_releases_handler() {
    let journal = Journal::default();
    let mut handler = JournalHandler::new("h1", &journal);
    handler.fail_initialize = true;
    let facade = SessionFacade::default();

    let result = facade.initialize(Arc::new(handler)).await;

    assert_eq!(
        result,
        Err(SessionError::Backend(BackendError::Rejected("refused by test handler".into())))
    );
    assert_eq!(facade.state(), FacadeState::Idle);
    assert_eq!(facade.backend(), None);
    assert_eq!(
        entries(&journal),
        vec!["h1.initialize", "h1.shutdown.begin", "h1.shutdown.end"]
    );
}

#[tokio::test]
async fn test_shutdown_twice_is_noop() {
    let journal = Journal::default();
    let facade = SessionFacade::default();
    facade
        .initialize(Arc::new(JournalHandler::new("h1", &journal)))
        .await
        .unwrap();

    facade.shutdown().await;
    facade.shutdown().await;

    assert_eq!(facade.state(), FacadeState::Idle);
    let shutdowns = entries(&journal)
        .iter()
        .filter(|e| e.as_str() == "h1.shutdown.begin")
        .count();
    assert_eq!(shutdowns, 1);
}

#[tokio::test]
async fn test_shutdown_never_initialized_is_noop() {
    let facade = SessionFacade::default();
    facade.shutdown().await;
    assert_eq!(facade.state(), FacadeState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_operations_during_shutdown_fail_fast() {
    let journal = Journal::default();
    let mut handler = JournalHandler::new("h1", &journal);
    handler.shutdown_delay = Duration::from_secs(1);
    let facade = SessionFacade::default();
    facade.initialize(Arc::new(handler)).await.unwrap();

    let (_, connect, settings) = tokio::join!(
        facade.shutdown(),
        facade.connect("u1", "Alice"),
        async { facade.prepare_settings().err() }
    );

    assert_eq!(connect, Err(SessionError::ShuttingDown));
    assert_eq!(settings, Some(SessionError::ShuttingDown));
    assert!(!entries(&journal).contains(&"h1.connect".to_owned()));
    assert_eq!(facade.state(), FacadeState::Idle);
}

#[tokio::test]
async fn test_operations_without_handler_return_handler_missing() {
    let facade = SessionFacade::default();

    assert_eq!(facade.disconnect().await, Err(SessionError::HandlerMissing));
    assert_eq!(
        facade.search_lobby("").await,
        Err(SessionError::HandlerMissing)
    );
    assert_eq!(
        facade.send_data(b"hi", None).await,
        Err(SessionError::HandlerMissing)
    );
}

#[tokio::test]
async fn test_switch_network_rebinds_identity() {
    let journal = Journal::default();
    let facade = SessionFacade::default();
    facade
        .initialize(Arc::new(JournalHandler::new("h1", &journal)))
        .await
        .unwrap();
    facade.connect("u1", "Alice").await.unwrap();

    facade.switch_network("u2", "Bob").await.unwrap();

    assert_eq!(facade.account_id().unwrap().as_str(), "u2");
    assert_eq!(facade.nick_name().unwrap().as_str(), "Bob");
    assert_eq!(facade.state(), FacadeState::Connected);
    assert_eq!(
        entries(&journal),
        vec!["h1.initialize", "h1.connect", "h1.disconnect", "h1.connect"]
    );
}

#[tokio::test]
async fn test_switch_network_failed_connect_leaves_ready() {
    let journal = Journal::default();
    let handler = Arc::new(JournalHandler::new("h1", &journal));
    let facade = SessionFacade::default();
    facade.initialize(handler.clone()).await.unwrap();
    facade.connect("u1", "Alice").await.unwrap();
    handler.fail_connect.store(true, Ordering::SeqCst);

    let result = facade.switch_network("u2", "Bob").await;

    assert!(matches!(result, Err(SessionError::Backend(_))));
    assert_eq!(facade.state(), FacadeState::Ready);
    assert!(facade.account_id().is_none());

    // not stuck: a later connect still works
    handler.fail_connect.store(false, Ordering::SeqCst);
    facade.connect("u2", "Bob").await.unwrap();
    assert_eq!(facade.state(), FacadeState::Connected);
}

#[tokio::test]
async fn test_switch_network_when_not_connected_connects_directly() {
    let journal = Journal::default();
    let facade = SessionFacade::default();
    facade
        .initialize(Arc::new(JournalHandler::new("h1", &journal)))
        .await
        .unwrap();

    facade.switch_network("u2", "Bob").await.unwrap();

    assert_eq!(entries(&journal), vec!["h1.initialize", "h1.connect"]);
}

#[tokio::test]
async fn test_tick_forwards_to_active_handler() {
    let journal = Journal::default();
    let handler = Arc::new(JournalHandler::new("h1", &journal));
    let facade = SessionFacade::default();
    facade.initialize(handler.clone()).await.unwrap();

    facade.tick();
    facade.tick();

    assert_eq!(handler.ticks.load(Ordering::SeqCst), 2);
}
