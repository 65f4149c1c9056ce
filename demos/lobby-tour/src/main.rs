use std::sync::Arc;
use std::time::Duration;

use netbridge::prelude::*;
use tokio::sync::broadcast;
use tracing::info;

// ---------------------------------------------------------------------------
// Event printing
// ---------------------------------------------------------------------------

fn describe(event: &NetworkEvent) -> String {
    match event {
        NetworkEvent::DataReceived(bytes) => {
            format!("data: {}", String::from_utf8_lossy(bytes))
        }
        NetworkEvent::PlayerConnected { name, .. } => format!("{name} joined"),
        NetworkEvent::PlayerDisconnected { name, .. } => format!("{name} left"),
        NetworkEvent::ConnectionStatusChanged(up) => format!("connected: {up}"),
        NetworkEvent::HostStatusChanged(host) => format!("host: {host}"),
        NetworkEvent::LobbyOperationCompleted(outcome)
        | NetworkEvent::RoomOperationCompleted(outcome) => format!(
            "{} {}: {}",
            outcome.operation,
            if outcome.success { "ok" } else { "failed" },
            outcome.message
        ),
    }
}

/// Prints every event `facade` publishes, tagged with `label`.
fn print_events(label: &'static str, facade: &SessionFacade) {
    let mut events = facade.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("  [{label}] {}", describe(&event)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    println!("  [{label}] ... {missed} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Tour stops
// ---------------------------------------------------------------------------

async fn dummy_tour(facade: &SessionFacade) -> Result<(), NetbridgeError> {
    println!("== dummy backend ==");
    facade.initialize(Arc::new(DummyHandler::default())).await?;
    println!("account {:?}", facade.account_id());

    facade.connect("u1", "Alice").await?;
    let settings = facade.prepare_settings()?;
    settings.set_max_players(4);
    settings.set_property("mapName", "harbor");
    facade.create_lobby("Room1", None).await?;
    println!("station {:?}, players {:?}", facade.station_id(), facade.connected_players());

    facade.send_data(b"hello, me", None).await?;
    for listing in facade.search_lobby("Dummy").await? {
        println!("found {listing}");
    }
    facade.disconnect_lobby().await?;
    pause().await;
    Ok(())
}

async fn matchmaking_tour(host: &SessionFacade) -> Result<(), NetbridgeError> {
    println!("== matchmaking backend ==");
    let service = LocalMatchmaker::new();
    let config = MatchmakingConfig::new("1.0", WaitPolicy::new(Duration::from_secs(5)));

    // Replaces the dummy handler on the same facade.
    host.initialize(Arc::new(MatchmakingHandler::new(service.client(), config.clone())))
        .await?;
    let guest = SessionFacade::default();
    print_events("guest", &guest);
    guest
        .initialize(Arc::new(MatchmakingHandler::new(service.client(), config)))
        .await?;

    host.connect("u1", "Alice").await?;
    guest.connect("u2", "Bob").await?;
    host.create_room("Arena", None).await?;
    for listing in guest.search_room("Arena").await? {
        println!("guest sees {listing}");
    }
    guest.connect_room("Arena").await?;
    pause().await;

    guest.send_data(b"ready", None).await?;
    pause().await;

    host.disconnect_room().await?;
    pause().await;
    println!(
        "after host left: guest host={} players={:?} gone={:?}",
        guest.is_host(),
        guest.connected_players(),
        guest.disconnected_players()
    );

    guest.shutdown().await;
    Ok(())
}

async fn relay_tour(host: &SessionFacade) -> Result<(), NetbridgeError> {
    println!("== relay backend ==");
    let hub = Arc::new(LocalRelayHub::default());
    let config = RelayConfig::new(WaitPolicy::new(Duration::from_secs(5)));

    host.initialize(Arc::new(RelayHandler::new(hub.clone(), config.clone())))
        .await?;
    let guest = SessionFacade::default();
    guest
        .initialize(Arc::new(RelayHandler::new(hub, config)))
        .await?;
    host.connect("alice", "Alice").await?;
    guest.connect("bob", "Bob").await?;

    // Relay members and packets only show up when the handler is polled.
    let host_updates = UpdateLoop::spawn(host.clone(), TickConfig::with_rate(20));
    let guest_updates = UpdateLoop::spawn(guest.clone(), TickConfig::with_rate(20));

    host.create_lobby("Harbor", None).await?;
    for listing in guest.search_lobby("Harbor").await? {
        println!("guest sees {listing}");
    }
    if let Some(station) = host.station_id() {
        guest.connect_lobby(station.as_str()).await?;
    }
    host.send_data(b"welcome aboard", None).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("host roster {:?}", host.connected_players());

    info!(
        host_ticks = host_updates.stop().await,
        guest_ticks = guest_updates.stop().await,
        "update loops stopped"
    );
    guest.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), NetbridgeError> {
    netbridge::init_tracing();

    let facade = SessionFacade::default();
    print_events("host", &facade);

    dummy_tour(&facade).await?;
    matchmaking_tour(&facade).await?;
    relay_tour(&facade).await?;

    facade.shutdown().await;
    println!("final state {}", facade.state());
    Ok(())
}
