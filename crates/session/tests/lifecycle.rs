//! Supervisor scenarios: validation rate limiting, reconnection backoff,
//! environment signals, and the recovery path.

mod support;

use paircam_core::ConnectionEvent;
use paircam_session::peer::{MediaSource, PeerLink, TransportFactory, TransportState};
use paircam_session::signaling::SignalingChannel;
use paircam_session::{Error, IceServerProvider, LinkConfig, LinkSupervisor, SupervisorPhase};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tokio::sync::broadcast;

struct Fixture {
    supervisor: LinkSupervisor,
    channel: Arc<MemoryChannel>,
    factory: Arc<FakeTransportFactory>,
    store: Arc<MemoryPairingStore>,
    directory: Arc<FakeDirectory>,
    presence: Arc<FakePresence>,
}

impl Fixture {
    fn new(config: LinkConfig) -> Self {
        Self::with_store(config, MemoryPairingStore::new(Some(camera_session())))
    }

    fn with_store(config: LinkConfig, store: Arc<MemoryPairingStore>) -> Self {
        let journal = journal();
        let channel = MemoryChannel::new();
        let factory = FakeTransportFactory::new(journal);
        let media = FakeMediaSource::new();
        let ice = Arc::new(IceServerProvider::from_config(&config).unwrap());

        let link = Arc::new(PeerLink::new(
            &config,
            channel.clone() as Arc<dyn SignalingChannel>,
            ice,
            media as Arc<dyn MediaSource>,
            factory.clone() as Arc<dyn TransportFactory>,
        ));

        let directory = FakeDirectory::with_partner("dir-1");
        let presence = FakePresence::new();

        let supervisor = LinkSupervisor::new(
            config,
            link,
            store.clone(),
            directory.clone(),
            presence.clone(),
        )
        .unwrap();

        Self {
            supervisor,
            channel,
            factory,
            store,
            directory,
            presence,
        }
    }
}

/// Drain every event already queued on the receiver.
fn drain(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[ConnectionEvent], probe: impl Fn(&ConnectionEvent) -> bool) -> usize {
    events.iter().filter(|e| probe(e)).count()
}

#[tokio::test]
async fn connect_establishes_link_and_emits_connected() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.connect().await.unwrap();
    let transport = fx.factory.transport(0);
    transport.fire_state(TransportState::Connected);
    settle().await;

    assert_eq!(fx.supervisor.phase().await, SupervisorPhase::Connected);
    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, ConnectionEvent::LinkConnected)), 1);
    // First connection is not a reconnect.
    assert_eq!(count(&events, |e| matches!(e, ConnectionEvent::ReconnectSucceeded)), 0);
}

#[tokio::test]
async fn connect_without_pairing_fails() {
    let fx = Fixture::with_store(test_config(), MemoryPairingStore::new(None));

    assert!(matches!(
        fx.supervisor.connect().await,
        Err(Error::Session(_))
    ));
    assert_eq!(fx.factory.created_count(), 0);
}

#[tokio::test]
async fn validation_is_rate_limited_to_one_round_trip() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    assert!(fx.supervisor.validate_session().await.unwrap());
    assert!(fx.supervisor.validate_session().await.unwrap());

    assert_eq!(fx.directory.lookups.load(Ordering::SeqCst), 1);
    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::SessionValidated)),
        1
    );
}

#[tokio::test]
async fn partner_mismatch_clears_pairing_and_expires_once() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();
    fx.directory.set_partner(Some("someone-else"));

    assert!(!fx.supervisor.validate_session().await.unwrap());
    assert!(!fx.supervisor.validate_session().await.unwrap());

    assert_eq!(fx.store.clears.load(Ordering::SeqCst), 1);
    assert!(fx.store.session().await.is_none());
    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::SessionExpired)),
        1
    );
    assert_eq!(fx.supervisor.phase().await, SupervisorPhase::Error);
}

#[tokio::test]
async fn transient_lookup_failure_keeps_session() {
    let fx = Fixture::new(test_config());
    fx.directory.set_fail_lookups(true);

    assert!(fx.supervisor.validate_session().await.unwrap());
    assert_eq!(fx.store.clears.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reconnect_exhaustion_emits_terminal_event_once() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    // Every transport construction fails, so every attempt fails.
    fx.factory.set_fail_creates(true);

    fx.supervisor.handle_network_change(true).await;

    // Backoff delays are 10/20/40ms; give every attempt time to run out.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })),
        3
    );
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::ReconnectFailed)),
        1
    );
    assert_eq!(fx.supervisor.phase().await, SupervisorPhase::Disconnected);

    // Exhaustion is terminal: nothing further gets scheduled.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn reconnect_delays_follow_capped_backoff() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();
    fx.factory.set_fail_creates(true);

    fx.supervisor.handle_network_change(true).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let delays: Vec<Duration> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ConnectionEvent::ReconnectScheduled { delay, .. } => Some(delay),
            _ => None,
        })
        .collect();

    assert_eq!(delays.len(), 3);
    for pair in delays.windows(2) {
        assert!(pair[1] >= pair[0], "delays must be non-decreasing");
    }
    // Capped at the configured maximum (40ms in the test config).
    assert_eq!(delays[2], Duration::from_millis(40));
}

#[tokio::test]
async fn successful_reconnect_resets_the_counter() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.handle_network_change(true).await;
    // Let the first scheduled attempt run; transports succeed.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The attempt initialized a link; drive it to connected.
    assert!(fx.factory.created_count() >= 1);
    let transport = fx.factory.transport(fx.factory.created_count() - 1);
    transport.fire_state(TransportState::Connected);
    settle().await;

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::ReconnectSucceeded)),
        1
    );
    assert_eq!(fx.supervisor.phase().await, SupervisorPhase::Connected);
}

#[tokio::test]
async fn backgrounding_cancels_pending_timer_but_keeps_link() {
    let mut config = test_config();
    // A long backoff so the timer is still pending when backgrounded.
    config.options.reconnect_backoff_initial_ms = 5_000;
    let fx = Fixture::new(config);
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.connect().await.unwrap();
    assert_eq!(fx.factory.created_count(), 1);

    fx.supervisor.handle_network_change(true).await;
    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })),
        1
    );

    fx.supervisor.handle_app_state(false).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // No attempt ran, and the live link was not torn down.
    assert_eq!(fx.factory.created_count(), 1);
    assert!(!fx.factory.transport(0).closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn link_loss_schedules_reconnection() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.connect().await.unwrap();
    let transport = fx.factory.transport(0);
    transport.fire_state(TransportState::Connected);
    settle().await;

    transport.fire_state(TransportState::Disconnected);
    // Past the 80ms grace period.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, ConnectionEvent::LinkLost)), 1);
    assert!(count(&events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })) >= 1);
}

#[tokio::test]
async fn force_reset_unpairs_and_clears_state() {
    let fx = Fixture::new(test_config());

    fx.supervisor.connect().await.unwrap();
    fx.supervisor.force_reset().await;

    assert!(fx.store.session().await.is_none());
    assert_eq!(fx.store.clears.load(Ordering::SeqCst), 1);
    assert_eq!(fx.directory.unpairs.load(Ordering::SeqCst), 1);
    assert_eq!(fx.presence.disconnects.load(Ordering::SeqCst), 1);
    assert!(fx.factory.transport(0).closed.load(Ordering::SeqCst));
    assert_eq!(fx.supervisor.phase().await, SupervisorPhase::Idle);
}

#[tokio::test]
async fn fatal_error_resets_and_emits_once() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.connect().await.unwrap();
    fx.supervisor
        .report_fatal_error(&Error::Transport("encoder died".to_string()), false)
        .await;
    settle().await;

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::FatalError { .. })),
        1
    );
    assert!(fx.store.session().await.is_none());
}

#[tokio::test]
async fn recoverable_error_schedules_reconnect() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.connect().await.unwrap();
    fx.supervisor
        .report_fatal_error(&Error::Signaling("relay blip".to_string()), true)
        .await;

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })),
        1
    );
    assert!(fx.store.session().await.is_some());
}

#[tokio::test]
async fn heartbeat_reports_presence_while_foregrounded() {
    let fx = Fixture::new(test_config());

    fx.supervisor.connect().await.unwrap();
    // The interval's first tick completes immediately.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(fx.presence.online_updates.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn network_loss_stops_scheduling() {
    let fx = Fixture::new(test_config());
    let mut rx = fx.supervisor.subscribe();

    fx.supervisor.handle_network_change(false).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::NetworkChanged { online: false })),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })),
        0
    );
    assert_eq!(fx.factory.created_count(), 0);
}
