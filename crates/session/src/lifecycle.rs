//! Connection lifecycle orchestration
//!
//! The supervisor owns when a [`PeerLink`] exists: it reacts to network
//! and app-lifecycle signals, validates the session against the pairing
//! directory under a rate limit, schedules capped exponential-backoff
//! reconnects with a single pending timer, heartbeats presence while
//! foregrounded, and fans connection events out to subscribers.

use crate::config::LinkConfig;
use crate::ice::IceServerProvider;
use crate::peer::{
    detect_transport_factory, LinkCallbacks, LinkEvent, MediaSource, PeerLink, StaticTrackSource,
};
use crate::signaling::{RelayChannel, SignalingChannel};
use paircam_core::{
    CommandHistorySink, ConnectionEvent, Error, PairingDirectory, PairingStore, PresenceApi,
    Result, RetryPolicy,
};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    /// Nothing to supervise
    Idle,
    /// First connection in progress
    Connecting,
    /// Link established
    Connected,
    /// Reconnection scheduled or running
    Reconnecting,
    /// Reconnection exhausted
    Disconnected,
    /// Session invalidated or fatal fault
    Error,
}

struct SupervisorState {
    phase: SupervisorPhase,
    online: bool,
    foreground: bool,
    attempt: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    last_validation: Option<Instant>,
    expired_emitted: bool,
    reconnect_exhausted: bool,
}

impl SupervisorState {
    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
            debug!("pending reconnect timer cancelled");
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    fn is_terminal(&self) -> bool {
        self.expired_emitted || self.reconnect_exhausted
    }
}

struct SupervisorInner {
    weak_self: Weak<SupervisorInner>,
    config: LinkConfig,
    link: Arc<PeerLink>,
    store: Arc<dyn PairingStore>,
    directory: Arc<dyn PairingDirectory>,
    presence: Arc<dyn PresenceApi>,
    events: broadcast::Sender<ConnectionEvent>,
    state: Mutex<SupervisorState>,
}

/// Top-level connection lifecycle manager.
pub struct LinkSupervisor {
    inner: Arc<SupervisorInner>,
}

impl LinkSupervisor {
    /// Create a supervisor over an injected link and collaborators.
    pub fn new(
        config: LinkConfig,
        link: Arc<PeerLink>,
        store: Arc<dyn PairingStore>,
        directory: Arc<dyn PairingDirectory>,
        presence: Arc<dyn PresenceApi>,
    ) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(64);
        let inner = Arc::new_cyclic(|weak| SupervisorInner {
            weak_self: weak.clone(),
            config,
            link,
            store,
            directory,
            presence,
            events,
            state: Mutex::new(SupervisorState {
                phase: SupervisorPhase::Idle,
                online: true,
                foreground: true,
                attempt: 0,
                reconnect_timer: None,
                heartbeat: None,
                last_validation: None,
                expired_emitted: false,
                reconnect_exhausted: false,
            }),
        });

        Ok(Self { inner })
    }

    /// Create a supervisor with the production wiring: relay channel,
    /// HTTP credential fetcher, static track source, and the probed
    /// transport factory.
    pub fn with_defaults(
        config: LinkConfig,
        store: Arc<dyn PairingStore>,
        directory: Arc<dyn PairingDirectory>,
        presence: Arc<dyn PresenceApi>,
        command_sink: Option<Arc<dyn CommandHistorySink>>,
    ) -> Result<Self> {
        config.validate()?;

        let channel: Arc<dyn SignalingChannel> =
            Arc::new(RelayChannel::new(&config.relay_url, command_sink));
        let ice = Arc::new(IceServerProvider::from_config(&config)?);
        let media: Arc<dyn MediaSource> = Arc::new(StaticTrackSource);
        let factory = detect_transport_factory();
        let link = Arc::new(PeerLink::new(&config, channel, ice, media, factory));

        Self::new(config, link, store, directory, presence)
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// The supervised link.
    pub fn link(&self) -> &Arc<PeerLink> {
        &self.inner.link
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SupervisorPhase {
        self.inner.state.lock().await.phase
    }

    /// Establish the link for the stored session.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let Some(session) = inner.store.session().await else {
            return Err(Error::Session("device is not paired".to_string()));
        };

        {
            let mut state = inner.state.lock().await;
            state.phase = SupervisorPhase::Connecting;
            state.expired_emitted = false;
            state.reconnect_exhausted = false;
        }
        inner.start_heartbeat().await;

        match inner.link.init(session, inner.link_callbacks()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.state.lock().await.phase = SupervisorPhase::Error;
                Err(e)
            }
        }
    }

    /// Feed a network connectivity change.
    pub async fn handle_network_change(&self, online: bool) {
        self.inner.handle_network_change(online).await;
    }

    /// Feed an app foreground/background change.
    pub async fn handle_app_state(&self, foreground: bool) {
        self.inner.handle_app_state(foreground).await;
    }

    /// Validate the stored session against the pairing directory.
    ///
    /// Rate limited: inside the window the previous verdict stands
    /// without a network round trip.
    pub async fn validate_session(&self) -> Result<bool> {
        self.inner.validate_session().await
    }

    /// Full recovery path after an unrecoverable fault.
    pub async fn force_reset(&self) {
        self.inner.force_reset().await;
    }

    /// Report a fault from the embedding application.
    pub async fn report_fatal_error(&self, error: &Error, recoverable: bool) {
        self.inner.report_fatal_error(&error.to_string(), recoverable).await;
    }
}

impl SupervisorInner {
    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn link_callbacks(&self) -> LinkCallbacks {
        let weak = self.weak_self.clone();
        LinkCallbacks::new(move |event| {
            let Some(inner) = weak.upgrade() else { return };
            tokio::spawn(async move {
                inner.handle_link_event(event).await;
            });
        })
    }

    async fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                let was_reconnecting = {
                    let mut state = self.state.lock().await;
                    let was = state.attempt > 0;
                    state.attempt = 0;
                    state.reconnect_exhausted = false;
                    state.phase = SupervisorPhase::Connected;
                    was
                };
                info!("link connected");
                self.emit(ConnectionEvent::LinkConnected);
                if was_reconnecting {
                    self.emit(ConnectionEvent::ReconnectSucceeded);
                }
            }
            LinkEvent::Disconnected => {
                debug!("link disconnected, grace period running");
            }
            LinkEvent::Lost => {
                warn!("link lost");
                self.emit(ConnectionEvent::LinkLost);
                self.schedule_reconnect().await;
            }
            LinkEvent::Degraded { failed_polls } => {
                warn!("link degraded after {} failed health polls", failed_polls);
                self.emit(ConnectionEvent::LinkDegraded);
            }
            LinkEvent::CheckingTimeout => {
                warn!("connectivity checks stalled");
            }
            LinkEvent::NegotiationError { message } => {
                warn!("negotiation error: {}", message);
            }
            LinkEvent::Fatal { message } => {
                self.report_fatal_error(&message, false).await;
            }
        }
    }

    async fn handle_network_change(&self, online: bool) {
        info!("network changed: online={}", online);
        self.emit(ConnectionEvent::NetworkChanged { online });

        let foreground = {
            let mut state = self.state.lock().await;
            state.online = online;
            if !online {
                state.cancel_reconnect_timer();
                state.stop_heartbeat();
            }
            state.foreground
        };

        if online && foreground {
            self.start_heartbeat().await;
            if let Ok(true) = self.validate_session().await {
                self.schedule_reconnect().await;
            }
        }
    }

    async fn handle_app_state(&self, foreground: bool) {
        info!("app state changed: foreground={}", foreground);
        self.emit(ConnectionEvent::AppStateChanged { foreground });

        let online = {
            let mut state = self.state.lock().await;
            state.foreground = foreground;
            if !foreground {
                // The link itself survives backgrounding; the platform may
                // grant brief background execution and the user may return.
                state.cancel_reconnect_timer();
                state.stop_heartbeat();
            }
            state.online
        };

        if foreground && online {
            self.start_heartbeat().await;
            if let Ok(true) = self.validate_session().await {
                self.schedule_reconnect().await;
            }
        }
    }

    async fn validate_session(&self) -> Result<bool> {
        {
            let state = self.state.lock().await;
            if state.expired_emitted {
                return Ok(false);
            }
            if let Some(at) = state.last_validation {
                if at.elapsed() < self.config.options.validation_interval() {
                    debug!("session validation inside rate-limit window, treated as valid");
                    return Ok(true);
                }
            }
        }

        let Some(session) = self.store.session().await else {
            debug!("no stored session to validate");
            return Ok(false);
        };

        let partner = match self
            .directory
            .current_partner(&session.local_device_id)
            .await
        {
            Ok(partner) => partner,
            Err(e) => {
                // Transient lookup faults keep the previous verdict; the
                // next window retries.
                warn!("pairing lookup failed, keeping session: {}", e);
                return Ok(true);
            }
        };

        self.state.lock().await.last_validation = Some(Instant::now());

        if partner.as_deref() == Some(session.peer_device_id.as_str()) {
            debug!("session validated");
            self.emit(ConnectionEvent::SessionValidated);
            Ok(true)
        } else {
            warn!(
                "pairing directory disagrees (recorded partner: {:?}), clearing local pairing",
                partner
            );
            self.store.clear_pairing().await;
            let mut state = self.state.lock().await;
            if !state.expired_emitted {
                state.expired_emitted = true;
                state.phase = SupervisorPhase::Error;
                drop(state);
                self.emit(ConnectionEvent::SessionExpired);
            }
            Ok(false)
        }
    }

    // Returns a boxed, concretely-`Send` future rather than an `async fn`
    // so the opaque return type does not participate in auto-trait inference.
    // `run_reconnect_attempt` awaits this and is itself re-entered from the
    // task spawned below; the boxed type breaks that recursion cycle.
    fn schedule_reconnect(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        let mut state = self.state.lock().await;

        if state.reconnect_timer.is_some() {
            debug!("reconnect already pending");
            return;
        }
        if state.is_terminal() || !state.online {
            return;
        }

        let attempt = state.attempt + 1;
        if attempt > self.config.options.max_reconnect_attempts {
            warn!(
                "reconnection exhausted after {} attempts",
                state.attempt
            );
            state.reconnect_exhausted = true;
            state.phase = SupervisorPhase::Disconnected;
            drop(state);
            self.emit(ConnectionEvent::ReconnectFailed);
            return;
        }

        state.attempt = attempt;
        state.phase = SupervisorPhase::Reconnecting;

        let policy = RetryPolicy {
            max_attempts: self.config.options.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.config.options.reconnect_backoff_initial_ms),
            max_delay: Duration::from_millis(self.config.options.reconnect_backoff_max_ms),
            multiplier: self.config.options.reconnect_backoff_multiplier,
        };
        let delay = policy.delay_for(attempt - 1);

        info!(
            "reconnect attempt {}/{} scheduled in {:?}",
            attempt, self.config.options.max_reconnect_attempts, delay
        );
        self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });

        let weak = self.weak_self.clone();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.run_reconnect_attempt().await;
        }));
        })
    }

    async fn run_reconnect_attempt(&self) {
        {
            let mut state = self.state.lock().await;
            state.reconnect_timer = None;
            if state.is_terminal() || !state.online {
                return;
            }
        }

        match self.validate_session().await {
            Ok(true) => {}
            _ => return,
        }

        let Some(session) = self.store.session().await else {
            return;
        };

        if let Err(e) = self.link.init(session, self.link_callbacks()).await {
            warn!("reconnect attempt failed: {}", e);
            self.schedule_reconnect().await;
        }
    }

    async fn start_heartbeat(&self) {
        let mut state = self.state.lock().await;
        if state.heartbeat.is_some() || !state.online || !state.foreground {
            return;
        }

        let weak = self.weak_self.clone();
        let interval = self.config.options.heartbeat_interval();
        state.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { return };
                let Some(session) = inner.store.session().await else {
                    continue;
                };
                if let Err(e) = inner
                    .presence
                    .update_online_status(&session.local_device_id, true)
                    .await
                {
                    warn!("presence heartbeat failed: {}", e);
                }
            }
        }));
    }

    async fn force_reset(&self) {
        info!("force reset");
        {
            let mut state = self.state.lock().await;
            state.cancel_reconnect_timer();
            state.stop_heartbeat();
            state.attempt = 0;
            state.reconnect_exhausted = false;
            state.expired_emitted = false;
            state.last_validation = None;
            state.phase = SupervisorPhase::Idle;
        }

        // Session is needed for the external calls, so read before clearing.
        let session = self.store.session().await;

        self.link.destroy().await;

        if let Some(session) = &session {
            if let Err(e) = self
                .presence
                .disconnect_all(&session.local_device_id)
                .await
            {
                warn!("presence disconnect failed: {}", e);
            }
            if let Err(e) = self.directory.unpair(&session.local_device_id).await {
                warn!("unpair failed: {}", e);
            }
        }

        self.store.clear_pairing().await;
    }

    async fn report_fatal_error(&self, message: &str, recoverable: bool) {
        if recoverable {
            warn!("recoverable fault: {}", message);
            self.schedule_reconnect().await;
        } else {
            error!("fatal fault: {}", message);
            self.force_reset().await;
            self.emit(ConnectionEvent::FatalError {
                message: message.to_string(),
            });
        }
    }
}
