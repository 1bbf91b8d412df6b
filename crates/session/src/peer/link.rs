//! Per-session negotiation state machine
//!
//! One [`PeerLink`] owns at most one live negotiation at a time. Every
//! `init` allocates a fresh epoch from a monotonic counter and re-checks
//! it after each suspension point; `destroy` (or a newer `init`) cancels
//! in-flight work purely by bumping the counter, so a stale continuation
//! observes the mismatch and becomes a no-op. Teardown runs as a single
//! shared in-flight future so init and destroy serialize instead of
//! racing.

use crate::config::{LinkConfig, LinkOptions};
use crate::ice::IceServerProvider;
use crate::peer::media::{acquire_with_retry, LocalTrackSet, MediaSource};
use crate::peer::transport::{
    PeerTransport, SignalingPhase, TransportFactory, TransportHandlers, TransportState,
};
use crate::sdp::{prefer_video_codec, FALLBACK_VIDEO_CODEC};
use crate::signaling::{
    CandidateInit, CandidateKind, EnvelopeHandler, SignalEnvelope, SignalPayload, SignalingChannel,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use paircam_core::{CommandRecord, Error, Result, Role, Session};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No negotiation exists
    Idle,
    /// `init` is building the instance
    Initializing,
    /// Camera side: offer sent, waiting for an answer
    Offering,
    /// Director side: announced, waiting for an offer
    AwaitingOffer,
    /// Descriptions exchanged, connectivity checks running
    Negotiating,
    /// Media path established
    Connected,
    /// Path dropped or restarting, recovery in progress
    Reconnecting,
    /// Destroyed
    Closed,
}

/// Events surfaced to the link's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The media path is up
    Connected,
    /// The path dropped; a grace period is running
    Disconnected,
    /// The grace period elapsed without recovery
    Lost,
    /// Health polling found no nominated candidate pair repeatedly
    Degraded {
        /// Consecutive failed polls at emission time
        failed_polls: u32,
    },
    /// The transport sat in "checking" past the stall timeout
    CheckingTimeout,
    /// A negotiation step failed outside the swallowed race class
    NegotiationError {
        /// Rendered error
        message: String,
    },
    /// The link cannot recover by itself
    Fatal {
        /// Rendered error
        message: String,
    },
}

/// Callbacks supplied to [`PeerLink::init`].
///
/// Handlers run on the link's tasks and must not block.
#[derive(Clone)]
pub struct LinkCallbacks {
    on_event: Arc<dyn Fn(LinkEvent) + Send + Sync>,
    on_command: Option<Arc<dyn Fn(CommandRecord) + Send + Sync>>,
}

impl LinkCallbacks {
    /// Callbacks with an event handler only.
    pub fn new(on_event: impl Fn(LinkEvent) + Send + Sync + 'static) -> Self {
        Self {
            on_event: Arc::new(on_event),
            on_command: None,
        }
    }

    /// Add a handler for commands arriving over the session.
    pub fn with_command(mut self, on_command: impl Fn(CommandRecord) + Send + Sync + 'static) -> Self {
        self.on_command = Some(Arc::new(on_command));
        self
    }

    fn emit(&self, event: LinkEvent) {
        (self.on_event)(event);
    }
}

/// Counts of locally gathered candidates by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateCounts {
    /// Host candidates
    pub host: u32,
    /// Server/peer reflexive candidates
    pub reflexive: u32,
    /// Relayed candidates
    pub relay: u32,
}

/// Snapshot of the link's diagnostics.
#[derive(Debug, Clone)]
pub struct LinkStats {
    /// Current lifecycle state
    pub state: LinkState,
    /// Time since the transport last connected
    pub connected_for: Option<Duration>,
    /// Local candidate counters
    pub candidates: CandidateCounts,
    /// ICE restarts attempted this instance
    pub restarts: u32,
    /// Consecutive failed health polls
    pub failed_health_polls: u32,
}

/// Negotiation bookkeeping, mutated only by the link itself.
#[derive(Debug, Clone, Copy)]
struct NegotiationState {
    signaling_phase: SignalingPhase,
    transport_state: TransportState,
    has_local_media: bool,
    has_remote_media: bool,
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self {
            signaling_phase: SignalingPhase::Stable,
            transport_state: TransportState::New,
            has_local_media: false,
            has_remote_media: false,
        }
    }
}

/// Named timer handles; every exit path cancels them explicitly.
#[derive(Default)]
struct LinkTimers {
    checking_stall: Option<JoinHandle<()>>,
    disconnect_grace: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
}

impl LinkTimers {
    fn cancel_checking_stall(&mut self) {
        if let Some(handle) = self.checking_stall.take() {
            handle.abort();
        }
    }

    fn cancel_disconnect_grace(&mut self) {
        if let Some(handle) = self.disconnect_grace.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_checking_stall();
        self.cancel_disconnect_grace();
        if let Some(handle) = self.health.take() {
            handle.abort();
        }
    }
}

/// The live negotiation instance.
struct ActiveLink {
    epoch: u64,
    connection_id: String,
    session: Session,
    transport: Arc<dyn PeerTransport>,
    tracks: Option<LocalTrackSet>,
    callbacks: LinkCallbacks,
    negotiation: NegotiationState,
    state: LinkState,
    answering: bool,
    last_offer_at: Option<Instant>,
    restart_attempted: bool,
    restarts: u32,
    health_failures: u32,
    candidates: CandidateCounts,
    connected_at: Option<Instant>,
    timers: LinkTimers,
}

impl ActiveLink {
    fn new(
        epoch: u64,
        session: Session,
        transport: Arc<dyn PeerTransport>,
        callbacks: LinkCallbacks,
    ) -> Self {
        Self {
            epoch,
            connection_id: uuid::Uuid::new_v4().to_string(),
            session,
            transport,
            tracks: None,
            callbacks,
            negotiation: NegotiationState::default(),
            state: LinkState::Initializing,
            answering: false,
            last_offer_at: None,
            restart_attempted: false,
            restarts: 0,
            health_failures: 0,
            candidates: CandidateCounts::default(),
            connected_at: None,
            timers: LinkTimers::default(),
        }
    }
}

type TeardownFuture = Shared<BoxFuture<'static, ()>>;

struct LinkInner {
    weak_self: Weak<LinkInner>,
    options: LinkOptions,
    channel: Arc<dyn SignalingChannel>,
    ice: Arc<IceServerProvider>,
    media: Arc<dyn MediaSource>,
    factory: Arc<dyn TransportFactory>,
    epoch: AtomicU64,
    active: Mutex<Option<ActiveLink>>,
    teardown: Mutex<Option<TeardownFuture>>,
    closed: AtomicBool,
}

/// Per-session negotiation controller.
pub struct PeerLink {
    inner: Arc<LinkInner>,
}

impl PeerLink {
    /// Create a link over injected dependencies.
    pub fn new(
        config: &LinkConfig,
        channel: Arc<dyn SignalingChannel>,
        ice: Arc<IceServerProvider>,
        media: Arc<dyn MediaSource>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let options = config.options.clone();
        let inner = Arc::new_cyclic(|weak| LinkInner {
            weak_self: weak.clone(),
            options,
            channel,
            ice,
            media,
            factory,
            epoch: AtomicU64::new(0),
            active: Mutex::new(None),
            teardown: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        Self { inner }
    }

    /// Start a negotiation for `session`.
    ///
    /// Supersedes any in-flight `init` (its continuations become no-ops)
    /// and fully tears down a live predecessor before constructing the new
    /// transport. Camera side acquires media and sends the first offer;
    /// director side announces itself and waits for one.
    pub async fn init(&self, session: Session, callbacks: LinkCallbacks) -> Result<()> {
        let inner = &self.inner;

        // Serialize against a teardown already in flight.
        inner.await_pending_teardown().await;

        // Claim the live epoch before tearing down the predecessor so an
        // older init cannot slip a registration in between.
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.closed.store(false, Ordering::SeqCst);
        info!(
            session = %session.session_id,
            role = ?session.role,
            epoch,
            "initializing link"
        );

        inner.shutdown_current().await;

        match inner.run_init(epoch, session, callbacks).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Clean up only if this epoch still owns the state; a
                // successor owns it otherwise.
                if inner.epoch.load(Ordering::SeqCst) == epoch {
                    inner.shutdown_current().await;
                }
                Err(e)
            }
        }
    }

    /// Tear the link down.
    ///
    /// A mid-flight `init` is cancelled purely by the epoch bump; every
    /// suspension point observes the staleness. Idempotent.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.closed.store(true, Ordering::SeqCst);
        debug!("destroying link");

        inner.await_pending_teardown().await;
        inner.shutdown_current().await;
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LinkState {
        match self.inner.active.lock().await.as_ref() {
            Some(link) => link.state,
            None => {
                if self.inner.closed.load(Ordering::SeqCst) {
                    LinkState::Closed
                } else {
                    LinkState::Idle
                }
            }
        }
    }

    /// Diagnostics snapshot, if a negotiation exists.
    pub async fn stats(&self) -> Option<LinkStats> {
        self.inner.active.lock().await.as_ref().map(|link| LinkStats {
            state: link.state,
            connected_for: link.connected_at.map(|at| at.elapsed()),
            candidates: link.candidates,
            restarts: link.restarts,
            failed_health_polls: link.health_failures,
        })
    }

    /// The session under negotiation, if any.
    pub async fn session(&self) -> Option<Session> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|link| link.session.clone())
    }
}

/// Follow-up action decided under the state lock, run after it drops.
enum StateFollowUp {
    None,
    Restart,
    Fatal(String),
}

impl LinkInner {
    fn stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    async fn await_pending_teardown(&self) {
        let pending = self.teardown.lock().await.clone();
        if let Some(fut) = pending {
            fut.await;
        }
    }

    /// Take the live instance and run its teardown as a shared future a
    /// concurrent `init` can await instead of racing.
    async fn shutdown_current(&self) {
        let taken = self.active.lock().await.take();
        let Some(mut link) = taken else { return };

        let media = self.media.clone();
        let channel = self.channel.clone();
        let fut: TeardownFuture = async move {
            link.timers.cancel_all();
            if let Some(tracks) = link.tracks.take() {
                media.release(tracks).await;
            }
            // Handlers go first: a late callback from this instance must
            // never reach a successor's state.
            link.transport.clear_handlers().await;
            if let Err(e) = link.transport.close().await {
                warn!("transport close failed: {}", e);
            }
            channel.unsubscribe().await;
            debug!(
                connection_id = %link.connection_id,
                epoch = link.epoch,
                "link teardown complete"
            );
        }
        .boxed()
        .shared();

        *self.teardown.lock().await = Some(fut.clone());
        fut.await;
        *self.teardown.lock().await = None;
    }

    async fn run_init(&self, epoch: u64, session: Session, callbacks: LinkCallbacks) -> Result<()> {
        // Transport servers; bounded internally, never errors.
        let servers = self.ice.get_servers().await;
        if self.stale(epoch) {
            debug!(epoch, "init superseded before transport construction");
            return Ok(());
        }

        let transport = self.factory.create(servers).await?;

        // Register before any further suspension so destroy() and
        // successors can reach this instance.
        {
            let mut active = self.active.lock().await;
            if self.stale(epoch) {
                drop(active);
                let _ = transport.close().await;
                debug!(epoch, "init superseded at registration");
                return Ok(());
            }
            let link = ActiveLink::new(epoch, session.clone(), transport.clone(), callbacks);
            debug!(
                connection_id = %link.connection_id,
                epoch,
                "negotiation instance registered"
            );
            *active = Some(link);
        }

        self.install_transport_handlers(epoch, transport.as_ref()).await;

        let handler = self.make_envelope_handler(epoch);
        self.channel
            .subscribe(&session.session_id, &session.local_device_id, handler)
            .await?;
        if self.stale(epoch) {
            return Ok(());
        }

        match session.role {
            Role::Camera => {
                let tracks = acquire_with_retry(&self.media, &session, &self.options)
                    .await
                    .map_err(Error::Media)?;
                if self.stale(epoch) {
                    self.media.release(tracks).await;
                    return Ok(());
                }

                let registered = {
                    let mut active = self.active.lock().await;
                    match active.as_mut().filter(|l| l.epoch == epoch) {
                        Some(link) => {
                            link.tracks = Some(tracks.clone());
                            link.negotiation.has_local_media = true;
                            true
                        }
                        None => false,
                    }
                };
                if !registered {
                    self.media.release(tracks).await;
                    return Ok(());
                }

                transport.attach_tracks(&tracks).await?;
                if self.stale(epoch) {
                    return Ok(());
                }

                self.send_offer(epoch, false).await?;
            }
            Role::Director => {
                {
                    let mut active = self.active.lock().await;
                    if let Some(link) = active.as_mut().filter(|l| l.epoch == epoch) {
                        link.state = LinkState::AwaitingOffer;
                    }
                }
                // The camera has no other way to learn a fresh director
                // instance exists after a role switch.
                let ready = SignalEnvelope::director_ready(
                    &session.local_device_id,
                    &session.peer_device_id,
                );
                if let Err(e) = self.channel.send(ready).await {
                    warn!("director-ready send failed: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Create (or restart) an offer, rewrite its codec preference, and
    /// publish it. No-op for a stale epoch.
    async fn send_offer(&self, epoch: u64, ice_restart: bool) -> Result<()> {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return Ok(());
        };

        let transport = link.transport.clone();
        let session = link.session.clone();

        let sdp = transport.create_offer(ice_restart).await?;
        let sdp = prefer_video_codec(&sdp, FALLBACK_VIDEO_CODEC);
        link.negotiation.signaling_phase = SignalingPhase::HaveLocalOffer;
        link.state = if ice_restart {
            LinkState::Reconnecting
        } else {
            LinkState::Offering
        };

        // Last staleness check before the wire.
        if self.stale(epoch) {
            return Ok(());
        }

        let envelope =
            SignalEnvelope::offer(&session.local_device_id, &session.peer_device_id, sdp);
        if let Err(e) = self.channel.send(envelope).await {
            warn!("offer send failed, renegotiation will recover: {}", e);
        }
        debug!(epoch, ice_restart, "offer sent");
        Ok(())
    }

    fn make_envelope_handler(&self, epoch: u64) -> EnvelopeHandler {
        let weak = self.weak_self.clone();
        Arc::new(move |envelope| {
            let Some(inner) = weak.upgrade() else { return };
            tokio::spawn(async move {
                inner.dispatch_envelope(epoch, envelope).await;
            });
        })
    }

    async fn dispatch_envelope(&self, epoch: u64, envelope: SignalEnvelope) {
        if self.stale(epoch) {
            debug!(epoch, "dropping envelope for stale epoch");
            return;
        }

        match envelope {
            SignalEnvelope::Signal { signal, .. } => match signal {
                SignalPayload::Offer(sdp) => self.handle_offer(epoch, sdp.sdp).await,
                SignalPayload::Answer(sdp) => self.handle_answer(epoch, sdp.sdp).await,
                SignalPayload::IceCandidate(candidate) => {
                    self.handle_remote_candidate(epoch, candidate).await
                }
            },
            SignalEnvelope::DirectorReady { .. } => self.handle_director_ready(epoch).await,
            SignalEnvelope::Command {
                from,
                to,
                command,
                data,
            } => {
                let guard = self.active.lock().await;
                if let Some(link) = guard.as_ref().filter(|l| l.epoch == epoch) {
                    if let Some(on_command) = &link.callbacks.on_command {
                        on_command(CommandRecord {
                            from,
                            to,
                            command,
                            data,
                        });
                    }
                }
            }
        }
    }

    /// Director side: answer an incoming offer unless it is a duplicate.
    async fn handle_offer(&self, epoch: u64, sdp: String) {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return;
        };

        if link.session.role != Role::Director {
            debug!("ignoring offer on the offering side");
            return;
        }

        if link.answering {
            debug!("offer dropped: an answer is already in progress");
            return;
        }

        // A lossy or retried relay can deliver the same offer more than
        // once; a minimum interval keyed on the stable phase drops the
        // duplicates.
        let phase = link.transport.signaling_phase().await;
        if phase == SignalingPhase::Stable {
            if let Some(at) = link.last_offer_at {
                let window = self.options.offer_window();
                if at.elapsed() < window {
                    debug!("offer inside {:?} suppression window, dropped", window);
                    return;
                }
            }
        }

        link.answering = true;
        link.last_offer_at = Some(Instant::now());
        link.state = LinkState::Negotiating;
        let transport = link.transport.clone();
        let session = link.session.clone();

        let negotiated: Result<String> = async {
            transport.apply_remote_offer(&sdp).await?;
            let answer = transport.create_answer().await?;
            Ok(prefer_video_codec(&answer, FALLBACK_VIDEO_CODEC))
        }
        .await;

        link.answering = false;

        match negotiated {
            Ok(answer) => {
                link.negotiation.has_remote_media = true;
                link.negotiation.signaling_phase = SignalingPhase::Stable;

                if self.stale(epoch) {
                    return;
                }
                let envelope = SignalEnvelope::answer(
                    &session.local_device_id,
                    &session.peer_device_id,
                    answer,
                );
                if let Err(e) = self.channel.send(envelope).await {
                    warn!("answer send failed, renegotiation will recover: {}", e);
                }
                debug!(epoch, "answer sent");
            }
            Err(e) if e.is_state_race() => {
                debug!("offer raced the signaling phase, swallowed: {}", e);
            }
            Err(e) => {
                warn!("offer handling failed: {}", e);
                link.callbacks.emit(LinkEvent::NegotiationError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Camera side: apply the answer. A bad answer is followed by a fresh
    /// offer attempt, never patched.
    async fn handle_answer(&self, epoch: u64, sdp: String) {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return;
        };

        if link.session.role != Role::Camera {
            debug!("ignoring answer on the answering side");
            return;
        }

        match link.transport.apply_remote_answer(&sdp).await {
            Ok(()) => {
                link.negotiation.signaling_phase = SignalingPhase::Stable;
                link.negotiation.has_remote_media = true;
                link.state = LinkState::Negotiating;
                debug!(epoch, "answer applied");
            }
            Err(e) if e.is_state_race() => {
                debug!("answer raced the signaling phase, swallowed: {}", e);
            }
            Err(e) => {
                warn!("answer apply failed: {}", e);
            }
        }
    }

    async fn handle_remote_candidate(&self, epoch: u64, candidate: CandidateInit) {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return;
        };

        let state = link.transport.state().await;
        if matches!(state, TransportState::Closed | TransportState::Failed) {
            debug!("remote candidate dropped, transport is {:?}", state);
            return;
        }

        if let Err(e) = link.transport.add_remote_candidate(candidate).await {
            warn!("failed to apply remote candidate: {}", e);
        }
    }

    /// Camera side: a fresh director instance asked for an offer.
    async fn handle_director_ready(&self, epoch: u64) {
        let should_offer = {
            let guard = self.active.lock().await;
            matches!(
                guard.as_ref().filter(|l| l.epoch == epoch),
                Some(link) if link.session.role == Role::Camera
            )
        };

        if should_offer {
            info!("director ready, re-sending offer");
            if let Err(e) = self.send_offer(epoch, false).await {
                warn!("offer after director-ready failed: {}", e);
            }
        }
    }

    async fn install_transport_handlers(&self, epoch: u64, transport: &dyn PeerTransport) {
        let state_weak = self.weak_self.clone();
        let candidate_weak = self.weak_self.clone();

        transport
            .install_handlers(TransportHandlers {
                on_state_change: Arc::new(move |state| {
                    let Some(inner) = state_weak.upgrade() else { return };
                    tokio::spawn(async move {
                        inner.handle_transport_state(epoch, state).await;
                    });
                }),
                on_candidate: Arc::new(move |candidate| {
                    let Some(inner) = candidate_weak.upgrade() else { return };
                    tokio::spawn(async move {
                        inner.handle_local_candidate(epoch, candidate).await;
                    });
                }),
            })
            .await;
    }

    async fn handle_local_candidate(&self, epoch: u64, candidate: Option<CandidateInit>) {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return;
        };

        let Some(candidate) = candidate else {
            debug!("local candidate gathering complete");
            return;
        };

        match candidate.kind() {
            CandidateKind::Host => link.candidates.host += 1,
            CandidateKind::Reflexive => link.candidates.reflexive += 1,
            CandidateKind::Relay => link.candidates.relay += 1,
            CandidateKind::Unknown => {}
        }
        debug!(kind = ?candidate.kind(), "local candidate gathered");

        let envelope = SignalEnvelope::candidate(
            &link.session.local_device_id,
            &link.session.peer_device_id,
            candidate,
        );

        if self.stale(epoch) {
            return;
        }
        if let Err(e) = self.channel.send(envelope).await {
            warn!("candidate send failed: {}", e);
        }
    }

    async fn handle_transport_state(&self, epoch: u64, state: TransportState) {
        let follow_up = {
            let mut guard = self.active.lock().await;
            let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
                return;
            };

            debug!(
                "transport state {:?} -> {:?}",
                link.negotiation.transport_state, state
            );
            link.negotiation.transport_state = state;

            // Leaving a state cancels its pending timer.
            if state != TransportState::Checking {
                link.timers.cancel_checking_stall();
            }
            if state != TransportState::Disconnected {
                link.timers.cancel_disconnect_grace();
            }

            match state {
                TransportState::Connected => {
                    link.restart_attempted = false;
                    link.health_failures = 0;
                    link.connected_at = Some(Instant::now());
                    link.state = LinkState::Connected;
                    self.start_health_monitor(epoch, link);
                    link.callbacks.emit(LinkEvent::Connected);
                    StateFollowUp::None
                }
                TransportState::Checking => {
                    link.state = LinkState::Negotiating;
                    self.start_checking_stall_timer(epoch, link);
                    StateFollowUp::None
                }
                TransportState::Disconnected => {
                    // Transient blips are common on mobile networks; a
                    // grace period runs before the link counts as lost.
                    link.state = LinkState::Reconnecting;
                    link.callbacks.emit(LinkEvent::Disconnected);
                    self.start_disconnect_grace_timer(epoch, link);
                    StateFollowUp::None
                }
                TransportState::Failed => {
                    if link.session.role.is_offerer() && !link.restart_attempted {
                        link.restart_attempted = true;
                        link.restarts += 1;
                        link.state = LinkState::Reconnecting;
                        StateFollowUp::Restart
                    } else {
                        StateFollowUp::Fatal("transport failed".to_string())
                    }
                }
                TransportState::Closed => {
                    link.timers.cancel_all();
                    StateFollowUp::None
                }
                TransportState::New => StateFollowUp::None,
            }
        };

        match follow_up {
            StateFollowUp::None => {}
            StateFollowUp::Restart => {
                info!("transport failed, attempting ICE restart");
                if let Err(e) = self.send_offer(epoch, true).await {
                    self.emit_for_epoch(
                        epoch,
                        LinkEvent::Fatal {
                            message: format!("ICE restart failed: {}", e),
                        },
                    )
                    .await;
                }
            }
            StateFollowUp::Fatal(message) => {
                self.emit_for_epoch(epoch, LinkEvent::Fatal { message }).await;
            }
        }
    }

    async fn emit_for_epoch(&self, epoch: u64, event: LinkEvent) {
        let guard = self.active.lock().await;
        if let Some(link) = guard.as_ref().filter(|l| l.epoch == epoch) {
            link.callbacks.emit(event);
        }
    }

    fn start_checking_stall_timer(&self, epoch: u64, link: &mut ActiveLink) {
        if link.timers.checking_stall.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let stall = self.options.checking_stall();
        link.timers.checking_stall = Some(tokio::spawn(async move {
            tokio::time::sleep(stall).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.on_checking_stall(epoch).await;
        }));
    }

    /// One timeout callback and at most one restart per stall episode.
    async fn on_checking_stall(&self, epoch: u64) {
        let restart = {
            let mut guard = self.active.lock().await;
            let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
                return;
            };
            link.timers.checking_stall = None;

            if link.negotiation.transport_state != TransportState::Checking {
                return;
            }

            warn!(
                "transport stuck in checking for {:?}",
                self.options.checking_stall()
            );
            link.callbacks.emit(LinkEvent::CheckingTimeout);
            link.session.role.is_offerer()
        };

        if restart {
            if let Err(e) = self.send_offer(epoch, true).await {
                warn!("restart after checking stall failed: {}", e);
            }
        }
    }

    fn start_disconnect_grace_timer(&self, epoch: u64, link: &mut ActiveLink) {
        if link.timers.disconnect_grace.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let grace = self.options.disconnect_grace();
        link.timers.disconnect_grace = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.on_disconnect_grace_elapsed(epoch).await;
        }));
    }

    async fn on_disconnect_grace_elapsed(&self, epoch: u64) {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return;
        };
        link.timers.disconnect_grace = None;

        if link.negotiation.transport_state == TransportState::Disconnected {
            warn!(
                "transport did not recover within {:?}, link lost",
                self.options.disconnect_grace()
            );
            link.callbacks.emit(LinkEvent::Lost);
        }
    }

    fn start_health_monitor(&self, epoch: u64, link: &mut ActiveLink) {
        if link.timers.health.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let interval = self.options.health_interval();
        let threshold = self.options.health_failure_threshold;
        link.timers.health = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so polls are
            // spaced a full interval from connection time.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { return };
                if !inner.health_poll(epoch, threshold).await {
                    return;
                }
            }
        }));
    }

    /// One health poll. Returns false when the monitor should stop.
    async fn health_poll(&self, epoch: u64, threshold: u32) -> bool {
        let mut guard = self.active.lock().await;
        let Some(link) = guard.as_mut().filter(|l| l.epoch == epoch) else {
            return false;
        };

        if link.negotiation.transport_state != TransportState::Connected {
            return true;
        }

        let stats = link.transport.stats().await;
        if stats.nominated_pairs == 0 {
            link.health_failures += 1;
            warn!(
                "health poll found no nominated candidate pair ({}/{})",
                link.health_failures, threshold
            );
            if link.health_failures == threshold {
                link.callbacks.emit(LinkEvent::Degraded {
                    failed_polls: link.health_failures,
                });
            }
        } else if link.health_failures != 0 {
            debug!("health poll recovered after {} failures", link.health_failures);
            link.health_failures = 0;
        }

        true
    }
}
