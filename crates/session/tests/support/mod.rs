//! Shared fakes for the integration suites.
//!
//! Everything here is deterministic: the channel delivers inline, the
//! transport's state changes are driven by the tests, and the journal
//! records cross-component ordering for the serialization assertions.

#![allow(dead_code)]

use async_trait::async_trait;
use paircam_core::{
    Error, MediaError, PairingDirectory, PairingStore, PresenceApi, Result, Session,
};
use paircam_session::peer::{
    LocalTrackSet, MediaSource, PeerTransport, SignalingPhase, TransportFactory,
    TransportHandlers, TransportState, TransportStats,
};
use paircam_session::signaling::{
    CandidateInit, EnvelopeHandler, SignalEnvelope, SignalPayload, SignalingChannel,
};
use paircam_session::{LinkConfig, LinkOptions};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Synthetic offer SDP: payload 97 is the software-fallback codec, listed
/// second so the preference rewrite is observable on the wire.
pub const FAKE_OFFER_SDP: &str = "v=0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
a=rtpmap:96 H264/90000\r\n\
a=rtpmap:97 VP8/90000\r\n\
a=rtpmap:98 VP9/90000\r\n";

pub const FAKE_ANSWER_SDP: &str = "v=0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
a=rtpmap:96 H264/90000\r\n\
a=rtpmap:97 VP8/90000\r\n";

/// Give spawned handler tasks time to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// A config with timings compressed for tests.
pub fn test_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.options = LinkOptions {
        media_timeout_ms: 500,
        media_retry_attempts: 2,
        credential_timeout_ms: 200,
        credential_ttl_secs: 300,
        checking_stall_ms: 80,
        offer_window_ms: 2_000,
        disconnect_grace_ms: 80,
        health_interval_ms: 40,
        health_failure_threshold: 3,
        validation_interval_secs: 60,
        heartbeat_interval_secs: 60,
        max_reconnect_attempts: 3,
        reconnect_backoff_initial_ms: 10,
        reconnect_backoff_max_ms: 40,
        reconnect_backoff_multiplier: 2.0,
    };
    config
}

pub fn camera_session() -> Session {
    Session::new("sess-1", "cam-1", "dir-1", paircam_core::Role::Camera)
}

pub fn director_session() -> Session {
    Session::new("sess-1", "dir-1", "cam-1", paircam_core::Role::Director)
}

/// Ordered record of cross-component happenings.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn journal_index(journal: &Journal, entry: &str) -> Option<usize> {
    journal.lock().unwrap().iter().position(|e| e == entry)
}

// ---------------------------------------------------------------------------
// Signaling channel
// ---------------------------------------------------------------------------

/// In-memory signaling channel recording every sent envelope.
#[derive(Default)]
pub struct MemoryChannel {
    handler: Mutex<Option<EnvelopeHandler>>,
    sent: Mutex<Vec<SignalEnvelope>>,
    fail_sends: AtomicBool,
    unsubscribes: AtomicU32,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an envelope to the subscribed handler, if any.
    pub fn deliver(&self, envelope: SignalEnvelope) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(envelope);
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SignalEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn offers_sent(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|e| match e {
                SignalEnvelope::Signal {
                    signal: SignalPayload::Offer(sdp),
                    ..
                } => Some(sdp.sdp),
                _ => None,
            })
            .collect()
    }

    pub fn answers_sent(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|e| match e {
                SignalEnvelope::Signal {
                    signal: SignalPayload::Answer(sdp),
                    ..
                } => Some(sdp.sdp),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribe_count(&self) -> u32 {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn subscribe(
        &self,
        _session_id: &str,
        _local_device_id: &str,
        handler: EnvelopeHandler,
    ) -> Result<()> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    async fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Signaling("relay unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn unsubscribe(&self) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        *self.handler.lock().unwrap() = None;
    }
}

// ---------------------------------------------------------------------------
// Peer transport
// ---------------------------------------------------------------------------

/// Scriptable transport: tests drive its state transitions.
pub struct FakeTransport {
    pub id: u32,
    journal: Journal,
    handlers: Mutex<Option<TransportHandlers>>,
    phase: Mutex<SignalingPhase>,
    state: Mutex<TransportState>,
    stats: Mutex<TransportStats>,
    pub offer_calls: Mutex<Vec<bool>>,
    pub applied_offers: Mutex<Vec<String>>,
    pub applied_answers: Mutex<Vec<String>>,
    pub answer_calls: AtomicU32,
    pub applied_candidates: Mutex<Vec<CandidateInit>>,
    pub attached_track_sets: AtomicU32,
    pub closed: AtomicBool,
}

impl FakeTransport {
    fn new(id: u32, journal: Journal) -> Self {
        Self {
            id,
            journal,
            handlers: Mutex::new(None),
            phase: Mutex::new(SignalingPhase::Stable),
            state: Mutex::new(TransportState::New),
            stats: Mutex::new(TransportStats::default()),
            offer_calls: Mutex::new(Vec::new()),
            applied_offers: Mutex::new(Vec::new()),
            applied_answers: Mutex::new(Vec::new()),
            answer_calls: AtomicU32::new(0),
            applied_candidates: Mutex::new(Vec::new()),
            attached_track_sets: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Drive a state transition through the installed handler.
    pub fn fire_state(&self, state: TransportState) {
        *self.state.lock().unwrap() = state;
        let handlers = self.handlers.lock().unwrap().clone();
        if let Some(handlers) = handlers {
            (handlers.on_state_change)(state);
        }
    }

    /// Emit a locally gathered candidate through the installed handler.
    pub fn fire_candidate(&self, candidate: Option<CandidateInit>) {
        let handlers = self.handlers.lock().unwrap().clone();
        if let Some(handlers) = handlers {
            (handlers.on_candidate)(candidate);
        }
    }

    pub fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_stats(&self, stats: TransportStats) {
        *self.stats.lock().unwrap() = stats;
    }

    pub fn has_handlers(&self) -> bool {
        self.handlers.lock().unwrap().is_some()
    }

    pub fn offer_count(&self) -> usize {
        self.offer_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn install_handlers(&self, handlers: TransportHandlers) {
        *self.handlers.lock().unwrap() = Some(handlers);
    }

    async fn clear_handlers(&self) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("handlers-cleared:{}", self.id));
        *self.handlers.lock().unwrap() = None;
    }

    async fn attach_tracks(&self, _tracks: &LocalTrackSet) -> Result<()> {
        self.attached_track_sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        self.offer_calls.lock().unwrap().push(ice_restart);
        *self.phase.lock().unwrap() = SignalingPhase::HaveLocalOffer;
        Ok(FAKE_OFFER_SDP.to_string())
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<()> {
        self.applied_offers.lock().unwrap().push(sdp.to_string());
        *self.phase.lock().unwrap() = SignalingPhase::HaveRemoteOffer;
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        *self.phase.lock().unwrap() = SignalingPhase::Stable;
        Ok(FAKE_ANSWER_SDP.to_string())
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        self.applied_answers.lock().unwrap().push(sdp.to_string());
        *self.phase.lock().unwrap() = SignalingPhase::Stable;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.applied_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn signaling_phase(&self) -> SignalingPhase {
        *self.phase.lock().unwrap()
    }

    async fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    async fn stats(&self) -> TransportStats {
        *self.stats.lock().unwrap()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.journal
            .lock()
            .unwrap()
            .push(format!("closed:{}", self.id));
        *self.state.lock().unwrap() = TransportState::Closed;
        Ok(())
    }
}

/// Factory handing out [`FakeTransport`]s in creation order.
pub struct FakeTransportFactory {
    journal: Journal,
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
    next_id: AtomicU32,
    create_delay: Mutex<Duration>,
    fail_creates: AtomicBool,
}

impl FakeTransportFactory {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            created: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            create_delay: Mutex::new(Duration::ZERO),
            fail_creates: AtomicBool::new(false),
        })
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    fn is_available(&self) -> bool {
        true
    }

    async fn create(
        &self,
        _ice_servers: Vec<paircam_session::IceServerEntry>,
    ) -> Result<Arc<dyn PeerTransport>> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::Transport("transport construction failed".to_string()));
        }

        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(FakeTransport::new(id, self.journal.clone()));
        self.journal
            .lock()
            .unwrap()
            .push(format!("created:{}", id));
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Media source
// ---------------------------------------------------------------------------

/// Media source with a configurable delay, for widening init windows.
pub struct FakeMediaSource {
    pub acquires: AtomicU32,
    pub releases: AtomicU32,
    delay: Mutex<Duration>,
    fail_with: Mutex<Option<MediaError>>,
}

impl FakeMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            acquires: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            delay: Mutex::new(Duration::ZERO),
            fail_with: Mutex::new(None),
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_failure(&self, error: Option<MediaError>) {
        *self.fail_with.lock().unwrap() = error;
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, _session: &Session) -> std::result::Result<LocalTrackSet, MediaError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(LocalTrackSet::default())
    }

    async fn release(&self, _tracks: LocalTrackSet) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// In-memory pairing store.
pub struct MemoryPairingStore {
    session: Mutex<Option<Session>>,
    pub clears: AtomicU32,
}

impl MemoryPairingStore {
    pub fn new(session: Option<Session>) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            clears: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    async fn clear_pairing(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap() = None;
    }
}

/// Scriptable pairing directory counting round trips.
pub struct FakeDirectory {
    pub lookups: AtomicU32,
    pub unpairs: AtomicU32,
    partner: Mutex<Option<String>>,
    fail_lookups: AtomicBool,
}

impl FakeDirectory {
    pub fn with_partner(partner: &str) -> Arc<Self> {
        Arc::new(Self {
            lookups: AtomicU32::new(0),
            unpairs: AtomicU32::new(0),
            partner: Mutex::new(Some(partner.to_string())),
            fail_lookups: AtomicBool::new(false),
        })
    }

    pub fn set_partner(&self, partner: Option<&str>) {
        *self.partner.lock().unwrap() = partner.map(|p| p.to_string());
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PairingDirectory for FakeDirectory {
    async fn current_partner(&self, _device_id: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::Collaborator("lookup unavailable".to_string()));
        }
        Ok(self.partner.lock().unwrap().clone())
    }

    async fn unpair(&self, _device_id: &str) -> Result<()> {
        self.unpairs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Presence backend counting calls.
#[derive(Default)]
pub struct FakePresence {
    pub online_updates: AtomicU32,
    pub disconnects: AtomicU32,
}

impl FakePresence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PresenceApi for FakePresence {
    async fn update_online_status(&self, _device_id: &str, _online: bool) -> Result<()> {
        self.online_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect_all(&self, _device_id: &str) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
