//! Peer transport seam
//!
//! The negotiation state machine drives this trait instead of a concrete
//! WebRTC object. [`detect_transport_factory`] probes capability once at
//! startup and selects either the real implementation or a stub whose
//! factory fails; the choice is never re-probed per call.

use crate::peer::media::LocalTrackSet;
use crate::signaling::CandidateInit;
use async_trait::async_trait;
use paircam_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

/// Where the transport's signaling exchange currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingPhase {
    /// No exchange in progress
    Stable,
    /// A local offer is outstanding
    HaveLocalOffer,
    /// A remote offer is applied, answer pending
    HaveRemoteOffer,
}

/// Connectivity state of the transport path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Freshly constructed
    New,
    /// Connectivity checks running
    Checking,
    /// A working path exists
    Connected,
    /// The path dropped, may recover
    Disconnected,
    /// No path could be established or restored
    Failed,
    /// Shut down
    Closed,
}

/// Snapshot of candidate-pair statistics for health polling.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Candidate pairs observed in the last snapshot
    pub total_pairs: usize,
    /// Pairs that won nomination (a succeeded, selected path)
    pub nominated_pairs: usize,
}

/// Event handlers installed by the owning state machine.
///
/// Installed through the trait so teardown can clear them explicitly
/// before closing the transport; a late-firing handler from a torn-down
/// instance must never reach a successor's state.
#[derive(Clone)]
pub struct TransportHandlers {
    /// Connectivity state transitions
    pub on_state_change: Arc<dyn Fn(TransportState) + Send + Sync>,
    /// Locally gathered candidates; `None` marks gathering complete
    pub on_candidate: Arc<dyn Fn(Option<CandidateInit>) + Send + Sync>,
}

/// One peer transport instance.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Install the event handlers. Replaces any previous set.
    async fn install_handlers(&self, handlers: TransportHandlers);

    /// Remove every installed handler.
    async fn clear_handlers(&self);

    /// Attach local media tracks for sending.
    async fn attach_tracks(&self, tracks: &LocalTrackSet) -> Result<()>;

    /// Create an offer and set it as the local description.
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    /// Apply a remote offer.
    async fn apply_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Create an answer to the applied remote offer and set it as the
    /// local description.
    async fn create_answer(&self) -> Result<String>;

    /// Apply a remote answer to an outstanding local offer.
    async fn apply_remote_answer(&self, sdp: &str) -> Result<()>;

    /// Add a trickle candidate from the remote side.
    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()>;

    /// Current signaling phase.
    async fn signaling_phase(&self) -> SignalingPhase;

    /// Current connectivity state.
    async fn state(&self) -> TransportState;

    /// Candidate-pair statistics snapshot.
    async fn stats(&self) -> TransportStats;

    /// Close the transport. Handlers should be cleared first.
    async fn close(&self) -> Result<()>;
}

/// Builds transports for one negotiation session each.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Whether this factory can produce working transports.
    fn is_available(&self) -> bool;

    /// Build a transport configured with the given ICE servers.
    async fn create(&self, ice_servers: Vec<crate::ice::IceServerEntry>)
        -> Result<Arc<dyn PeerTransport>>;
}

/// Probe transport capability once and select an implementation.
pub fn detect_transport_factory() -> Arc<dyn TransportFactory> {
    match WebRtcTransportFactory::probe() {
        Ok(factory) => {
            info!("WebRTC transport available");
            Arc::new(factory)
        }
        Err(e) => {
            warn!("WebRTC transport unavailable, selecting stub: {}", e);
            Arc::new(UnavailableTransportFactory {
                reason: e.to_string(),
            })
        }
    }
}

/// Factory for WebRTC-backed transports.
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    /// Verify the codec registry can be built on this host.
    pub fn probe() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::TransportUnavailable(format!("codec registry: {}", e)))?;
        Ok(Self)
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    fn is_available(&self) -> bool {
        true
    }

    async fn create(
        &self,
        ice_servers: Vec<crate::ice::IceServerEntry>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = WebRtcTransport::new(ice_servers).await?;
        Ok(Arc::new(transport))
    }
}

/// Stub selected when the host cannot run a real transport.
pub struct UnavailableTransportFactory {
    reason: String,
}

#[async_trait]
impl TransportFactory for UnavailableTransportFactory {
    fn is_available(&self) -> bool {
        false
    }

    async fn create(
        &self,
        _ice_servers: Vec<crate::ice::IceServerEntry>,
    ) -> Result<Arc<dyn PeerTransport>> {
        Err(Error::TransportUnavailable(self.reason.clone()))
    }
}

/// WebRTC-backed transport.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    handlers_installed: Mutex<bool>,
}

impl WebRtcTransport {
    async fn new(ice_servers: Vec<crate::ice::IceServerEntry>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Transport(format!("failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::Transport(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_servers: Vec<RTCIceServer> = ice_servers
            .into_iter()
            .map(|entry| RTCIceServer {
                urls: entry.urls,
                username: entry.username.unwrap_or_default(),
                credential: entry.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers: rtc_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| Error::Transport(format!("failed to create peer connection: {}", e)))?,
        );

        Ok(Self {
            pc,
            handlers_installed: Mutex::new(false),
        })
    }

    fn map_ice_state(state: RTCIceConnectionState) -> Option<TransportState> {
        match state {
            RTCIceConnectionState::New => Some(TransportState::New),
            RTCIceConnectionState::Checking => Some(TransportState::Checking),
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                Some(TransportState::Connected)
            }
            RTCIceConnectionState::Disconnected => Some(TransportState::Disconnected),
            RTCIceConnectionState::Failed => Some(TransportState::Failed),
            RTCIceConnectionState::Closed => Some(TransportState::Closed),
            RTCIceConnectionState::Unspecified => None,
        }
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn install_handlers(&self, handlers: TransportHandlers) {
        let on_state = handlers.on_state_change.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                if let Some(mapped) = WebRtcTransport::map_ice_state(state) {
                    on_state(mapped);
                }
                Box::pin(async {})
            }));

        let on_candidate = handlers.on_candidate.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate {
                    Some(c) => match c.to_json() {
                        Ok(init) => on_candidate(Some(CandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        })),
                        Err(e) => warn!("failed to serialize local candidate: {}", e),
                    },
                    None => on_candidate(None),
                }
                Box::pin(async {})
            }));

        *self.handlers_installed.lock().await = true;
    }

    async fn clear_handlers(&self) {
        let mut installed = self.handlers_installed.lock().await;
        if !*installed {
            return;
        }

        self.pc
            .on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
        self.pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        *installed = false;
        debug!("transport handlers cleared");
    }

    async fn attach_tracks(&self, tracks: &LocalTrackSet) -> Result<()> {
        for track in tracks.all() {
            self.pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::Transport(format!("failed to add track: {}", e)))?;
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let options = Some(RTCOfferOptions {
            ice_restart,
            ..Default::default()
        });

        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::Sdp(format!("failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local description: {}", e)))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("no local description after setting offer".to_string()))?;

        Ok(local.sdp)
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::Sdp(format!("failed to parse offer: {}", e)))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set remote description: {}", e)))
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local description: {}", e)))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("no local description after setting answer".to_string()))?;

        Ok(local.sdp)
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| Error::Sdp(format!("failed to parse answer: {}", e)))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set remote description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("failed to add candidate: {}", e)))
    }

    async fn signaling_phase(&self) -> SignalingPhase {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingPhase::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingPhase::HaveRemoteOffer
            }
            _ => SignalingPhase::Stable,
        }
    }

    async fn state(&self) -> TransportState {
        Self::map_ice_state(self.pc.ice_connection_state()).unwrap_or(TransportState::New)
    }

    async fn stats(&self) -> TransportStats {
        let report = self.pc.get_stats().await;
        let mut snapshot = TransportStats::default();

        for (_, value) in report.reports {
            if let webrtc::stats::StatsReportType::CandidatePair(pair) = value {
                snapshot.total_pairs += 1;
                if pair.nominated {
                    snapshot.nominated_pairs += 1;
                }
            }
        }

        snapshot
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::Transport(format!("failed to close connection: {}", e)))
    }
}
