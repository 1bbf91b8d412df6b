//! Peer negotiation: transport seam, media acquisition, and the
//! per-session state machine.

mod link;
mod media;
mod transport;

pub use link::{
    CandidateCounts, LinkCallbacks, LinkEvent, LinkState, LinkStats, PeerLink,
};
pub use media::{acquire_with_retry, LocalTrackSet, MediaSource, StaticTrackSource};
pub use transport::{
    detect_transport_factory, PeerTransport, SignalingPhase, TransportFactory,
    TransportHandlers, TransportState, TransportStats, UnavailableTransportFactory,
    WebRtcTransportFactory,
};
