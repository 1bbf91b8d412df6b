//! Peer-to-peer media session link for paired camera/director devices
//!
//! This crate establishes and maintains a real-time media session between
//! the two asymmetric roles of a pairing (the camera, which produces
//! media, and the director, which consumes and steers it) over an
//! unreliable relay-based signaling channel, with NAT traversal fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Embedding application (screens, stores, push, …)        │
//! │  ↓ collaborator traits            ↑ ConnectionEvent      │
//! │  LinkSupervisor                                          │
//! │  ├─ validates the session (rate-limited)                 │
//! │  ├─ schedules capped-backoff reconnects (single timer)   │
//! │  ├─ heartbeats presence while foregrounded               │
//! │  └─ owns one PeerLink                                    │
//! │     ├─ SignalingChannel (relay pub/sub, per session)     │
//! │     ├─ IceServerProvider (TTL cache + static fallback)   │
//! │     ├─ MediaSource (camera role only)                    │
//! │     └─ PeerTransport (WebRTC, selected once at startup)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `init` runs under a freshly allocated epoch and re-checks it
//! after each suspension point, so a newer `init` or a `destroy`
//! invalidates in-flight work without any further signal.
//!
//! # Example
//!
//! ```no_run
//! use paircam_session::{LinkConfig, LinkSupervisor};
//! # use std::sync::Arc;
//! # async fn example(
//! #     store: Arc<dyn paircam_core::PairingStore>,
//! #     directory: Arc<dyn paircam_core::PairingDirectory>,
//! #     presence: Arc<dyn paircam_core::PresenceApi>,
//! # ) -> paircam_core::Result<()> {
//! let config = LinkConfig::default()
//!     .with_credentials("https://api.example.com/ice", "api-key");
//!
//! let supervisor = LinkSupervisor::with_defaults(config, store, directory, presence, None)?;
//! let mut events = supervisor.subscribe();
//!
//! supervisor.connect().await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod ice;
pub mod lifecycle;
pub mod peer;
pub mod sdp;
pub mod signaling;

pub use config::{LinkConfig, LinkOptions, RelayServerConfig};
pub use ice::{CredentialFetcher, HttpCredentialFetcher, IceServerEntry, IceServerProvider, IceServerSet};
pub use lifecycle::{LinkSupervisor, SupervisorPhase};
pub use peer::{
    detect_transport_factory, LinkCallbacks, LinkEvent, LinkState, LinkStats, MediaSource,
    PeerLink, PeerTransport, SignalingPhase, TransportFactory, TransportHandlers, TransportState,
    TransportStats,
};
pub use signaling::{
    CandidateInit, CandidateKind, RelayChannel, SignalEnvelope, SignalPayload, SignalingChannel,
};

// Re-exported so embedders depend on one crate.
pub use paircam_core::{ConnectionEvent, Error, MediaError, Result, Role, Session};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
