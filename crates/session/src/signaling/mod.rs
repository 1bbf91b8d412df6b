//! Session signaling
//!
//! Negotiation and control messages travel over a per-session pub/sub
//! topic on a relay. The channel delivers, in the relay's publish order,
//! only envelopes addressed to the local device; sends are fire-and-forget
//! and never retried internally. Recovery is renegotiation, not resend.

mod protocol;
mod relay;

pub use protocol::{CandidateInit, CandidateKind, SessionSdp, SignalEnvelope, SignalPayload};
pub use relay::RelayChannel;

use async_trait::async_trait;
use paircam_core::Result;
use std::sync::Arc;

/// Handler invoked for each delivered envelope.
///
/// Called from the channel's reader task; implementations must not block.
pub type EnvelopeHandler = Arc<dyn Fn(SignalEnvelope) + Send + Sync>;

/// Per-session pub/sub signaling transport.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Join the session's topic and install the delivery handler.
    ///
    /// Only envelopes whose recipient equals `local_device_id` are
    /// delivered. A second subscribe replaces the previous handler.
    async fn subscribe(
        &self,
        session_id: &str,
        local_device_id: &str,
        handler: EnvelopeHandler,
    ) -> Result<()>;

    /// Publish one envelope. May fail if the relay is unreachable; the
    /// caller recovers by renegotiating, never by resending.
    async fn send(&self, envelope: SignalEnvelope) -> Result<()>;

    /// Leave the topic. Idempotent.
    async fn unsubscribe(&self);
}
