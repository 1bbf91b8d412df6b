//! Signaling wire protocol
//!
//! JSON envelopes published on the per-session relay topic. Three kinds
//! exist on the wire: `signal` (SDP/ICE exchange), `director-ready`
//! (director instance announcement), and `command` (control plane, also
//! persisted to the command history sink).

use paircam_core::CommandRecord;
use serde::{Deserialize, Serialize};

/// One message on the session's relay topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalEnvelope {
    /// SDP or ICE negotiation payload
    Signal {
        /// Sending device id
        from: String,
        /// Receiving device id
        to: String,
        /// The negotiation payload
        signal: SignalPayload,
    },

    /// A new director-side instance announces itself so the camera
    /// re-sends an offer
    DirectorReady {
        /// Sending device id
        from: String,
        /// Receiving device id
        to: String,
    },

    /// Control-plane command
    Command {
        /// Sending device id
        from: String,
        /// Receiving device id
        to: String,
        /// Command verb
        command: String,
        /// Free-form payload
        data: serde_json::Value,
    },
}

/// The negotiation payload inside a `signal` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SignalPayload {
    /// SDP offer
    Offer(SessionSdp),
    /// SDP answer
    Answer(SessionSdp),
    /// Trickle ICE candidate
    IceCandidate(CandidateInit),
}

/// An SDP blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSdp {
    /// Raw session description
    pub sdp: String,
}

/// A trickle ICE candidate, mirroring the init dictionary shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Candidate classification for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Local interface address
    Host,
    /// Server-reflexive or peer-reflexive address
    Reflexive,
    /// Relayed address
    Relay,
    /// Unrecognized candidate line
    Unknown,
}

impl CandidateInit {
    /// Classify the candidate by its `typ` token.
    pub fn kind(&self) -> CandidateKind {
        if self.candidate.contains(" typ host") {
            CandidateKind::Host
        } else if self.candidate.contains(" typ srflx") || self.candidate.contains(" typ prflx") {
            CandidateKind::Reflexive
        } else if self.candidate.contains(" typ relay") {
            CandidateKind::Relay
        } else {
            CandidateKind::Unknown
        }
    }
}

impl SignalEnvelope {
    /// Build an offer envelope.
    pub fn offer(from: &str, to: &str, sdp: String) -> Self {
        SignalEnvelope::Signal {
            from: from.to_string(),
            to: to.to_string(),
            signal: SignalPayload::Offer(SessionSdp { sdp }),
        }
    }

    /// Build an answer envelope.
    pub fn answer(from: &str, to: &str, sdp: String) -> Self {
        SignalEnvelope::Signal {
            from: from.to_string(),
            to: to.to_string(),
            signal: SignalPayload::Answer(SessionSdp { sdp }),
        }
    }

    /// Build a trickle candidate envelope.
    pub fn candidate(from: &str, to: &str, candidate: CandidateInit) -> Self {
        SignalEnvelope::Signal {
            from: from.to_string(),
            to: to.to_string(),
            signal: SignalPayload::IceCandidate(candidate),
        }
    }

    /// Build a director-ready envelope.
    pub fn director_ready(from: &str, to: &str) -> Self {
        SignalEnvelope::DirectorReady {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Sending device id.
    pub fn from_device(&self) -> &str {
        match self {
            SignalEnvelope::Signal { from, .. }
            | SignalEnvelope::DirectorReady { from, .. }
            | SignalEnvelope::Command { from, .. } => from,
        }
    }

    /// Receiving device id.
    pub fn to_device(&self) -> &str {
        match self {
            SignalEnvelope::Signal { to, .. }
            | SignalEnvelope::DirectorReady { to, .. }
            | SignalEnvelope::Command { to, .. } => to,
        }
    }

    /// The command record for history persistence, if this is a command.
    pub fn as_command_record(&self) -> Option<CommandRecord> {
        match self {
            SignalEnvelope::Command {
                from,
                to,
                command,
                data,
            } => Some(CommandRecord {
                from: from.clone(),
                to: to.clone(),
                command: command.clone(),
                data: data.clone(),
            }),
            _ => None,
        }
    }
}
