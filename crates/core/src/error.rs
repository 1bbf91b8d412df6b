//! Error types for the paircam link

/// Result type alias using the link Error
pub type Result<T> = std::result::Result<T, Error>;

/// Message fragments that mark an error as non-recoverable.
///
/// Matched case-insensitively against the rendered error message; a hit
/// short-circuits retry loops immediately.
const NON_RECOVERABLE_TERMS: &[&str] = &[
    "permission-denied",
    "permission denied",
    "not-found",
    "not found",
    "invalid",
    "expired",
    "unauthorized",
    "forbidden",
];

/// Errors that can occur in link operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Peer transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer transport is not available on this host
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Local media acquisition error
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Session validation / pairing error
    #[error("Session error: {0}")]
    Session(String),

    /// Collaborator API error (pairing directory, presence, history sink)
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check whether a retry loop may try this error again.
    ///
    /// Classification is by message content so that errors surfaced by
    /// collaborators (which arrive as strings) participate too.
    pub fn is_recoverable(&self) -> bool {
        !is_non_recoverable_message(&self.to_string())
    }

    /// Check if this error is a negotiation "wrong state" race.
    ///
    /// These arise when an offer or answer lands on a transport whose
    /// signaling phase has already moved on; they are swallowed, not
    /// surfaced.
    pub fn is_state_race(&self) -> bool {
        match self {
            Error::Sdp(msg) | Error::Transport(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("wrong state") || msg.contains("invalidstate")
            }
            _ => false,
        }
    }
}

/// Classify an error message as non-recoverable by content.
pub fn is_non_recoverable_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    NON_RECOVERABLE_TERMS.iter().any(|t| message.contains(t))
}

/// Local media acquisition failures.
///
/// Each class carries a fixed user-facing message; the transient classes
/// are retried with bounded attempts, the rest fail the acquisition
/// outright.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// Camera/microphone permission denied by the user or platform
    #[error("media permission denied")]
    PermissionDenied,

    /// No capture device present
    #[error("capture device not found")]
    DeviceNotFound,

    /// Device exists but is held by another process
    #[error("capture device busy")]
    DeviceBusy,

    /// Requested constraints cannot be satisfied by any device
    #[error("requested media constraints are invalid for this device")]
    Overconstrained,

    /// The capture hardware aborted mid-acquisition
    #[error("capture hardware aborted")]
    HardwareAbort,

    /// Capture disabled by a platform security policy
    #[error("media capture forbidden by security policy")]
    SecurityDisabled,

    /// A constraint value was malformed
    #[error("invalid media constraint")]
    InvalidConstraint,

    /// Acquisition exceeded its deadline
    #[error("media acquisition timed out")]
    Timeout,

    /// Anything the platform did not classify
    #[error("media acquisition failed: {0}")]
    Unknown(String),
}

impl MediaError {
    /// Fixed message shown to the user for this failure class.
    pub fn user_message(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied => {
                "Camera access is blocked. Allow camera and microphone access in settings."
            }
            MediaError::DeviceNotFound => "No camera was found on this device.",
            MediaError::DeviceBusy => "The camera is in use by another app.",
            MediaError::Overconstrained => "The camera does not support the requested quality.",
            MediaError::HardwareAbort => "The camera stopped unexpectedly.",
            MediaError::SecurityDisabled => "Camera access is disabled by a security policy.",
            MediaError::InvalidConstraint => "The requested camera settings are invalid.",
            MediaError::Timeout => "The camera took too long to start.",
            MediaError::Unknown(_) => "The camera could not be started.",
        }
    }

    /// Transient classes are worth another attempt; permission, missing
    /// hardware and policy classes are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::DeviceBusy
                | MediaError::HardwareAbort
                | MediaError::Timeout
                | MediaError::Unknown(_)
        )
    }
}
