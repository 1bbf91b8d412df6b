//! Connection events delivered to application listeners

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Events published by the link supervisor.
///
/// The presentation layer subscribes to these; terminal conditions
/// (`SessionExpired`, `ReconnectFailed`, `FatalError`) are emitted exactly
/// once per episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ConnectionEvent {
    /// Network connectivity changed
    NetworkChanged {
        /// Whether the device is online
        online: bool,
    },

    /// Application moved between foreground and background
    AppStateChanged {
        /// Whether the app is foregrounded
        foreground: bool,
    },

    /// The current session was confirmed against the pairing directory
    SessionValidated,

    /// The pairing directory disagreed with the local session; local
    /// pairing was cleared. Terminal.
    SessionExpired,

    /// A reconnection attempt was scheduled
    ReconnectScheduled {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt runs
        #[serde(with = "duration_millis")]
        delay: Duration,
    },

    /// A reconnection attempt re-established the link
    ReconnectSucceeded,

    /// Reconnection attempts are exhausted. Terminal.
    ReconnectFailed,

    /// The peer link reported connected
    LinkConnected,

    /// The peer link was lost (grace period elapsed without recovery)
    LinkLost,

    /// The link is up but health polling sees no succeeded candidate pair
    LinkDegraded,

    /// An unrecoverable fault; the supervisor has reset itself. Terminal.
    FatalError {
        /// Rendered error message
        message: String,
    },
}

impl ConnectionEvent {
    /// Terminal events end the supervisor's current episode; nothing more
    /// is emitted for it until the application acts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::SessionExpired
                | ConnectionEvent::ReconnectFailed
                | ConnectionEvent::FatalError { .. }
        )
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
