//! Session data model

use serde::{Deserialize, Serialize};

/// The two asymmetric participants of a paired session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Originates media (camera device)
    Camera,
    /// Consumes and steers the media (director device)
    Director,
}

impl Role {
    /// The camera side is the offering party in every negotiation.
    pub fn is_offerer(&self) -> bool {
        matches!(self, Role::Camera)
    }
}

/// A paired session between two devices.
///
/// Created when the devices pair, destroyed when they unpair. The session
/// id doubles as the signaling topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Shared identifier of the pairing, also the signaling topic
    pub session_id: String,

    /// This device's identifier
    pub local_device_id: String,

    /// The paired device's identifier
    pub peer_device_id: String,

    /// Which side of the session this device plays
    pub role: Role,
}

impl Session {
    /// Create a session descriptor.
    pub fn new(
        session_id: impl Into<String>,
        local_device_id: impl Into<String>,
        peer_device_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            local_device_id: local_device_id.into(),
            peer_device_id: peer_device_id.into(),
            role,
        }
    }

    /// The same session as seen from the other device.
    pub fn inverted(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            local_device_id: self.peer_device_id.clone(),
            peer_device_id: self.local_device_id.clone(),
            role: match self.role {
                Role::Camera => Role::Director,
                Role::Director => Role::Camera,
            },
        }
    }
}
