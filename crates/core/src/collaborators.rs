//! Trait boundary to the surrounding application
//!
//! The link never talks to the app's storage or backend directly; it sees
//! these narrow async traits and nothing else. Production implementations
//! live with the embedding application.

use crate::error::Result;
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Local pairing/session storage.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// The current session, if the device is paired.
    async fn session(&self) -> Option<Session>;

    /// Whether a pairing exists.
    async fn is_paired(&self) -> bool {
        self.session().await.is_some()
    }

    /// Remove the local pairing state.
    async fn clear_pairing(&self);
}

/// Remote pairing lookup and teardown.
#[async_trait]
pub trait PairingDirectory: Send + Sync {
    /// The partner currently recorded for `device_id`, if any.
    async fn current_partner(&self, device_id: &str) -> Result<Option<String>>;

    /// Remove the pairing record for `device_id`.
    async fn unpair(&self, device_id: &str) -> Result<()>;
}

/// Presence/history backend.
#[async_trait]
pub trait PresenceApi: Send + Sync {
    /// Publish this device's online flag. Best effort.
    async fn update_online_status(&self, device_id: &str, online: bool) -> Result<()>;

    /// Drop every live presence record for `device_id`.
    async fn disconnect_all(&self, device_id: &str) -> Result<()>;
}

/// A command issued over the session's control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Issuing device
    pub from: String,
    /// Target device
    pub to: String,
    /// Command verb
    pub command: String,
    /// Free-form payload
    pub data: serde_json::Value,
}

/// Durable sink for commands sent over the session.
#[async_trait]
pub trait CommandHistorySink: Send + Sync {
    /// Append a command under the session's history. Best effort at the
    /// call sites; failures must not fail the send.
    async fn append(&self, session_id: &str, record: &CommandRecord) -> Result<()>;
}
