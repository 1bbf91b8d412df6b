//! Configuration types for the session link

use paircam_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the session link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// WebSocket relay URL for signaling (ws:// or wss://)
    pub relay_url: String,

    /// HTTP endpoint returning credentialed relay servers. Empty string
    /// disables fetching; the static fallback set is used instead.
    pub credential_endpoint: String,

    /// API key passed to the credential endpoint as a query parameter
    pub credential_api_key: String,

    /// Static STUN server URLs (always merged into every server set)
    pub stun_servers: Vec<String>,

    /// Static free relay servers used when the credential fetch degrades
    pub fallback_relays: Vec<RelayServerConfig>,

    /// Timing and limit knobs
    pub options: LinkOptions,
}

/// A TURN relay entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServerConfig {
    /// Relay URL (turn: or turns:)
    pub url: String,

    /// Username for relay authentication
    pub username: String,

    /// Credential for relay authentication
    pub credential: String,
}

/// Timing and limit knobs for the link
///
/// Raw integer fields keep the struct trivially serializable; the
/// `Duration` accessors are what the code uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOptions {
    /// Local media acquisition timeout in milliseconds (default: 12000)
    pub media_timeout_ms: u64,

    /// Maximum media acquisition attempts (default: 3)
    pub media_retry_attempts: u32,

    /// Credential fetch timeout in milliseconds (default: 8000)
    pub credential_timeout_ms: u64,

    /// Credential cache TTL in seconds (default: 300)
    pub credential_ttl_secs: u64,

    /// How long the transport may sit in "checking" before a synthetic
    /// timeout fires, in milliseconds (default: 20000)
    pub checking_stall_ms: u64,

    /// Minimum interval between accepted offers while the signaling phase
    /// is stable, in milliseconds (default: 2000)
    pub offer_window_ms: u64,

    /// Grace period after "disconnected" before the link is declared
    /// lost, in milliseconds (default: 10000)
    pub disconnect_grace_ms: u64,

    /// Health poll interval in milliseconds (default: 10000)
    pub health_interval_ms: u64,

    /// Consecutive failed health polls before a degraded warning
    /// (default: 3)
    pub health_failure_threshold: u32,

    /// Minimum interval between session validation round trips, in
    /// seconds (default: 60)
    pub validation_interval_secs: u64,

    /// Presence heartbeat interval in seconds (default: 30)
    pub heartbeat_interval_secs: u64,

    /// Maximum reconnection attempts (default: 5)
    pub max_reconnect_attempts: u32,

    /// Initial reconnection backoff in milliseconds (default: 1000)
    pub reconnect_backoff_initial_ms: u64,

    /// Maximum reconnection backoff in milliseconds (default: 30000)
    pub reconnect_backoff_max_ms: u64,

    /// Reconnection backoff multiplier (default: 2.0)
    pub reconnect_backoff_multiplier: f64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            media_timeout_ms: 12_000,
            media_retry_attempts: 3,
            credential_timeout_ms: 8_000,
            credential_ttl_secs: 300,
            checking_stall_ms: 20_000,
            offer_window_ms: 2_000,
            disconnect_grace_ms: 10_000,
            health_interval_ms: 10_000,
            health_failure_threshold: 3,
            validation_interval_secs: 60,
            heartbeat_interval_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_backoff_initial_ms: 1_000,
            reconnect_backoff_max_ms: 30_000,
            reconnect_backoff_multiplier: 2.0,
        }
    }
}

impl LinkOptions {
    pub fn media_timeout(&self) -> Duration {
        Duration::from_millis(self.media_timeout_ms)
    }

    pub fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }

    pub fn checking_stall(&self) -> Duration {
        Duration::from_millis(self.checking_stall_ms)
    }

    pub fn offer_window(&self) -> Duration {
        Duration::from_millis(self.offer_window_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            relay_url: "wss://relay.paircam.app/signal".to_string(),
            credential_endpoint: String::new(),
            credential_api_key: String::new(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            fallback_relays: vec![
                RelayServerConfig {
                    url: "turn:openrelay.metered.ca:80".to_string(),
                    username: "openrelayproject".to_string(),
                    credential: "openrelayproject".to_string(),
                },
                RelayServerConfig {
                    url: "turn:openrelay.metered.ca:443".to_string(),
                    username: "openrelayproject".to_string(),
                    credential: "openrelayproject".to_string(),
                },
            ],
            options: LinkOptions::default(),
        }
    }
}

impl LinkConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a WebSocket URL
    /// - `credential_endpoint` is set but not an HTTP URL
    /// - `stun_servers` is empty
    /// - `fallback_relays` is empty (a relay path must always exist)
    /// - a timing knob is zero where the link needs it positive
    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if !self.credential_endpoint.is_empty()
            && !self.credential_endpoint.starts_with("http://")
            && !self.credential_endpoint.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "credential_endpoint must be an HTTP URL, got {}",
                self.credential_endpoint
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one STUN server is required".to_string(),
            ));
        }

        if self.fallback_relays.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one fallback relay is required".to_string(),
            ));
        }

        if self.options.health_failure_threshold == 0 {
            return Err(Error::InvalidConfig(
                "health_failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.options.reconnect_backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnect_backoff_multiplier must be >= 1.0, got {}",
                self.options.reconnect_backoff_multiplier
            )));
        }

        for knob in [
            ("media_timeout_ms", self.options.media_timeout_ms),
            ("credential_timeout_ms", self.options.credential_timeout_ms),
            ("checking_stall_ms", self.options.checking_stall_ms),
            ("health_interval_ms", self.options.health_interval_ms),
            (
                "reconnect_backoff_initial_ms",
                self.options.reconnect_backoff_initial_ms,
            ),
        ] {
            if knob.1 == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive",
                    knob.0
                )));
            }
        }

        Ok(())
    }

    /// Create a configuration preset tuned for cellular networks.
    ///
    /// Longer disconnect grace for tower handoffs, more reconnection
    /// attempts with gentler backoff growth.
    pub fn mobile_preset(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            options: LinkOptions {
                disconnect_grace_ms: 15_000,
                max_reconnect_attempts: 8,
                reconnect_backoff_initial_ms: 2_000,
                reconnect_backoff_max_ms: 60_000,
                reconnect_backoff_multiplier: 1.5,
                ..LinkOptions::default()
            },
            ..Self::default()
        }
    }

    /// Set the credential endpoint and key, for chaining.
    pub fn with_credentials(mut self, endpoint: &str, api_key: &str) -> Self {
        self.credential_endpoint = endpoint.to_string();
        self.credential_api_key = api_key.to_string();
        self
    }
}
