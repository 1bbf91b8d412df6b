//! ICE server provisioning
//!
//! Transport servers come from three places: static STUN entries from
//! config, credentialed relays fetched from an HTTP endpoint, and a static
//! free-relay fallback list. The fetch is cached under a TTL and bounded
//! by a hard timeout; every failure degrades to the static fallback
//! without surfacing an error, so a relay path is always available.

use crate::config::LinkConfig;
use async_trait::async_trait;
use paircam_core::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One ICE server entry, matching the credential endpoint's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerEntry {
    /// Server URLs; the endpoint may send a single string or a list
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// Username for credentialed relays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for credentialed relays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerEntry {
    /// A plain STUN entry.
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    /// A credentialed relay entry.
    pub fn relay(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    /// Whether any URL is a relay (turn/turns) URL.
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// A fetched server set with its fetch time.
#[derive(Debug, Clone)]
pub struct IceServerSet {
    /// Merged server entries
    pub servers: Vec<IceServerEntry>,
    /// When the fetch completed
    pub fetched_at: Instant,
}

impl IceServerSet {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Fetches credentialed relay servers.
#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    /// One fetch attempt. The provider applies the timeout bound.
    async fn fetch(&self) -> Result<Vec<IceServerEntry>>;
}

/// HTTP fetcher hitting the credential endpoint with an API-key query
/// parameter. Non-2xx responses are errors; the provider absorbs them.
pub struct HttpCredentialFetcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpCredentialFetcher {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CredentialFetcher for HttpCredentialFetcher {
    async fn fetch(&self) -> Result<Vec<IceServerEntry>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("credential fetch: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Collaborator(format!("credential fetch: {}", e)))?;

        response
            .json::<Vec<IceServerEntry>>()
            .await
            .map_err(|e| Error::Collaborator(format!("credential fetch body: {}", e)))
    }
}

/// Fetcher used when no credential endpoint is configured.
struct NoCredentialFetcher;

#[async_trait]
impl CredentialFetcher for NoCredentialFetcher {
    async fn fetch(&self) -> Result<Vec<IceServerEntry>> {
        Err(Error::Collaborator(
            "no credential endpoint configured".to_string(),
        ))
    }
}

/// TTL-cached ICE server provider.
pub struct IceServerProvider {
    fetcher: Arc<dyn CredentialFetcher>,
    cache: Mutex<Option<IceServerSet>>,
    ttl: Duration,
    fetch_timeout: Duration,
    stun_servers: Vec<IceServerEntry>,
    fallback_relays: Vec<IceServerEntry>,
}

impl IceServerProvider {
    /// Build a provider from config with the HTTP fetcher.
    pub fn from_config(config: &LinkConfig) -> Result<Self> {
        let fetcher: Arc<dyn CredentialFetcher> = if config.credential_endpoint.is_empty() {
            Arc::new(NoCredentialFetcher)
        } else {
            Arc::new(HttpCredentialFetcher::new(
                &config.credential_endpoint,
                &config.credential_api_key,
                config.options.credential_timeout(),
            )?)
        };

        Ok(Self::new(fetcher, config))
    }

    /// Build a provider with a custom fetcher.
    pub fn new(fetcher: Arc<dyn CredentialFetcher>, config: &LinkConfig) -> Self {
        let stun_servers = config
            .stun_servers
            .iter()
            .map(|url| IceServerEntry::stun(url))
            .collect();

        let fallback_relays = config
            .fallback_relays
            .iter()
            .map(|r| IceServerEntry::relay(&r.url, &r.username, &r.credential))
            .collect();

        Self {
            fetcher,
            cache: Mutex::new(None),
            ttl: config.options.credential_ttl(),
            fetch_timeout: config.options.credential_timeout(),
            stun_servers,
            fallback_relays,
        }
    }

    /// Get the current server set.
    ///
    /// Returns the cached set while it is fresh; otherwise attempts one
    /// bounded refresh. Never errors and never blocks past the fetch
    /// timeout: any failure yields the static STUN + free-relay fallback.
    pub async fn get_servers(&self) -> Vec<IceServerEntry> {
        let mut cache = self.cache.lock().await;

        if let Some(set) = cache.as_ref() {
            if set.is_fresh(self.ttl) {
                debug!("using cached ICE servers ({} entries)", set.servers.len());
                return set.servers.clone();
            }
        }

        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch()).await {
            Ok(Ok(fetched)) => {
                let merged = self.merge(fetched);
                debug!("fetched ICE servers ({} entries)", merged.len());
                *cache = Some(IceServerSet {
                    servers: merged.clone(),
                    fetched_at: Instant::now(),
                });
                merged
            }
            Ok(Err(e)) => {
                warn!("ICE credential fetch failed, using fallback: {}", e);
                self.static_fallback()
            }
            Err(_) => {
                warn!(
                    "ICE credential fetch exceeded {:?}, using fallback",
                    self.fetch_timeout
                );
                self.static_fallback()
            }
        }
    }

    /// Static STUN + fetched relays + free-relay fallback.
    ///
    /// The free relays ride along even on success so a relay path exists
    /// when the fetched credentials are degraded.
    fn merge(&self, fetched: Vec<IceServerEntry>) -> Vec<IceServerEntry> {
        let mut merged = self.stun_servers.clone();
        merged.extend(fetched);
        merged.extend(self.fallback_relays.clone());
        merged
    }

    /// The always-available set: configured STUN plus free relays.
    pub fn static_fallback(&self) -> Vec<IceServerEntry> {
        let mut fallback = self.stun_servers.clone();
        fallback.extend(self.fallback_relays.clone());
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedFetcher {
        calls: AtomicU32,
        result: Result<Vec<IceServerEntry>>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn ok(servers: Vec<IceServerEntry>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                result: Ok(servers),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                result: Err(Error::Collaborator("503".to_string())),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl CredentialFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<Vec<IceServerEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.result {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(Error::Collaborator(e.to_string())),
            }
        }
    }

    fn config_with_ttl(ttl_secs: u64, timeout_ms: u64) -> LinkConfig {
        let mut config = LinkConfig::default();
        config.options.credential_ttl_secs = ttl_secs;
        config.options.credential_timeout_ms = timeout_ms;
        config
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let fetcher = Arc::new(ScriptedFetcher::ok(vec![IceServerEntry::relay(
            "turn:relay.example:3478",
            "u",
            "c",
        )]));
        let provider = IceServerProvider::new(fetcher.clone(), &config_with_ttl(300, 8000));

        let first = provider.get_servers().await;
        let second = provider.get_servers().await;

        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_ttl_triggers_refresh() {
        let fetcher = Arc::new(ScriptedFetcher::ok(vec![]));
        let provider = IceServerProvider::new(fetcher.clone(), &config_with_ttl(0, 8000));

        provider.get_servers().await;
        provider.get_servers().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_fallback_with_stun_and_relay() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let provider = IceServerProvider::new(fetcher, &config_with_ttl(300, 8000));

        let servers = provider.get_servers().await;

        assert!(!servers.is_empty());
        assert!(servers.iter().any(|s| s.urls[0].starts_with("stun:")));
        assert!(servers.iter().any(|s| s.is_relay()));
    }

    #[tokio::test]
    async fn test_fetch_timeout_bounded() {
        let fetcher = Arc::new(ScriptedFetcher {
            calls: AtomicU32::new(0),
            result: Ok(vec![]),
            delay: Duration::from_secs(3600),
        });
        let provider = IceServerProvider::new(fetcher, &config_with_ttl(300, 50));

        let started = Instant::now();
        let servers = provider.get_servers().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(servers.iter().any(|s| s.is_relay()));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let provider = IceServerProvider::new(fetcher.clone(), &config_with_ttl(300, 8000));

        provider.get_servers().await;
        provider.get_servers().await;

        // Every call after a failure attempts a fresh fetch.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_merges_all_three_sources() {
        let fetched = vec![IceServerEntry::relay("turn:paid.example:443", "u", "c")];
        let fetcher = Arc::new(ScriptedFetcher::ok(fetched));
        let provider = IceServerProvider::new(fetcher, &config_with_ttl(300, 8000));

        let servers = provider.get_servers().await;

        assert!(servers.iter().any(|s| s.urls[0].starts_with("stun:")));
        assert!(servers
            .iter()
            .any(|s| s.urls[0] == "turn:paid.example:443"));
        assert!(servers
            .iter()
            .any(|s| s.urls[0].starts_with("turn:openrelay")));
    }

    #[test]
    fn test_entry_accepts_single_url_string() {
        let entry: IceServerEntry =
            serde_json::from_str(r#"{"urls": "stun:stun.example:3478"}"#).unwrap();
        assert_eq!(entry.urls, vec!["stun:stun.example:3478"]);

        let entry: IceServerEntry = serde_json::from_str(
            r#"{"urls": ["turn:a", "turn:b"], "username": "u", "credential": "c"}"#,
        )
        .unwrap();
        assert_eq!(entry.urls.len(), 2);
        assert!(entry.is_relay());
    }
}
