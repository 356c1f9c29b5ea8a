//! Proxy pool for fallback requests
//!
//! The pool supplies the `host:port` endpoints that the fetcher races a
//! request through when the direct request fails. Endpoints come from either
//! a fixed list in the configuration or a public proxy list page, which is
//! cached process-wide for a configurable number of days.

mod cache;
mod source;

pub use cache::CachedProxies;
pub use source::parse_proxy_table;

use crate::config::FetchConfig;
use crate::{FetchError, FetchResult};
use reqwest::Client;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A single HTTP proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URL handed to the HTTP client's proxy setting
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{}'", s))?;
        if host.is_empty() {
            return Err(format!("missing host in '{}'", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{}': {}", s, e))?;
        Ok(Self::new(host, port))
    }
}

/// Where the pool's endpoints come from
#[derive(Debug, Clone)]
pub enum ProxySource {
    /// A public page with an HTML proxy table
    Remote { url: String },

    /// A fixed list that never expires
    Static(Vec<ProxyEndpoint>),
}

/// Process-wide proxy list with TTL-based refresh
///
/// Reads are concurrent. A refresh is single-writer: when the cache expires
/// under load, one caller refetches while the others wait for its result.
pub struct ProxyPool {
    client: Client,
    source: ProxySource,
    ttl: chrono::Duration,
    cache: RwLock<Option<CachedProxies>>,
    refresh_lock: Mutex<()>,
}

impl ProxyPool {
    /// Creates a pool backed by a remote proxy list page
    pub fn remote(client: Client, url: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            client,
            source: ProxySource::Remote { url: url.into() },
            ttl,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Creates a pool with a fixed endpoint list
    pub fn fixed(client: Client, endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            client,
            source: ProxySource::Static(endpoints),
            ttl: chrono::Duration::days(36_500),
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Creates the pool described by the fetch configuration
    ///
    /// A non-empty `proxies` list takes precedence over `proxy-source`.
    pub fn from_config(client: Client, config: &FetchConfig) -> Result<Self, FetchError> {
        if config.proxies.is_empty() {
            let ttl = chrono::Duration::days(i64::from(config.proxy_cache_days));
            return Ok(Self::remote(client, config.proxy_source.clone(), ttl));
        }

        let endpoints = config
            .proxies
            .iter()
            .map(|p| p.parse::<ProxyEndpoint>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(FetchError::ProxySourceUnavailable)?;
        Ok(Self::fixed(client, endpoints))
    }

    pub fn source(&self) -> &ProxySource {
        &self.source
    }

    /// Returns the current endpoint list, refreshing it if the cache expired
    ///
    /// # Returns
    ///
    /// * `Ok(endpoints)` - The cached or freshly fetched list
    /// * `Err(FetchError::ProxySourceUnavailable)` - The source could not be read
    pub async fn endpoints(&self) -> FetchResult<Arc<Vec<ProxyEndpoint>>> {
        if let Some(fresh) = self.cached_fresh().await {
            return Ok(fresh);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(fresh) = self.cached_fresh().await {
            return Ok(fresh);
        }

        let endpoints = self.refresh().await?;
        let entry = CachedProxies::new(endpoints, self.ttl);
        let shared = Arc::clone(&entry.endpoints);
        *self.cache.write().await = Some(entry);
        Ok(shared)
    }

    /// Fetches the endpoint list from the source, bypassing the cache
    pub async fn refresh(&self) -> FetchResult<Vec<ProxyEndpoint>> {
        match &self.source {
            ProxySource::Static(endpoints) => Ok(endpoints.clone()),
            ProxySource::Remote { url } => {
                tracing::info!("Refreshing proxy list from {}", url);

                let response = self.client.get(url).send().await.map_err(|e| {
                    FetchError::ProxySourceUnavailable(format!("{}: {}", url, e))
                })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::ProxySourceUnavailable(format!(
                        "{} returned HTTP {}",
                        url, status
                    )));
                }

                let body = response.text().await.map_err(|e| {
                    FetchError::ProxySourceUnavailable(format!("{}: {}", url, e))
                })?;

                let endpoints = parse_proxy_table(&body)?;
                tracing::info!("Proxy list refreshed: {} endpoints", endpoints.len());
                Ok(endpoints)
            }
        }
    }

    async fn cached_fresh(&self) -> Option<Arc<Vec<ProxyEndpoint>>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|entry| !entry.is_stale())
            .map(|entry| Arc::clone(&entry.endpoints))
    }
}
