//! Resilient HTTP fetcher
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building HTTP clients with browser-like headers and TLS settings
//! - Retrying transient failures with exponential backoff
//! - Rotating user agents when the origin rejects a request
//! - Racing a failed request through the proxy pool
//!
//! # Request Flow
//!
//! 1. Send a direct GET with the first user agent of the rotation
//! 2. Retry timeouts, connection errors and HTTP 500/502/503/504 up to
//!    `max-attempts` times, waiting `backoff * 2^(attempt-1)` in between
//! 3. A 2xx with a body is returned. Any other answer moves on to the next
//!    user agent of the rotation
//! 4. If every user agent failed and proxy fallback is allowed, the same GET
//!    is raced through every proxy endpoint and the first success wins

use crate::config::FetchConfig;
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::{FetchError, FetchResult};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// HTTP statuses retried on the direct path
const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Redirect hops followed when redirects are allowed
const MAX_REDIRECTS: usize = 10;

/// Per-call request options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Fixed user agent; `None` uses the fetcher's rotation
    pub user_agent: Option<String>,

    /// Follow 3xx responses
    pub allow_redirects: bool,

    /// Race the request through the proxy pool when the direct path fails
    pub allow_proxy_fallback: bool,

    /// Overrides the configured read timeout for this call
    pub read_timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            allow_redirects: true,
            allow_proxy_fallback: true,
            read_timeout: None,
        }
    }
}

impl FetchOptions {
    /// Options for the paginated index pages
    pub fn page() -> Self {
        Self::default()
    }

    /// Options for detail pages
    pub fn detail(allow_redirects: bool) -> Self {
        Self {
            allow_redirects,
            ..Self::default()
        }
    }
}

/// Timeouts shared by every client the fetcher builds
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        }
    }

    /// Whole-request deadline: connecting plus reading the response
    fn total_timeout(&self, read_override: Option<Duration>) -> Duration {
        self.connect_timeout + read_override.unwrap_or(self.read_timeout)
    }
}

/// The ordered list of user agents tried for one request
///
/// The privileged default always comes first. It is followed by up to
/// `extra` agents from the pool in a fresh random order on every call.
#[derive(Debug, Clone)]
pub struct UserAgentRotation {
    default: String,
    pool: Vec<String>,
    extra: usize,
}

impl UserAgentRotation {
    pub fn new(default: impl Into<String>, pool: Vec<String>, extra: usize) -> Self {
        let default = default.into();
        let pool = pool.into_iter().filter(|ua| *ua != default).collect();
        Self {
            default,
            pool,
            extra,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            config.default_user_agent.clone(),
            config.user_agents.clone(),
            config.rotate_user_agents,
        )
    }

    pub fn default_agent(&self) -> &str {
        &self.default
    }

    /// Returns the agents to try, default first
    pub fn sequence(&self) -> Vec<String> {
        let mut extras = self.pool.clone();
        extras.shuffle(&mut rand::thread_rng());
        extras.truncate(self.extra);

        let mut agents = Vec::with_capacity(extras.len() + 1);
        agents.push(self.default.clone());
        agents.extend(extras);
        agents
    }
}

/// Counters describing the fetcher's work so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: usize,
    pub proxy_races: usize,
    pub proxy_wins: usize,
}

#[derive(Debug, Default)]
struct FetchCounters {
    requests: AtomicUsize,
    proxy_races: AtomicUsize,
    proxy_wins: AtomicUsize,
}

/// Final outcome of the direct path for one user agent
#[derive(Debug)]
enum DirectOutcome {
    Content(String),
    Empty,
    Status(StatusCode),
    Network(FetchError),
}

/// Builds an HTTP client with browser-like defaults
///
/// TLS goes through rustls with TLS 1.2 as the floor. rustls only ships
/// AEAD suites with ECDHE key exchange, so no DH or anonymous suite is ever
/// offered.
///
/// # Arguments
///
/// * `settings` - Connect and read timeouts
/// * `follow_redirects` - Whether 3xx responses are followed
/// * `proxy` - Route every request through this endpoint
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(FetchError::ClientBuild)` - Failed to build client
pub fn build_http_client(
    settings: &ClientSettings,
    follow_redirects: bool,
    proxy: Option<&ProxyEndpoint>,
) -> FetchResult<Client> {
    let redirect = if follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let mut builder = Client::builder()
        .use_rustls_tls()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .default_headers(browser_headers())
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.total_timeout(None))
        .redirect(redirect)
        .gzip(true)
        .brotli(true);

    if let Some(endpoint) = proxy {
        let proxy = reqwest::Proxy::all(endpoint.proxy_url())
            .map_err(|e| FetchError::ClientBuild(format!("proxy {}: {}", endpoint, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("ja,en-US;q=0.7,en;q=0.3"),
    );
    headers
}

/// HTTP fetcher with retries, user agent rotation and proxy fallback
pub struct ResilientFetcher {
    following: Client,
    non_following: Client,
    settings: ClientSettings,
    agents: UserAgentRotation,
    proxies: Arc<ProxyPool>,
    max_attempts: u32,
    backoff: Duration,
    proxy_concurrency: usize,
    counters: FetchCounters,
}

impl ResilientFetcher {
    /// Creates a fetcher and its proxy pool from the fetch configuration
    pub fn from_config(config: &FetchConfig) -> FetchResult<Self> {
        let settings = ClientSettings::from_config(config);
        let following = build_http_client(&settings, true, None)?;
        let proxies = Arc::new(ProxyPool::from_config(following.clone(), config)?);
        Self::new(config, proxies)
    }

    /// Creates a fetcher that falls back to an existing proxy pool
    pub fn new(config: &FetchConfig, proxies: Arc<ProxyPool>) -> FetchResult<Self> {
        let settings = ClientSettings::from_config(config);
        Ok(Self {
            following: build_http_client(&settings, true, None)?,
            non_following: build_http_client(&settings, false, None)?,
            settings,
            agents: UserAgentRotation::from_config(config),
            proxies,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            proxy_concurrency: config.proxy_concurrency.max(1),
            counters: FetchCounters::default(),
        })
    }

    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            proxy_races: self.counters.proxy_races.load(Ordering::Relaxed),
            proxy_wins: self.counters.proxy_wins.load(Ordering::Relaxed),
        }
    }

    /// Fetches a document
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `options` - User agent, redirect and fallback behaviour
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The non-empty response body
    /// * `Err(FetchError::EmptyContent)` - A 2xx answer had no body
    /// * `Err(FetchError::DirectFetchFailed)` - The direct path failed and
    ///   fallback is disabled or the proxy source could not be read
    /// * `Err(FetchError::AllProxiesExhausted)` - Every proxied attempt failed
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<String> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let agents = match &options.user_agent {
            Some(agent) => vec![agent.clone()],
            None => self.agents.sequence(),
        };
        let client = if options.allow_redirects {
            &self.following
        } else {
            &self.non_following
        };

        let mut last = None;
        for agent in &agents {
            let outcome = self
                .direct(client, url, agent, options.allow_redirects, options.read_timeout)
                .await;
            match outcome {
                DirectOutcome::Content(body) => return Ok(body),
                DirectOutcome::Empty if options.allow_redirects => {
                    return Err(FetchError::EmptyContent {
                        url: url.to_string(),
                    });
                }
                DirectOutcome::Network(error) => {
                    last = Some(DirectOutcome::Network(error));
                    break;
                }
                other => {
                    tracing::debug!("Direct fetch of {} with agent '{}': {:?}", url, agent, other);
                    last = Some(other);
                }
            }
        }

        let failure = match last {
            Some(DirectOutcome::Empty) => FetchError::EmptyContent {
                url: url.to_string(),
            },
            Some(DirectOutcome::Status(status)) => FetchError::DirectFetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            },
            Some(DirectOutcome::Network(FetchError::NetworkTransient { message, .. })) => {
                FetchError::DirectFetchFailed {
                    url: url.to_string(),
                    reason: message,
                }
            }
            Some(DirectOutcome::Network(other)) => other,
            Some(DirectOutcome::Content(_)) | None => FetchError::DirectFetchFailed {
                url: url.to_string(),
                reason: "no user agent to try".to_string(),
            },
        };

        if !options.allow_proxy_fallback {
            return Err(failure);
        }

        tracing::warn!("{}; falling back to proxies", failure);

        let endpoints = match self.proxies.endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!("Proxy fallback unavailable for {}: {}", url, e);
                return Err(failure);
            }
        };

        let agent = agents
            .first()
            .cloned()
            .unwrap_or_else(|| self.agents.default_agent().to_string());
        self.race(url, &agent, options, &endpoints).await
    }

    /// Runs the direct path for one user agent, retrying transient failures
    ///
    /// A 3xx answer on a client that does not follow redirects carries no
    /// content and is reported as [`DirectOutcome::Empty`].
    async fn direct(
        &self,
        client: &Client,
        url: &str,
        agent: &str,
        follow_redirects: bool,
        read_timeout: Option<Duration>,
    ) -> DirectOutcome {
        let timeout = self.settings.total_timeout(read_timeout);
        let mut attempt = 1;

        loop {
            let result = client
                .get(url)
                .header(USER_AGENT, agent)
                .timeout(timeout)
                .send()
                .await;

            let retryable = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.text().await {
                            Ok(body) if body.is_empty() => return DirectOutcome::Empty,
                            Ok(body) => return DirectOutcome::Content(body),
                            Err(e) => transient(url, e),
                        }
                    } else if status.is_redirection() && !follow_redirects {
                        return DirectOutcome::Empty;
                    } else if RETRY_STATUSES.contains(&status) {
                        DirectOutcome::Status(status)
                    } else {
                        return DirectOutcome::Status(status);
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                    transient(url, e)
                }
                Err(e) => return transient(url, e),
            };

            if attempt >= self.max_attempts {
                return retryable;
            }

            let delay = self
                .backoff
                .saturating_mul(2u32.saturating_pow(attempt - 1));
            tracing::debug!(
                "Attempt {}/{} for {} failed ({:?}); retrying in {:?}",
                attempt,
                self.max_attempts,
                url,
                retryable,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Races the request through every endpoint; the first success wins
    ///
    /// At most `proxy-concurrency` attempts are in flight at once. Attempts
    /// still running when a winner is found are aborted.
    async fn race(
        &self,
        url: &str,
        agent: &str,
        options: &FetchOptions,
        endpoints: &[ProxyEndpoint],
    ) -> FetchResult<String> {
        self.counters.proxy_races.fetch_add(1, Ordering::Relaxed);

        if endpoints.is_empty() {
            return Err(FetchError::AllProxiesExhausted {
                url: url.to_string(),
                attempted: 0,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.proxy_concurrency));
        let mut attempts = JoinSet::new();

        for endpoint in endpoints.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let settings = self.settings;
            let url = url.to_string();
            let agent = agent.to_string();
            let allow_redirects = options.allow_redirects;
            let read_timeout = options.read_timeout;

            attempts.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| format!("{}: {}", endpoint, e))?;
                fetch_via_proxy(&settings, &endpoint, &url, &agent, allow_redirects, read_timeout)
                    .await
                    .map_err(|e| format!("{}: {}", endpoint, e))
            });
        }

        let total = endpoints.len();
        let mut failed = 0;

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(Ok(body)) => {
                    let abandoned = attempts.len();
                    attempts.abort_all();
                    self.counters.proxy_wins.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "Proxy race for {}: ok=1 failed={} abandoned={}",
                        url,
                        failed,
                        abandoned
                    );
                    return Ok(body);
                }
                Ok(Err(reason)) => {
                    tracing::debug!("Proxy attempt failed: {}", reason);
                    failed += 1;
                }
                Err(e) => {
                    tracing::debug!("Proxy attempt task failed: {}", e);
                    failed += 1;
                }
            }
        }

        tracing::info!(
            "Proxy race for {}: ok=0 failed={} abandoned=0",
            url,
            failed
        );
        Err(FetchError::AllProxiesExhausted {
            url: url.to_string(),
            attempted: total,
        })
    }
}

fn transient(url: &str, error: reqwest::Error) -> DirectOutcome {
    DirectOutcome::Network(FetchError::NetworkTransient {
        url: url.to_string(),
        message: error.to_string(),
    })
}

/// One proxied GET; success is a 2xx with a non-empty body
async fn fetch_via_proxy(
    settings: &ClientSettings,
    endpoint: &ProxyEndpoint,
    url: &str,
    agent: &str,
    allow_redirects: bool,
    read_timeout: Option<Duration>,
) -> Result<String, String> {
    let client = build_http_client(settings, allow_redirects, Some(endpoint))
        .map_err(|e| e.to_string())?;

    let response = client
        .get(url)
        .header(USER_AGENT, agent)
        .timeout(settings.total_timeout(read_timeout))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if status.is_redirection() && !allow_redirects {
        return Err("zero length content (redirect not followed)".to_string());
    }
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }

    let body = response.text().await.map_err(|e| e.to_string())?;
    if body.is_empty() {
        return Err("zero length content".to_string());
    }
    Ok(body)
}
