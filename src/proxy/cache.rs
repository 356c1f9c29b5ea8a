//! Proxy list caching
//!
//! The public proxy list is expensive to fetch and changes slowly, so one copy
//! is kept for the whole process and replaced only after its TTL expires.

use crate::proxy::ProxyEndpoint;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// A fetched proxy list with the time it was fetched
#[derive(Debug, Clone)]
pub struct CachedProxies {
    /// The endpoints in source table order
    pub endpoints: Arc<Vec<ProxyEndpoint>>,

    /// When the list was fetched
    pub fetched_at: DateTime<Utc>,

    /// How long the list stays valid
    pub ttl: Duration,
}

impl CachedProxies {
    /// Creates a new cache entry stamped with the current time
    pub fn new(endpoints: Vec<ProxyEndpoint>, ttl: Duration) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            fetched_at: Utc::now(),
            ttl,
        }
    }

    /// Checks if the cached list is older than its TTL
    pub fn is_stale(&self) -> bool {
        self.age() > self.ttl
    }

    /// Returns the age of the cached list
    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }
}
