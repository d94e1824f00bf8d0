//! Construction parameters and the pre-configured cache profiles.

use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Size and expiry limits for a [`Cache`](crate::Cache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction kicks in.
    pub max_size: usize,
    /// TTL applied when `set` is called without an explicit one.
    pub default_ttl: Duration,
}

impl CacheConfig {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self { max_size, default_ttl }
    }

    /// Per-contact enrichment lookups: large and long-lived.
    pub fn enrichment() -> Self {
        Self::new(1000, 24 * HOUR)
    }

    /// Scraped pages change often, so they expire within the hour.
    pub fn scraping() -> Self {
        Self::new(500, HOUR)
    }

    /// Model inference responses.
    pub fn inference() -> Self {
        Self::new(200, 6 * HOUR)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(100, HOUR)
    }
}
