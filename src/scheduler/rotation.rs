//! Proxy rotation for link visits
//!
//! Every visit goes out through one proxy picked from a shared pool. A proxy
//! that already served a link stays off-limits for that link until its
//! cooldown elapses; other links may still use it.
//!
//! Selection never fails:
//! - a random proxy outside the cooldown set when one exists,
//! - a random proxy from the whole pool when every one is cooling down
//!   (logged and counted as exhaustion),
//! - a direct connection when the pool is empty.

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use crate::config::ProxyConfig;
use crate::metrics;
use crate::models::LinkId;
use crate::utils::{parse_proxy_list, redact_proxy};

// ============================================================================
// Proxy Pool
// ============================================================================

/// Ordered, de-duplicated set of proxy URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyPool {
    proxies: Vec<String>,
}

impl ProxyPool {
    /// Build a pool, dropping blanks and duplicates while keeping order
    pub fn new<I, S>(proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool: Vec<String> = Vec::new();
        for proxy in proxies {
            let proxy = proxy.into();
            let proxy = proxy.trim();
            if !proxy.is_empty() && !pool.iter().any(|p| p == proxy) {
                pool.push(proxy.to_string());
            }
        }
        Self { proxies: pool }
    }

    /// Parse a comma- or newline-separated proxy list
    pub fn parse(raw: &str) -> Self {
        Self {
            proxies: parse_proxy_list(raw),
        }
    }

    /// Pool configured for the engine
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.pool.iter().cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn contains(&self, proxy: &str) -> bool {
        self.proxies.iter().any(|p| p == proxy)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.proxies.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.proxies
    }
}

// ============================================================================
// Proxy Selection
// ============================================================================

/// Outcome of picking a proxy for one visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySelection {
    /// Proxy not used for this link within the cooldown
    Fresh(String),

    /// Every proxy was cooling down; this one is reused early
    Reused(String),

    /// No proxies configured, connect directly
    Direct,
}

impl ProxySelection {
    /// Proxy to route through, `None` for a direct connection
    pub fn proxy(&self) -> Option<&str> {
        match self {
            Self::Fresh(p) | Self::Reused(p) => Some(p),
            Self::Direct => None,
        }
    }

    pub fn into_proxy(self) -> Option<String> {
        match self {
            Self::Fresh(p) | Self::Reused(p) => Some(p),
            Self::Direct => None,
        }
    }

    /// True when the cooldown could not be honored
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Reused(_))
    }
}

impl fmt::Display for ProxySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh(p) => write!(f, "{}", redact_proxy(p)),
            Self::Reused(p) => write!(f, "{} (reused)", redact_proxy(p)),
            Self::Direct => write!(f, "direct"),
        }
    }
}

// ============================================================================
// Proxy Selector
// ============================================================================

/// Picks proxies uniformly at random, honoring per-link cooldown
///
/// The RNG sits behind a mutex so one selector can be shared by every visit
/// task. Seed it for reproducible choices in tests.
#[derive(Debug)]
pub struct ProxySelector<R = ChaCha8Rng> {
    rng: Mutex<R>,
}

impl ProxySelector<ChaCha8Rng> {
    /// Selector seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    /// Selector with a fixed seed
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl Default for ProxySelector<ChaCha8Rng> {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl<R: Rng> ProxySelector<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Choose the proxy for the next visit of `link_id`
    ///
    /// `recently_used` holds the proxies that served this link within the
    /// cooldown window. Entries that are no longer in the pool are ignored.
    pub fn select(
        &self,
        link_id: LinkId,
        pool: &ProxyPool,
        recently_used: &HashSet<String>,
    ) -> ProxySelection {
        if pool.is_empty() {
            return ProxySelection::Direct;
        }

        let available: Vec<&String> = pool
            .as_slice()
            .iter()
            .filter(|p| !recently_used.contains(p.as_str()))
            .collect();

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(proxy) = available.choose(&mut *rng) {
            return ProxySelection::Fresh((*proxy).clone());
        }

        // Pool is non-empty, so choose() only returns None for an empty slice.
        let Some(proxy) = pool.as_slice().choose(&mut *rng) else {
            return ProxySelection::Direct;
        };

        tracing::warn!(
            link_id = link_id,
            pool_size = pool.len(),
            proxy = %redact_proxy(proxy),
            "All proxies used within cooldown, reusing one"
        );
        metrics::record_proxy_exhaustion();

        ProxySelection::Reused(proxy.clone())
    }
}
