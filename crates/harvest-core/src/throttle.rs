//! Per-domain request throttling for polite fetching.
//!
//! Every hostname gets its own periodic emitter that releases one request per
//! interval. The emitter map belongs to a single [`DomainRateLimiter`], so two
//! orchestrators in one process never share throttling state.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use harvest_core::throttle::DomainRateLimiter;
//!
//! # async fn run() {
//! let limiter = DomainRateLimiter::new(Duration::from_secs(1));
//! limiter.acquire("https://example.com/a").await; // immediate
//! limiter.acquire("https://example.com/b").await; // ~1s later
//! limiter.acquire("https://other.org/").await;    // immediate
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};
use url::Url;

type Emitter = Arc<Mutex<Interval>>;

/// Fixed-interval throttle keyed by hostname.
pub struct DomainRateLimiter {
    interval: Duration,
    emitters: RwLock<HashMap<String, Emitter>>,
}

impl DomainRateLimiter {
    /// One request per `interval` per host. `Duration::ZERO` disables throttling.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            emitters: RwLock::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Extract the throttling key (lowercased hostname) from a URL.
    pub fn domain_key(url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        url.host_str().map(|h| h.to_ascii_lowercase())
    }

    /// Wait for the next tick of `url`'s domain emitter.
    ///
    /// The first request to a domain passes immediately. URLs without a host
    /// are not throttled.
    pub async fn acquire(&self, url: &str) {
        if self.interval.is_zero() {
            return;
        }
        let Some(domain) = Self::domain_key(url) else {
            return;
        };

        let emitter = self.emitter_for(&domain);
        let mut ticker = emitter.lock().await;
        let started = tokio::time::Instant::now();
        ticker.tick().await;

        let waited = started.elapsed();
        if !waited.is_zero() {
            tracing::debug!(
                domain = %domain,
                wait_ms = %waited.as_millis(),
                "Throttled request"
            );
        }
    }

    fn emitter_for(&self, domain: &str) -> Emitter {
        if let Some(emitter) = self
            .emitters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
        {
            return Arc::clone(emitter);
        }

        let mut map = self
            .emitters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another worker may have created it between the two locks.
        let emitter = map.entry(domain.to_string()).or_insert_with(|| {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Arc::new(Mutex::new(ticker))
        });
        Arc::clone(emitter)
    }

    /// Number of domains with a live emitter.
    pub fn tracked_domains(&self) -> usize {
        self.emitters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every emitter. Called on shutdown.
    pub fn clear(&self) {
        self.emitters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for DomainRateLimiter {
    /// One request per second per domain.
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
