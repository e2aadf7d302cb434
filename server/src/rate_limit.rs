//! Per-IP registration rate limiting.
//!
//! Each client IP may complete one registration per window (10 minutes by
//! default). A request first calls [`RateLimiter::acquire`], which checks the
//! IP and, if allowed, reserves it in the same critical section. The caller
//! then either [`record`](RateLimiter::record)s the registration once the
//! tenant is persisted, or [`release`](RateLimiter::release)s the reservation
//! on failure. Failed attempts therefore never consume the slot, and
//! concurrent requests from one IP cannot all slip through.
//!
//! # Eviction
//!
//! Entries older than the window are swept opportunistically on every
//! acquire, and periodically by [`RateLimiter::spawn_cleanup_task`]. A
//! reservation whose request never finished (for example a dropped
//! connection) expires the same way. State lives only in memory and is lost
//! on restart.
//!
//! # Example
//!
//! ```rust
//! use modl_signup::rate_limit::{RateLimiter, RateLimitResult};
//! use tokio::time::Instant;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::default();
//!     let started_at = Instant::now();
//!
//!     match limiter.acquire("203.0.113.7", started_at).await {
//!         RateLimitResult::Allowed => {
//!             // ... create the tenant, then:
//!             limiter.record("203.0.113.7", started_at).await;
//!         }
//!         RateLimitResult::Limited { .. } => {
//!             // Return 429 Too Many Requests with Retry-After header
//!         }
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default window between two registrations from the same IP (10 minutes).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// The request is allowed to proceed.
    Allowed,

    /// The request is rate limited.
    ///
    /// The client should wait for the specified number of seconds
    /// before retrying.
    Limited {
        /// Number of seconds until the client can retry (at least 1).
        retry_after_secs: u64,
    },
}

impl RateLimitResult {
    /// Returns `true` if the request is allowed.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns `true` if the request is rate limited.
    #[inline]
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }

    /// Returns the retry-after duration if rate limited, or `None` if allowed.
    #[inline]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Limited { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// What is known about one client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// A registration from this IP is in progress, started at the instant.
    Reserved(Instant),

    /// The IP completed a registration at the instant.
    Registered(Instant),
}

impl Slot {
    fn since(&self) -> Instant {
        match self {
            Self::Reserved(at) | Self::Registered(at) => *at,
        }
    }
}

/// Thread-safe registration rate limiter keyed by client IP.
///
/// Clones share the same state, so one instance is created at startup and
/// handed to the router through [`crate::routes::AppState`].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<RwLock<RateLimiterInner>>,
}

#[derive(Debug)]
struct RateLimiterInner {
    slots: HashMap<String, Slot>,

    /// Minimum spacing between registrations from one IP.
    window: Duration,
}

impl RateLimiterInner {
    fn sweep(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| now.saturating_duration_since(slot.since()) < window);
        before - self.slots.len()
    }

    fn retry_after(&self, since: Instant, now: Instant) -> u64 {
        let remaining = self
            .window
            .saturating_sub(now.saturating_duration_since(since));
        (remaining.as_secs_f64().ceil() as u64).max(1)
    }
}

impl RateLimiter {
    /// Creates a new rate limiter with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RateLimiterInner {
                slots: HashMap::new(),
                window,
            })),
        }
    }

    /// Creates a new rate limiter using [`DEFAULT_WINDOW`].
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_WINDOW)
    }

    /// Checks whether `ip` may register at `now` and, if so, reserves it.
    ///
    /// While the reservation is held, further requests from `ip` are limited.
    /// Every `Allowed` must be followed by [`record`](Self::record) or
    /// [`release`](Self::release). Stale entries for all IPs are swept as a
    /// side effect.
    ///
    /// # Returns
    ///
    /// - `RateLimitResult::Allowed` if `ip` has no registration or reservation inside the window
    /// - `RateLimitResult::Limited { retry_after_secs }` otherwise, rounded up to the second.
    ///   For an in-progress reservation this is the full remaining window.
    pub async fn acquire(&self, ip: &str, now: Instant) -> RateLimitResult {
        let mut inner = self.inner.write().await;
        let removed = inner.sweep(now);
        if removed > 0 {
            tracing::debug!(removed_count = removed, "Swept expired registration entries");
        }

        if let Some(slot) = inner.slots.get(ip).copied() {
            return RateLimitResult::Limited {
                retry_after_secs: inner.retry_after(slot.since(), now),
            };
        }

        inner.slots.insert(ip.to_string(), Slot::Reserved(now));
        RateLimitResult::Allowed
    }

    /// Records a successful registration from `ip` at `at`.
    ///
    /// Replaces the reservation made by [`acquire`](Self::acquire). Keeps the
    /// later timestamp if `ip` is already registered, so the window never
    /// moves backwards.
    pub async fn record(&self, ip: &str, at: Instant) {
        let mut inner = self.inner.write().await;
        let at = match inner.slots.get(ip) {
            Some(Slot::Registered(last)) if *last > at => *last,
            _ => at,
        };
        inner.slots.insert(ip.to_string(), Slot::Registered(at));
    }

    /// Drops the reservation for `ip` after a failed attempt.
    ///
    /// A completed registration is left untouched.
    pub async fn release(&self, ip: &str) {
        let mut inner = self.inner.write().await;
        if let Some(Slot::Reserved(_)) = inner.slots.get(ip) {
            inner.slots.remove(ip);
        }
    }

    /// Removes entries older than the window.
    ///
    /// # Returns
    ///
    /// The number of entries that were removed.
    pub async fn cleanup_stale_entries(&self) -> usize {
        self.cleanup_stale_entries_at(Instant::now()).await
    }

    /// Removes entries that are older than the window as of `now`.
    pub async fn cleanup_stale_entries_at(&self, now: Instant) -> usize {
        self.inner.write().await.sweep(now)
    }

    /// Returns the current number of tracked IPs, reserved or registered.
    pub async fn source_count(&self) -> usize {
        self.inner.read().await.slots.len()
    }

    /// Spawns a background task that periodically sweeps expired entries.
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the spawned task. Abort it on shutdown.
    pub fn spawn_cleanup_task(&self, cleanup_interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                interval.tick().await;
                let removed = limiter.cleanup_stale_entries().await;
                if removed > 0 {
                    tracing::debug!(
                        removed_count = removed,
                        "Cleaned up stale rate limit entries"
                    );
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
