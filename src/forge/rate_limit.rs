//! GitHub API rate-limit bookkeeping.
//!
//! Every API response carries `X-RateLimit-Remaining` / `X-RateLimit-Reset`
//! (or the IETF draft `RateLimit-*` names).  The latest values are kept here
//! so that an exhausted quota can be reported to callers with a useful
//! `Retry-After`, and so that `/healthz` and `/metrics` can expose it.  The
//! service never sleeps on the limit itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Shared rate-limit state updated after every GitHub API response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining API calls in the current window, `u64::MAX` until observed.
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Whether any response has reported the limit yet.
    pub fn observed(&self) -> bool {
        self.remaining() != u64::MAX
    }

    /// `true` when the last response reported zero calls left and the window
    /// has not reset yet.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0 && self.retry_after_secs() > 0
    }

    /// Update state from HTTP response headers.
    ///
    /// api.github.com sends `X-RateLimit-*`.  GitHub Enterprise proxies and
    /// mock upstreams configured through `github.api_url` may send only the
    /// IETF `RateLimit-*` names, so both are read, the `X-` form winning.
    /// Absent or unparseable values leave the previous reading in place.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = headers
            .get("X-RateLimit-Remaining")
            .or_else(|| headers.get("RateLimit-Remaining"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let reset = headers
            .get("X-RateLimit-Reset")
            .or_else(|| headers.get("RateLimit-Reset"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
        }
        if let Some(r) = reset {
            self.reset_at.store(r, Ordering::Relaxed);
        }
        if remaining.is_some() || reset.is_some() {
            debug!(?remaining, ?reset, "rate limit updated");
        }
    }

    /// Seconds until the rate-limit window resets, or 0 if already reset.
    /// Used for `Retry-After` response headers.
    pub fn retry_after_secs(&self) -> u64 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.reset_at().saturating_sub(now)
    }
}
