//! Two-tier rate limiting for externally triggered job operations.
//!
//! Every start, cancel, and clear request must pass a global token bucket
//! shared by all callers and then a per-session bucket keyed by an opaque
//! session id. A rejection aborts the operation before any state changes.

use std::{fmt, num::NonZeroU32, sync::Arc, time::Duration};

use governor::{
    clock::{Clock, DefaultClock},
    DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota,
};
use thiserror::Error;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Session,
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitScope::Global => f.write_str("global"),
            RateLimitScope::Session => f.write_str("session"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limited ({scope}); retry after {retry_after_secs}s")]
pub struct RateLimitError {
    pub scope: RateLimitScope,
    pub retry_after_secs: u64,
}

impl RateLimitError {
    fn after(scope: RateLimitScope, wait: Duration) -> Self {
        RateLimitError { scope, retry_after_secs: wait.as_secs() + 1 }
    }
}

/// Admission check consulted by the lifecycle controller.
pub trait RateLimiter: Send + Sync {
    fn check(&self, session_id: &str) -> Result<(), RateLimitError>;

    /// Drop state for sessions that have gone idle. Returns the number of
    /// sessions still tracked. Called periodically by [`spawn_cleanup_task`].
    fn cleanup(&self) -> usize {
        0
    }
}

/// Spawn a background task that calls [`RateLimiter::cleanup`] every
/// `interval`. Abort the returned handle to stop it.
pub fn spawn_cleanup_task<R>(limiter: Arc<R>, interval: Duration) -> tokio::task::JoinHandle<()>
where
    R: RateLimiter + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let tracked = limiter.cleanup();
            tracing::trace!(tracked, "rate limiter cleanup");
        }
    })
}

/// Admits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn check(&self, _session_id: &str) -> Result<(), RateLimitError> {
        Ok(())
    }
}

/// Token-bucket limiter: one global bucket plus one bucket per session.
#[derive(Clone)]
pub struct TokenBucketLimiter {
    inner: Option<Arc<Buckets>>,
}

struct Buckets {
    global: DefaultDirectRateLimiter,
    sessions: DefaultKeyedRateLimiter<String>,
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl TokenBucketLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return TokenBucketLimiter { inner: None };
        }

        let burst = non_zero(config.burst_size);
        let global_quota = Quota::per_minute(non_zero(config.global_per_minute))
            .allow_burst(non_zero(config.burst_size.saturating_mul(4)));
        let session_quota = Quota::per_minute(non_zero(config.session_per_minute)).allow_burst(burst);

        TokenBucketLimiter {
            inner: Some(Arc::new(Buckets {
                global: governor::RateLimiter::direct(global_quota),
                sessions: governor::RateLimiter::keyed(session_quota),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

}

impl fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketLimiter").field("enabled", &self.is_enabled()).finish()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, session_id: &str) -> Result<(), RateLimitError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let clock = DefaultClock::default();

        if let Err(not_until) = inner.global.check() {
            tracing::warn!("global rate limit exceeded");
            return Err(RateLimitError::after(RateLimitScope::Global, not_until.wait_time_from(clock.now())));
        }

        if let Err(not_until) = inner.sessions.check_key(&session_id.to_string()) {
            tracing::warn!(session_id, "session rate limit exceeded");
            return Err(RateLimitError::after(RateLimitScope::Session, not_until.wait_time_from(clock.now())));
        }

        Ok(())
    }

    /// Drops per-session buckets that have fully refilled.
    fn cleanup(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };
        inner.sessions.retain_recent();
        inner.sessions.shrink_to_fit();
        inner.sessions.len()
    }
}
