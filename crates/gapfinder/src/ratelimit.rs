//! Per-owner rate limiting keyed by `(owner, action)`, built on `governor`.
//!
//! Limiter state lives in an injected keyed state store and time comes from
//! an injected [`Clock`], so nothing here depends on process-global state.
//! A quota of `max` events per `window` allows a burst of `max` and then
//! replenishes one slot every `window / max`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::Clock as GovernorClock;
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::keyed::{DashMapStateStore, KeyedStateStore, ShrinkableKeyedStateStore};
use governor::Quota;

use crate::clock::Clock;
use crate::config::RateLimitSettings;
use crate::error::{GapfinderError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub owner_id: String,
    pub action: String,
}

impl RateLimitKey {
    pub fn new(owner_id: &str, action: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            action: action.to_string(),
        }
    }
}

/// In-process store, one entry per key seen.
pub type InMemoryRateLimitStore = DashMapStateStore<RateLimitKey>;

/// Feeds an application [`Clock`] to governor as nanoseconds since the
/// limiter was built.
#[derive(Clone)]
pub struct LimiterClock {
    clock: Arc<dyn Clock>,
    origin: DateTime<Utc>,
}

impl LimiterClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let origin = clock.now();
        Self { clock, origin }
    }
}

impl GovernorClock for LimiterClock {
    type Instant = Nanos;

    fn now(&self) -> Nanos {
        let elapsed = (self.clock.now() - self.origin)
            .to_std()
            .unwrap_or_default();
        Nanos::from(elapsed)
    }
}

type KeyedLimiter<S> =
    governor::RateLimiter<RateLimitKey, S, LimiterClock, NoOpMiddleware<Nanos>>;

pub struct RateLimiter<S = InMemoryRateLimitStore>
where
    S: KeyedStateStore<RateLimitKey>,
{
    limiter: KeyedLimiter<S>,
    clock: LimiterClock,
}

fn quota(max_per_window: u32, window_secs: u64) -> Quota {
    let burst = NonZeroU32::new(max_per_window).unwrap_or(NonZeroU32::MIN);
    let window = Duration::from_secs(window_secs.max(1));
    let period = (window / burst.get()).max(Duration::from_nanos(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

impl<S> RateLimiter<S>
where
    S: KeyedStateStore<RateLimitKey>,
{
    pub fn new(store: S, clock: Arc<dyn Clock>, max_per_window: u32, window_secs: u64) -> Self {
        let clock = LimiterClock::new(clock);
        Self {
            limiter: governor::RateLimiter::new(
                quota(max_per_window, window_secs),
                store,
                clock.clone(),
            ),
            clock,
        }
    }

    pub fn from_settings(
        settings: &RateLimitSettings,
        store: S,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(store, clock, settings.max_submissions, settings.window_secs)
    }

    /// Counts one `action` for `owner_id`, or fails with `RateLimited` when
    /// the owner has no slot left. A denied attempt is not counted.
    pub fn check_and_record(&self, owner_id: &str, action: &str) -> Result<()> {
        let key = RateLimitKey::new(owner_id, action);
        match self.limiter.check_key(&key) {
            Ok(()) => {
                log::trace!("Rate limit ok for {}/{}", owner_id, action);
                Ok(())
            }
            Err(not_until) => {
                // Rounded up to whole seconds, at least 1.
                let wait = not_until.wait_time_from(self.clock.now());
                let retry_after_secs = (wait.as_millis().div_ceil(1000) as u64).max(1);
                log::warn!(
                    "Rate limit exceeded for {}/{}, retry in {}s",
                    owner_id,
                    action,
                    retry_after_secs
                );
                Err(GapfinderError::RateLimited {
                    action: action.to_string(),
                    retry_after_secs,
                })
            }
        }
    }
}

impl<S> RateLimiter<S>
where
    S: ShrinkableKeyedStateStore<RateLimitKey>,
{
    /// Drops keys whose limit has fully replenished. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}
