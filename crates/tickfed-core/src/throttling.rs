use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-source request budget expressed as calls per minute.
///
/// A call that finds the budget empty is turned into a retryable
/// `RateLimited` error by the managed source, so the retry backoff absorbs
/// short bursts without a separate queue.
pub struct RateBudget {
    limiter: DirectRateLimiter,
    clock: DefaultClock,
    per_minute: u32,
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

impl RateBudget {
    pub fn per_minute(limit: u32) -> Self {
        let clock = DefaultClock::default();
        let quota = quota_from_window(Duration::from_secs(60), limit);
        Self {
            limiter: RateLimiter::direct_with_clock(quota, &clock),
            clock,
            per_minute: limit.max(1),
        }
    }

    /// Takes one unit of budget, or returns how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    pub fn limit(&self) -> u32 {
        self.per_minute
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(safe_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
