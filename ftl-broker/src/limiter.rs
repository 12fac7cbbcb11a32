use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota};

/// Request throttle shared by every account a snapshot source serves.
///
/// Clones share the same budget.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    pub fn direct(quota: Quota) -> Self {
        Self {
            inner: Arc::new(DefaultDirectRateLimiter::direct(quota)),
        }
    }

    /// Quota allowing `requests` calls per second, or `None` when zero.
    pub fn per_second(requests: u32) -> Option<Quota> {
        NonZeroU32::new(requests).map(Quota::per_second)
    }

    /// Wait until the next request fits in the budget.
    pub async fn until_ready(&self) {
        self.inner.until_ready().await;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
