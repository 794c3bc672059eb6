//! Request rate limiting for the ledger endpoint, wrapping governor.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::trace;

const FALLBACK_REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// Caps JSON-RPC calls per second; callers wait for a permit.
pub struct RpcRateLimiter {
    limiter: DefaultDirectRateLimiter,
    requests_per_second: u32,
}

impl RpcRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(FALLBACK_REQUESTS_PER_SECOND);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            requests_per_second: per_second.get(),
        }
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            trace!(rps = self.requests_per_second, "Rate limit reached, waiting for permit");
            self.limiter.until_ready().await;
        }
    }
}
