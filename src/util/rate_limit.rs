//! Rate limiting utilities

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Limiter {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Inbound frame limiter owned by one websocket session
pub struct InputRateLimiter {
    limiter: Limiter,
    dropped: u64,
}

impl InputRateLimiter {
    pub fn new(frames_per_second: u32) -> Self {
        Self {
            limiter: create_limiter(frames_per_second),
            dropped: 0,
        }
    }

    /// Check if a frame is allowed (returns true if allowed)
    pub fn check(&mut self) -> bool {
        let allowed = self.limiter.check().is_ok();
        if !allowed {
            self.dropped += 1;
        }
        allowed
    }

    /// Frames refused so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_beyond_quota_is_refused() {
        let mut limiter = InputRateLimiter::new(5);
        let allowed = (0..20).filter(|_| limiter.check()).count();
        assert_eq!(allowed, 5);
        assert_eq!(limiter.dropped(), 15);
    }

    #[test]
    fn zero_rate_still_admits_one() {
        let mut limiter = InputRateLimiter::new(0);
        assert!(limiter.check());
    }
}
