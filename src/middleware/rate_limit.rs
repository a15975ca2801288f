//! User-triggered sync rate limiting, one per five minutes per Connection
//! (§4.4 "Rate-limit policy").
//!
//! Same shape as the teacher's `RateLimitLayer` (a `parking_lot::Mutex`-
//! guarded map checked and updated under one lock) but keyed by
//! `connection_id` instead of `IpAddr`, and without the burst allowance —
//! scheduler-triggered syncs bypass this entirely, so there's no "extra
//! requests before hard reject" case to model.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct ConnectionRateLimiter {
    window: Duration,
    state: Arc<Mutex<HashMap<String, Instant>>>,
}

pub enum RateLimitCheck {
    Allowed,
    Exceeded { retry_after: Duration },
}

impl ConnectionRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self { window, state: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Checks and, if allowed, records the attempt in one call — callers
    /// must not check and record separately or two concurrent requests for
    /// the same connection could both pass.
    pub fn check_and_record(&self, connection_id: &str) -> RateLimitCheck {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(last) = state.get(connection_id) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.window {
                return RateLimitCheck::Exceeded { retry_after: self.window - elapsed };
            }
        }

        state.insert(connection_id.to_string(), now);
        RateLimitCheck::Allowed
    }

    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let window = self.window;
        let now = Instant::now();
        state.retain(|_, last| now.duration_since(*last) < window * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attempt_within_window_is_rejected() {
        let limiter = ConnectionRateLimiter::new(Duration::from_secs(300));
        assert!(matches!(limiter.check_and_record("c1"), RateLimitCheck::Allowed));
        assert!(matches!(limiter.check_and_record("c1"), RateLimitCheck::Exceeded { .. }));
    }

    #[test]
    fn different_connections_are_independent() {
        let limiter = ConnectionRateLimiter::new(Duration::from_secs(300));
        assert!(matches!(limiter.check_and_record("c1"), RateLimitCheck::Allowed));
        assert!(matches!(limiter.check_and_record("c2"), RateLimitCheck::Allowed));
    }
}
