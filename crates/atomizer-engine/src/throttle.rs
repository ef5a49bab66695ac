//! Extraction call throttling
//!
//! Two mechanisms bound the load on the model provider: a call quota
//! (a burst of `batch_size` calls, refilled over `batch_delay`) and
//! exponential backoff when the provider pushes back. Both block the replay
//! thread; nothing is queued.

use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::extractor::ExtractError;

type CallLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limits extractor calls to `batch_size` per `batch_delay`.
///
/// A full batch may go out back to back; after that one slot comes back
/// every `batch_delay / batch_size`. A zero delay disables the quota.
pub struct Throttle {
    limiter: Option<CallLimiter>,
    clock: DefaultClock,
}

impl Throttle {
    pub fn new(batch_size: usize, batch_delay: Duration) -> Self {
        let burst = u32::try_from(batch_size)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);
        let limiter = Quota::with_period(batch_delay / burst.get())
            .map(|quota| RateLimiter::direct(quota.allow_burst(burst)));
        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    /// Blocks until the quota has a free call slot and claims it.
    /// Returns how long the caller was paused.
    pub fn acquire(&self) -> Duration {
        let Some(limiter) = &self.limiter else {
            return Duration::ZERO;
        };
        let mut waited = Duration::ZERO;
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            log::debug!("Extractor call quota used up, pausing {:?}", wait);
            thread::sleep(wait);
            waited += wait;
        }
        waited
    }
}

/// Exponential backoff schedule: base, 2*base, 4*base, ...
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. `op` receives the 1-based attempt number.
pub fn retry_with_backoff<T, F>(backoff: &Backoff, mut op: F) -> Result<T, ExtractError>
where
    F: FnMut(u32) -> Result<T, ExtractError>,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                let retry = attempt - 1;
                if retry >= backoff.max_retries {
                    return Err(ExtractError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                let delay = backoff.delay(retry);
                log::warn!(
                    "{} (attempt {}/{}), retrying in {:?}",
                    e,
                    attempt,
                    backoff.max_retries + 1,
                    delay
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let backoff = Backoff::new(Duration::from_secs(5), 5);
        let delays: Vec<_> = (0..5).map(|r| backoff.delay(r).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80]);
    }

    #[test]
    fn test_backoff_saturates() {
        let backoff = Backoff::new(Duration::from_secs(5), 100);
        assert_eq!(backoff.delay(64), Duration::from_secs(5).saturating_mul(u32::MAX));
    }

    #[test]
    fn test_retry_until_success() {
        let backoff = Backoff::new(Duration::ZERO, 5);
        let result = retry_with_backoff(&backoff, |attempt| {
            if attempt < 3 {
                Err(ExtractError::RateLimited("429".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_retry_exhausts_budget() {
        let backoff = Backoff::new(Duration::ZERO, 2);
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&backoff, |_| {
            calls += 1;
            Err(ExtractError::RateLimited("429".into()))
        });
        assert_eq!(calls, 3);
        assert!(matches!(result, Err(ExtractError::Exhausted { attempts: 3, .. })));
    }

    #[test]
    fn test_retry_stops_on_fatal_error() {
        let backoff = Backoff::new(Duration::ZERO, 5);
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&backoff, |_| {
            calls += 1;
            Err(ExtractError::Rejected { status: 400, body: "bad".into() })
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(ExtractError::Rejected { .. })));
    }

    #[test]
    fn test_throttle_without_delay_never_waits() {
        let throttle = Throttle::new(2, Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(throttle.acquire(), Duration::ZERO);
        }
    }

    #[test]
    fn test_throttle_pauses_after_full_batch() {
        let throttle = Throttle::new(2, Duration::from_millis(200));
        assert_eq!(throttle.acquire(), Duration::ZERO);
        assert_eq!(throttle.acquire(), Duration::ZERO);

        let waited = throttle.acquire();
        assert!(waited > Duration::ZERO);
        assert!(waited <= Duration::from_millis(200), "waited {:?}", waited);
    }
}
