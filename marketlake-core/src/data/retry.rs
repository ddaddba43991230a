//! Retry policy for source fetches, expressed as data.
//!
//! Attempt 1 runs immediately; attempt n > 1 waits `base_delay * multiplier^(n-2)`.
//! With the defaults that is 0s, 1s, 2s, 4s.

use super::provider::FetchError;
use std::time::Duration;

/// Blocks the calling thread between attempts. Swapped out in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub retryable: fn(&FetchError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            retryable: FetchError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Wait before the 1-based `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Non-retryable errors return as-is. Exhaustion wraps the last error in
    /// [`FetchError::RetriesExhausted`].
    pub fn run<T>(
        &self,
        sleeper: &dyn Sleeper,
        label: &str,
        mut op: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                sleeper.sleep(delay);
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if !(self.retryable)(&err) => return Err(err),
                Err(err) if attempt >= max => {
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::warn!(unit = label, attempt, error = %err, "transient failure, retrying");
                    attempt += 1;
                }
            }
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        if let Ok(mut d) = self.delays.lock() {
            d.push(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_immediate_then_doubling() {
        let p = RetryPolicy::default();
        let delays: Vec<u64> = (1..=4).map(|a| p.delay_before(a).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4]);
    }

    #[test]
    fn succeeds_on_third_attempt_after_one_and_two_seconds() {
        let sleeper = RecordingSleeper::new();
        let result = RetryPolicy::default().run(&sleeper, "t", |attempt| {
            if attempt < 3 {
                Err(FetchError::Transient("503".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn exhaustion_wraps_last_error() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::default().run(&sleeper, "t", |attempt| {
            calls += 1;
            Err(FetchError::Transient(format!("attempt {attempt}")))
        });
        assert_eq!(calls, 4);
        assert_eq!(
            result,
            Err(FetchError::RetriesExhausted {
                attempts: 4,
                last: Box::new(FetchError::Transient("attempt 4".into())),
            })
        );
        assert_eq!(sleeper.delays().len(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::default().run(&sleeper, "t", |_| {
            calls += 1;
            Err(FetchError::Permanent("404".into()))
        });
        assert_eq!(calls, 1);
        assert_eq!(result, Err(FetchError::Permanent("404".into())));
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn custom_predicate_controls_retry() {
        let policy = RetryPolicy {
            retryable: |_| false,
            ..RetryPolicy::default()
        };
        let sleeper = RecordingSleeper::new();
        let result: Result<(), _> =
            policy.run(&sleeper, "t", |_| Err(FetchError::Transient("x".into())));
        assert_eq!(result, Err(FetchError::Transient("x".into())));
    }
}
