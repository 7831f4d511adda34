//! Retry and backoff decisions.
//!
//! The policy is the single place that decides whether a failure is worth
//! another attempt. HTTP 401 never reaches it: the API core answers a 401
//! with one re-authentication and replay of its own.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::SwitchError;

/// Default number of attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default exponential growth factor.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default upper bound of the random jitter, as a fraction of the delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Cap on the computed delay (before jitter).
    pub max_delay: Duration,
    /// Jitter is uniform in `[0, jitter_ratio * delay]`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then dispatch again.
    Retry(Duration),
    /// Stop and report the failure.
    GiveUp,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the attempt budget (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter ratio, clamped to `[0, 1]`. NaN disables jitter.
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        self
    }

    /// `min(initial_delay * backoff_factor^retry_index, max_delay)`, no jitter.
    ///
    /// `retry_index` is 0 for the wait after the first failed attempt.
    pub fn base_delay(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Base delay plus uniform jitter.
    pub fn delay_with_jitter(&self, retry_index: u32) -> Duration {
        let base = self.base_delay(retry_index);
        let ratio = if self.jitter_ratio.is_finite() {
            self.jitter_ratio.min(1.0)
        } else {
            0.0
        };
        if ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=ratio);
        base + base.mul_f64(jitter)
    }

    /// Decides whether the attempt numbered `attempt` (1-based) that failed
    /// with `error` should be followed by another one.
    ///
    /// `retry_after` is a server hint (HTTP `Retry-After`); the wait is never
    /// shorter than the hint, but the hint is capped at `max_delay`.
    pub fn decide(
        &self,
        error: &SwitchError,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.delay_with_jitter(attempt.saturating_sub(1));
        if let Some(hint) = retry_after {
            delay = delay.max(hint.min(self.max_delay));
        }
        RetryDecision::Retry(delay)
    }
}

/// Parses a numeric `Retry-After` header.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Per-call retry bookkeeping. Never shared between calls.
#[derive(Debug, Default)]
pub struct RetryContext {
    attempts: u32,
    waited: Duration,
    errors: Vec<SwitchError>,
}

impl RetryContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a counted attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Undoes the count of an attempt that was answered with a 401; the
    /// re-authentication replay does not consume the retry budget.
    pub fn forgive_attempt(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
    }

    /// Number of counted attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Total time spent sleeping between attempts.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Failures observed so far, oldest first.
    pub fn errors(&self) -> &[SwitchError] {
        &self.errors
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, error: SwitchError) {
        self.errors.push(error);
    }

    /// Records a backoff sleep.
    pub fn record_wait(&mut self, delay: Duration) {
        self.waited += delay;
    }

    /// Consumes the context into the final "gave up" error.
    pub fn into_exhausted(mut self) -> SwitchError {
        let last = self.errors.pop().unwrap_or_else(|| {
            SwitchError::invalid_argument("retry context closed without any recorded failure")
        });
        SwitchError::RequestFailedAfterRetries {
            attempts: self.attempts,
            last: Box::new(last),
        }
    }
}
