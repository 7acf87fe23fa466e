//! Retry and backoff policy shared by every call the client makes.
//!
//! Three classes of response are treated differently:
//!
//! - `429` is retried after `Retry-After` (or a default delay), up to an
//!   optional ceiling.
//! - statuses in the retryable set (5xx by default) and transport errors are
//!   retried with backoff up to `max_attempts`.
//! - `403` is never retried, whatever the retryable set says.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// `step * attempt`
    Linear { step: Duration },
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(multiplier).min(*max)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed for retryable statuses and transport errors, first try included.
    pub max_attempts: u32,
    /// Maximum number of 429 retries; `None` retries forever.
    pub rate_limit_retries: Option<u32>,
    pub retryable_statuses: Vec<u16>,
    pub backoff: Backoff,
    /// Used for 429 responses that carry no `Retry-After` header.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            rate_limit_retries: Some(4),
            retryable_statuses: vec![500, 502, 503, 504],
            backoff: Backoff::Exponential {
                base: Duration::from_millis(1500),
                max: Duration::from_secs(60),
            },
            default_retry_after: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_rate_limit_retries(mut self, retries: Option<u32>) -> Self {
        self.rate_limit_retries = retries;
        self
    }

    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_default_retry_after(mut self, delay: Duration) -> Self {
        self.default_retry_after = delay;
        self
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        status != 403 && status != 429 && self.retryable_statuses.contains(&status)
    }

    /// Whether another 429 retry is allowed after `retries_so_far` retries.
    pub fn may_retry_rate_limit(&self, retries_so_far: u32) -> bool {
        match self.rate_limit_retries {
            Some(ceiling) => retries_so_far < ceiling,
            None => true,
        }
    }

    pub fn may_retry_attempt(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    pub fn rate_limit_delay(&self, headers: &HeaderMap) -> Duration {
        retry_after(headers).unwrap_or(self.default_retry_after)
    }
}

/// Parses `Retry-After` given in (possibly fractional) seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds = raw.parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}
