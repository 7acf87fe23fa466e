use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Admits at most `calls` acquisitions in any `period`-long window.
///
/// Callers that would exceed the window wait for the oldest call to age out;
/// nothing is ever rejected.
#[derive(Debug)]
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    issued: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(calls: usize, period: Duration) -> Self {
        let calls = calls.max(1);
        Self {
            calls,
            period,
            issued: VecDeque::new(),
        }
    }

    /// When the next call may go out, or `None` if it may go out at `now`.
    pub fn ready_at(&self, now: Instant) -> Option<Instant> {
        if self.issued.len() < self.calls {
            return None;
        }
        let oldest = *self.issued.front()?;
        let release = oldest + self.period;
        (release > now).then_some(release)
    }

    pub async fn acquire(&mut self) {
        if let Some(release) = self.ready_at(Instant::now()) {
            debug!(
                wait_ms = release.saturating_duration_since(Instant::now()).as_millis() as u64,
                calls = self.calls,
                period_secs = self.period.as_secs(),
                "rate limit window full; waiting"
            );
            sleep_until(release).await;
        }
        let now = Instant::now();
        while let Some(front) = self.issued.front() {
            if *front + self.period <= now {
                self.issued.pop_front();
            } else {
                break;
            }
        }
        if self.issued.len() >= self.calls {
            self.issued.pop_front();
        }
        self.issued.push_back(now);
    }
}
