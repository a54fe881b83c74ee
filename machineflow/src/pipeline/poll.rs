//! Bounded polling with backoff, used by steps that wait on the backend.
//!
//! The engine itself never polls; only steps such as "start machine" or
//! "wait for snapshot" block on a [`PollPolicy`].

use crate::errors::{ProvisionError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// How long and how often to probe a backend condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Give up after this long.
    pub timeout: Duration,
    /// Delay after the first unsuccessful probe.
    pub interval: Duration,
    /// Growth factor applied to the delay after each probe.
    pub multiplier: f64,
    /// Upper bound on a single delay.
    pub max_interval: Duration,
    /// Randomize each delay between half and the full value.
    pub jitter: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(5),
            multiplier: 1.5,
            max_interval: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl PollPolicy {
    /// Creates a fixed-interval policy.
    #[must_use]
    pub fn fixed(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            multiplier: 1.0,
            max_interval: interval,
            jitter: false,
        }
    }

    /// Sets the backoff multiplier and cap.
    #[must_use]
    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    /// Enables jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay to sleep after the given zero-based failed probe.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let base = self.interval.as_secs_f64() * factor;
        let capped = base.min(self.max_interval.as_secs_f64()).max(0.0);

        let secs = if self.jitter && capped > 0.0 {
            rand::thread_rng().gen_range(capped / 2.0..=capped)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Probes until `probe` reports true, the probe fails, or the policy times out.
///
/// Returns the number of probes made.
///
/// # Errors
///
/// Returns the probe's own error verbatim, or [`ProvisionError::Timeout`]
/// naming `what` once the policy's timeout has elapsed.
pub async fn wait_until<F, Fut>(policy: &PollPolicy, what: &str, mut probe: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if probe().await? {
            tracing::debug!(what, attempts = attempt, "Condition reached");
            return Ok(attempt);
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(ProvisionError::timeout(what, elapsed));
        }

        let delay = policy.delay_for(attempt - 1).min(policy.timeout - elapsed);
        tracing::trace!(what, attempt, delay_ms = delay.as_millis() as u64, "Condition not reached yet");
        tokio::time::sleep(delay).await;
    }
}
