//! Readiness gate: bounded retry with backoff until a probe succeeds.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{ConvergenceConfig, ReadinessConfig};
use crate::error::{HarnessError, Result};

/// Delay between probe attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt (milliseconds).
    pub initial_ms: u64,
    /// Upper bound for any single delay (milliseconds).
    pub max_ms: u64,
    /// Growth factor per failed attempt; 1 means a fixed interval.
    pub multiplier: u32,
}

impl BackoffPolicy {
    pub fn exponential(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms,
            multiplier: 2,
        }
    }

    pub fn fixed(interval_ms: u64) -> Self {
        Self {
            initial_ms: interval_ms,
            max_ms: interval_ms,
            multiplier: 1,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_ms.saturating_mul(factor).min(self.max_ms))
    }
}

impl From<&ReadinessConfig> for BackoffPolicy {
    fn from(cfg: &ReadinessConfig) -> Self {
        Self::exponential(cfg.initial_backoff_ms, cfg.max_backoff_ms)
    }
}

impl From<&ConvergenceConfig> for BackoffPolicy {
    fn from(cfg: &ConvergenceConfig) -> Self {
        Self::fixed(cfg.poll_interval_ms)
    }
}

/// How a successful wait went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyReport {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Call `probe` until it returns `Ok` or `deadline` elapses.
///
/// A failing probe means "not ready yet", never a fatal error on its own.
/// At least one attempt is always made, and a probe that hangs is cut off
/// at the deadline.
pub async fn retry_until<F, Fut, E>(
    target: &str,
    policy: &BackoffPolicy,
    deadline: Duration,
    mut probe: F,
) -> Result<ReadyReport>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let last_error;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_sub(start.elapsed());

        match tokio::time::timeout(remaining, probe()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed();
                debug!(what = %target, attempts, elapsed_ms = elapsed.as_millis() as u64, "Ready");
                return Ok(ReadyReport { attempts, elapsed });
            }
            Ok(Err(e)) => {
                debug!(what = %target, attempt = attempts, error = %e, "Not ready yet");
                let remaining = deadline.saturating_sub(start.elapsed());
                if remaining.is_zero() {
                    last_error = e.to_string();
                    break;
                }
                tokio::time::sleep(policy.delay(attempts).min(remaining)).await;
            }
            Err(_) => {
                last_error = "probe still pending at deadline".to_string();
                break;
            }
        }
    }

    Err(HarnessError::ReadinessTimeout {
        target: target.to_string(),
        attempts,
        elapsed_ms: start.elapsed().as_millis() as u64,
        last_error,
    })
}
