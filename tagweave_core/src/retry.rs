//! Retry-with-backoff for any async operation.
//!
//! ```ignore
//! let (outcome, attempts) = retry_with_backoff(
//!     &policy,
//!     |outcome: &SearchOutcome| RetryDecision::from_status(&outcome.status),
//!     |_attempt| async { adapter.search(tag, page, limit, false).await },
//! )
//! .await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::debug;

use crate::federated::FetchStatus;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

/// Fraction of the computed delay added or removed at random.
const JITTER_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 250ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per attempt (default: 2.0)
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Upper bound on any single delay (default: 5000ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `attempt` (1-based) failed.
    ///
    /// `min(max_delay, base * factor^(attempt-1))`, jittered, then raised to
    /// `floor` when the upstream asked for a longer wait.
    pub fn delay_for(&self, attempt: u32, floor: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let raw_ms = (self.base_delay_ms as f64) * self.factor.max(1.0).powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay_ms as f64);

        let jittered_ms = if self.jitter && capped_ms > 0.0 {
            let spread = capped_ms * JITTER_RATIO;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped_ms + offset).max(0.0)
        } else {
            capped_ms
        };

        let delay = Duration::from_millis(jittered_ms.round() as u64);
        match floor {
            Some(min) if min > delay => min,
            _ => delay,
        }
    }
}

/// What to do with an operation's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the output
    Done,
    /// Try again, waiting at least the given floor
    Retry { floor: Option<Duration> },
}

impl RetryDecision {
    /// Transient statuses retry; rate limits carry their backoff as the floor.
    pub fn from_status(status: &FetchStatus) -> Self {
        match status {
            FetchStatus::Transient(err) => RetryDecision::Retry {
                floor: err.suggested_backoff(),
            },
            FetchStatus::Ok | FetchStatus::Permanent(_) => RetryDecision::Done,
        }
    }
}

/// Run `operation` until `classify` accepts its output or attempts run out.
///
/// Returns the last output and the number of attempts made. The operation
/// receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut, C>(
    policy: &RetryPolicy,
    mut classify: C,
    mut operation: F,
) -> (T, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    C: FnMut(&T) -> RetryDecision,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let output = operation(attempt).await;

        match classify(&output) {
            RetryDecision::Done => return (output, attempt),
            RetryDecision::Retry { .. } if attempt >= max_attempts => {
                debug!(attempts = attempt, "retries exhausted");
                return (output, attempt);
            }
            RetryDecision::Retry { floor } => {
                let delay = policy.delay_for(attempt, floor);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Global concurrency ceiling plus retry policy for upstream calls.
///
/// Every attempt holds one permit for its duration only, so backoff sleeps
/// never occupy a slot. Clones share the same semaphore.
#[derive(Debug, Clone)]
pub struct RequestGate {
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl RequestGate {
    pub fn new(max_concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Same semaphore, different retry policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            semaphore: Arc::clone(&self.semaphore),
            policy,
        }
    }

    /// Run `operation` under the gate with retries.
    ///
    /// Returns `None` as output only if the semaphore was closed.
    pub async fn call<T, F, Fut, C>(&self, mut classify: C, mut operation: F) -> (Option<T>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        C: FnMut(&T) -> RetryDecision,
    {
        let semaphore = &self.semaphore;
        retry_with_backoff(
            &self.policy,
            |output: &Option<T>| match output {
                Some(value) => classify(value),
                None => RetryDecision::Done,
            },
            |attempt| {
                let call = operation(attempt);
                async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    Some(call.await)
                }
            },
        )
        .await
    }
}
