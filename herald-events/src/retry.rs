//! Bounded retry with exponential backoff.
//!
//! Every monitored async interaction (relay consumption, storage uploads)
//! runs through the same policy: a fixed attempt budget, a delay that
//! doubles between attempts, and an explicit per-attempt state machine with
//! exactly one terminal outcome. Exhaustion is handed to the caller's
//! designated recovery action - there is no dead-letter queue and no
//! unbounded retry.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier applied per retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

/// Per-attempt state of one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt has been made yet.
    Pending,
    /// `n` attempts have failed; another is due after the backoff delay.
    Retrying(u32),
    /// The attempt budget is spent; the recovery action runs next.
    Exhausted,
}

impl RetryState {
    /// Returns the number of failed attempts so far.
    #[must_use]
    pub const fn attempts_made(&self, max_attempts: u32) -> u32 {
        match self {
            Self::Pending => 0,
            Self::Retrying(n) => *n,
            Self::Exhausted => max_attempts,
        }
    }

    /// Advances the state after one failed attempt.
    #[must_use]
    pub const fn next(self, max_attempts: u32) -> Self {
        let failed = match self {
            Self::Pending => 1,
            Self::Retrying(n) => n + 1,
            Self::Exhausted => return Self::Exhausted,
        };
        if failed >= max_attempts {
            Self::Exhausted
        } else {
            Self::Retrying(failed)
        }
    }
}

/// Error returned when an operation ran out of attempts.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Name of the retried operation.
    pub task: String,
    /// Attempts made.
    pub attempts: u32,
    /// The last attempt's error.
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' exhausted after {} attempts: {}",
            self.task, self.attempts, self.last_error
        )
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for RetryExhausted<E> {}

/// Retry policy driving the state machine.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Returns the backoff delay applied before retry number `n`.
    ///
    /// Delay = initial_delay × multiplier^(n-1), capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        let millis = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(n as i32 - 1);
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Runs `op` through the retry state machine.
    ///
    /// `op` receives the 1-based attempt number. On success the value is
    /// returned; once the budget is spent the last error comes back wrapped
    /// in [`RetryExhausted`] for the caller's recovery action.
    pub async fn run<T, E, F, Fut>(&self, task: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut state = RetryState::Pending;
        loop {
            let attempt = state.attempts_made(self.max_attempts()) + 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    state = state.next(self.max_attempts());
                    if let RetryState::Retrying(failed) = state {
                        let delay = self.delay_for_attempt(failed);
                        warn!(
                            task = task,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(RetryExhausted {
                            task: task.to_string(),
                            attempts: attempt,
                            last_error: error,
                        });
                    }
                }
            }
        }
    }
}
