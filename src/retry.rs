use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// No waiting between attempts.
    None,
    /// Every attempt waits the base delay.
    Constant,
    /// The wait grows by the base delay per attempt.
    Linear,
    /// The wait doubles per attempt.
    Exponential,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffKind::None => write!(f, "none"),
            BackoffKind::Constant => write!(f, "constant"),
            BackoffKind::Linear => write!(f, "linear"),
            BackoffKind::Exponential => write!(f, "exponential"),
        }
    }
}

/// Retry policy for operations dispatched to the remote execution tier.
///
/// `iteration` arguments are 1-based: iteration 1 is the first retry
/// decision after the initial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RetryStrategyConfig", into = "RetryStrategyConfig")]
pub struct RetryStrategy {
    pub backoff: BackoffKind,
    pub delay: Duration,
    pub max_retries: Option<u32>,
    pub max_delay: Option<Duration>,
}

impl RetryStrategy {
    pub fn new(backoff: BackoffKind, delay: Duration) -> Self {
        Self {
            backoff,
            delay,
            max_retries: None,
            max_delay: None,
        }
    }

    /// A strategy that never retries.
    pub fn none() -> Self {
        Self::new(BackoffKind::None, Duration::ZERO).with_max_retries(0)
    }

    pub fn constant(delay: Duration) -> Self {
        Self::new(BackoffKind::Constant, delay)
    }

    pub fn linear(delay: Duration) -> Self {
        Self::new(BackoffKind::Linear, delay)
    }

    pub fn exponential(delay: Duration) -> Self {
        Self::new(BackoffKind::Exponential, delay)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Whether another attempt is allowed at `iteration`.
    ///
    /// Always true without a configured maximum; otherwise false once
    /// `iteration` reaches the maximum.
    pub fn can_retry(&self, iteration: u32) -> bool {
        match self.max_retries {
            Some(max) => iteration < max,
            None => true,
        }
    }

    /// Delay to wait before the attempt at `iteration`, clamped to `max_delay`.
    ///
    /// Exponential backoff uses `delay * 2^(iteration - 2)`, so iteration 2
    /// waits exactly the base delay and iteration 1 waits half of it.
    pub fn calculate_delay(&self, iteration: u32) -> Duration {
        let delay = match self.backoff {
            BackoffKind::None => Duration::ZERO,
            BackoffKind::Constant => self.delay,
            BackoffKind::Linear => self.delay.checked_mul(iteration).unwrap_or(Duration::MAX),
            BackoffKind::Exponential => {
                let exponent = i64::from(iteration) - 2;
                let factor = 2f64.powi(exponent.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32);
                Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor)
                    .unwrap_or(Duration::MAX)
            }
        };

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

// Configuration shape: durations as whole milliseconds.
#[derive(Serialize, Deserialize)]
struct RetryStrategyConfig {
    backoff: BackoffKind,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_delay_ms: Option<u64>,
}

impl From<RetryStrategyConfig> for RetryStrategy {
    fn from(config: RetryStrategyConfig) -> Self {
        Self {
            backoff: config.backoff,
            delay: Duration::from_millis(config.delay_ms),
            max_retries: config.max_retries,
            max_delay: config.max_delay_ms.map(Duration::from_millis),
        }
    }
}

impl From<RetryStrategy> for RetryStrategyConfig {
    fn from(strategy: RetryStrategy) -> Self {
        Self {
            backoff: strategy.backoff,
            delay_ms: u64::try_from(strategy.delay.as_millis()).unwrap_or(u64::MAX),
            max_retries: strategy.max_retries,
            max_delay_ms: strategy
                .max_delay
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} backoff, base {:?}", self.backoff, self.delay)?;
        if let Some(max) = self.max_retries {
            write!(f, ", max {max} retries")?;
        }
        if let Some(max) = self.max_delay {
            write!(f, ", capped at {max:?}")?;
        }
        Ok(())
    }
}
