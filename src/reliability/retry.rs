use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    #[serde(rename = "exponential")]
    ExponentialBackoff,
    #[serde(rename = "linear")]
    LinearBackoff,
    #[serde(rename = "fixed")]
    FixedDelay,
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exponential" => Ok(RetryStrategy::ExponentialBackoff),
            "linear" => Ok(RetryStrategy::LinearBackoff),
            "fixed" => Ok(RetryStrategy::FixedDelay),
            other => Err(format!(
                "unknown retry strategy '{other}' (expected exponential, linear or fixed)"
            )),
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetryStrategy::ExponentialBackoff => "exponential",
            RetryStrategy::LinearBackoff => "linear",
            RetryStrategy::FixedDelay => "fixed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on the sum of all backoff sleeps for one operation.
    pub max_total_backoff: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_total_backoff: Duration::from_secs(120),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Returned when every attempt allowed by the policy failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Bounded retry with backoff, shared by the delivery writer and the error router.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, RetryError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay;
        let delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(multiplier)
            }
            RetryStrategy::LinearBackoff => base.saturating_mul(attempt.saturating_add(1)),
            RetryStrategy::FixedDelay => base,
        };

        let capped = delay.min(self.config.max_delay);
        if self.config.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }

    /// The sleep before the next attempt, or `None` when the attempt count or
    /// the total backoff budget is used up.
    pub fn next_delay(&self, attempts_made: u32, backoff_spent: Duration) -> Option<Duration> {
        if attempts_made >= self.config.max_attempts {
            return None;
        }
        let delay = self.calculate_delay(attempts_made.saturating_sub(1));
        if backoff_spent + delay > self.config.max_total_backoff {
            return None;
        }
        Some(delay)
    }

    /// Runs `operation` until it succeeds or the policy gives up. The closure
    /// receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 0;
        let mut spent = Duration::ZERO;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.next_delay(attempt, spent) {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed: {}; retrying",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    spent += delay;
                }
                None => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }
            }
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_factor = rng.random_range(0.5..1.5);
    delay.mul_f64(jitter_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(strategy: RetryStrategy) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_total_backoff: Duration::from_secs(10),
            strategy,
            jitter: false,
        })
        .unwrap()
    }

    #[test]
    fn test_delays_per_strategy() {
        let exp = policy(RetryStrategy::ExponentialBackoff);
        assert_eq!(exp.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(exp.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(exp.calculate_delay(2), Duration::from_millis(350));
        assert_eq!(exp.calculate_delay(40), Duration::from_millis(350));

        let linear = policy(RetryStrategy::LinearBackoff);
        assert_eq!(linear.calculate_delay(1), Duration::from_millis(200));

        let fixed = policy(RetryStrategy::FixedDelay);
        assert_eq!(fixed.calculate_delay(3), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: true,
            strategy: RetryStrategy::FixedDelay,
            base_delay: Duration::from_millis(1000),
            ..RetryConfig::default()
        })
        .unwrap();
        for _ in 0..50 {
            let delay = policy.calculate_delay(0);
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_budget_stops_early() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            max_total_backoff: Duration::from_millis(2500),
            strategy: RetryStrategy::FixedDelay,
            jitter: false,
        })
        .unwrap();
        assert!(policy.next_delay(1, Duration::ZERO).is_some());
        assert!(policy.next_delay(2, Duration::from_secs(1)).is_some());
        assert!(policy.next_delay(3, Duration::from_secs(2)).is_none());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(RetryPolicy::new(config).is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Linear".parse::<RetryStrategy>(), Ok(RetryStrategy::LinearBackoff));
        assert!("random".parse::<RetryStrategy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_counts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Exhausted<String>> = policy(RetryStrategy::FixedDelay)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unavailable".to_string()) }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_succeeds_after_failures() {
        let result = policy(RetryStrategy::ExponentialBackoff)
            .execute(|attempt| async move {
                if attempt < 3 { Err("busy") } else { Ok(attempt) }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }
}
