use super::StepError;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// One attempt, no delay: what a step without a declared policy gets.
    pub fn single() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `n + 1` (zero-based failed attempt `n`):
    /// base · factor^n, widened by up to `jitter` of itself.
    fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponential =
            self.base_delay_ms as f64 * self.factor.powi(failed_attempt as i32);
        let widened = if self.jitter > 0.0 {
            exponential * (1.0 + rand::thread_rng().gen_range(0.0..self.jitter))
        } else {
            exponential
        };
        Duration::from_millis(widened as u64)
    }
}

pub struct RetryOutcome {
    pub result: Result<Value, StepError>,
    pub retries: u32,
}

/// Runs the attempt closure under the policy. Denials and validation
/// failures short-circuit; only execution errors are worth repeating.
pub fn run_with_retry<F>(policy: &RetryPolicy, mut attempt: F) -> RetryOutcome
where
    F: FnMut() -> Result<Value, StepError>,
{
    let attempts = policy.attempts.max(1);
    let mut retries = 0;
    let mut last_error = None;
    for n in 0..attempts {
        match attempt() {
            Ok(output) => {
                return RetryOutcome {
                    result: Ok(output),
                    retries,
                }
            }
            Err(err) if !err.retryable() => {
                return RetryOutcome {
                    result: Err(err),
                    retries,
                }
            }
            Err(err) => {
                last_error = Some(err);
                if n + 1 < attempts {
                    thread::sleep(policy.delay_after(n));
                    retries += 1;
                }
            }
        }
    }
    RetryOutcome {
        result: Err(last_error.unwrap_or(StepError {
            kind: crate::tools::FailureKind::Exec,
            message: "attempt closure never ran".to_string(),
        })),
        retries,
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FailureKind;
    use serde_json::json;
    use std::time::Instant;

    #[test]
    fn succeeds_on_third_attempt_with_backoff() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay_ms: 10,
            factor: 2.0,
            jitter: 0.0,
        };
        let mut calls = 0;
        let mut gaps = Vec::new();
        let mut last = Instant::now();
        let outcome = run_with_retry(&policy, || {
            gaps.push(last.elapsed());
            last = Instant::now();
            calls += 1;
            if calls < 3 {
                Err(StepError {
                    kind: FailureKind::Exec,
                    message: "transient".to_string(),
                })
            } else {
                Ok(json!({"ok": true}))
            }
        });
        assert!(outcome.result.is_ok());
        assert_eq!(calls, 3);
        assert_eq!(outcome.retries, 2);
        assert!(gaps[1] >= Duration::from_millis(10));
        assert!(gaps[2] >= Duration::from_millis(20));
    }

    #[test]
    fn denials_do_not_retry() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay_ms: 1,
            factor: 1.0,
            jitter: 0.0,
        };
        let mut calls = 0;
        let outcome = run_with_retry(&policy, || {
            calls += 1;
            Err(StepError {
                kind: FailureKind::Denied,
                message: "Denied: path_outside_sandbox".to_string(),
            })
        });
        assert!(outcome.result.is_err());
        assert_eq!(calls, 1);
        assert_eq!(outcome.retries, 0);
    }

    #[test]
    fn exhaustion_returns_the_last_error() {
        let policy = RetryPolicy {
            attempts: 2,
            base_delay_ms: 1,
            factor: 1.0,
            jitter: 0.0,
        };
        let outcome = run_with_retry(&policy, || {
            Err(StepError {
                kind: FailureKind::Exec,
                message: "still down".to_string(),
            })
        });
        let err = outcome.result.expect_err("exhausted");
        assert!(err.message.contains("still down"));
        assert_eq!(outcome.retries, 1);
    }
}
