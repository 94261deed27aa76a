//! Exponential backoff around platform calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ForgeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay_ms: 1000,
      max_delay_ms: 60_000,
    }
  }
}

impl RetryPolicy {
  /// A policy that retries without sleeping.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      base_delay_ms: 0,
      max_delay_ms: 0,
    }
  }

  /// Delay before retry number `attempt` (1-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
  }

  /// Run `op`, retrying transient failures; the last error is returned once attempts run out.
  pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T, ForgeError>) -> Result<T, ForgeError> {
    let max = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match op() {
        Err(e) if e.is_transient() && attempt < max => {
          let delay = self.delay(attempt);
          warn!(operation = what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying platform call");
          if !delay.is_zero() {
            std::thread::sleep(delay);
          }
          attempt += 1;
        }
        other => return other,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delay_grows_and_caps() {
    let policy = RetryPolicy {
      max_attempts: 10,
      base_delay_ms: 100,
      max_delay_ms: 1000,
    };
    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(400));
    assert_eq!(policy.delay(8), Duration::from_millis(1000));
  }

  #[test]
  fn retries_transient_until_success() {
    let mut calls = 0;
    let result = RetryPolicy::immediate(3).run("test", || {
      calls += 1;
      if calls < 3 {
        Err(ForgeError::Transient("timeout".into()))
      } else {
        Ok(calls)
      }
    });
    assert_eq!(result.unwrap(), 3);
  }

  #[test]
  fn gives_up_after_max_attempts() {
    let mut calls = 0;
    let result: Result<(), _> = RetryPolicy::immediate(4).run("test", || {
      calls += 1;
      Err(ForgeError::RateLimited)
    });
    assert!(matches!(result, Err(ForgeError::RateLimited)));
    assert_eq!(calls, 4);
  }

  #[test]
  fn permanent_errors_are_not_retried() {
    let mut calls = 0;
    let result: Result<(), _> = RetryPolicy::immediate(4).run("test", || {
      calls += 1;
      Err(ForgeError::RepoNotFound("numpy-feedstock".into()))
    });
    assert!(matches!(result, Err(ForgeError::RepoNotFound(_))));
    assert_eq!(calls, 1);
  }
}
