//! Retry policy for reconnecting watchers

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// How a failed subscription is retried
///
/// The default is a flat one second delay with no retry cap, which keeps the
/// container event listener alive for the whole session. Set `multiplier`
/// above 1 for exponential backoff and `max_retries` to give up eventually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
  #[serde(with = "duration_ms")]
  pub initial_delay: Duration,
  #[serde(with = "duration_ms")]
  pub max_delay: Duration,
  pub multiplier: u32,
  /// Consecutive failures tolerated before giving up, `None` retries forever
  pub max_retries: Option<u32>,
}

impl Default for RestartPolicy {
  fn default() -> Self {
    Self::fixed(Duration::from_secs(1))
  }
}

impl RestartPolicy {
  pub fn fixed(delay: Duration) -> Self {
    Self {
      initial_delay: delay,
      max_delay: delay,
      multiplier: 1,
      max_retries: None,
    }
  }

  pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
    Self {
      initial_delay,
      max_delay,
      multiplier: 2,
      max_retries: None,
    }
  }

  #[must_use]
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = Some(max_retries);
    self
  }

  /// Reject policies whose delays contradict each other
  pub fn validate(&self) -> anyhow::Result<()> {
    anyhow::ensure!(
      self.max_delay >= self.initial_delay,
      "max_delay ({:?}) is shorter than initial_delay ({:?})",
      self.max_delay,
      self.initial_delay
    );
    Ok(())
  }

  pub fn backoff(&self) -> Backoff {
    Backoff {
      policy: self.clone(),
      current: self.initial_delay,
      attempts: 0,
    }
  }
}

/// Running state of a [`RestartPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
  policy: RestartPolicy,
  current: Duration,
  attempts: u32,
}

impl Backoff {
  /// Delay before the next attempt, or `None` once retries are exhausted
  pub fn next_delay(&mut self) -> Option<Duration> {
    if self.policy.max_retries.is_some_and(|max| self.attempts >= max) {
      return None;
    }
    self.attempts += 1;
    let delay = self.current.min(self.policy.max_delay);
    self.current = self
      .current
      .checked_mul(self.policy.multiplier.max(1))
      .map_or(self.policy.max_delay, |next| next.min(self.policy.max_delay));
    Some(delay)
  }

  /// Forget previous failures after a successful connection
  pub fn reset(&mut self) {
    self.current = self.policy.initial_delay;
    self.attempts = 0;
  }

  pub fn attempts(&self) -> u32 {
    self.attempts
  }
}
