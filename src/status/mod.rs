//! Status values and the composite trackers that derive them
//!
//! - `emulator` - combines container and health state into [`EmulatorStatus`]
//! - `setup` - combines readiness checks into [`SetupStatus`]

mod emulator;
mod setup;

pub use emulator::{EmulatorStatusTracker, derive_emulator_status};
pub use setup::{NamedCheck, SetupStatusTracker, aggregate};

use serde::{Deserialize, Serialize};

/// Container state as reported by the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
  Running,
  Stopping,
  Stopped,
}

impl ContainerStatus {
  /// Map the output of `docker inspect --format {{.State.Status}}`
  pub fn from_inspect_state(state: &str) -> Self {
    match state.trim() {
      "created" | "restarting" | "running" => ContainerStatus::Running,
      "removing" => ContainerStatus::Stopping,
      _ => ContainerStatus::Stopped,
    }
  }

  pub fn is_running(self) -> bool {
    matches!(self, ContainerStatus::Running)
  }
}

impl std::fmt::Display for ContainerStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ContainerStatus::Running => write!(f, "running"),
      ContainerStatus::Stopping => write!(f, "stopping"),
      ContainerStatus::Stopped => write!(f, "stopped"),
    }
  }
}

/// Result of the most recent health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
  /// Polling is not armed, or no probe has completed yet
  #[default]
  Unknown,
  Healthy,
  Unhealthy,
}

impl HealthStatus {
  pub fn is_known(self) -> bool {
    !matches!(self, HealthStatus::Unknown)
  }
}

impl From<bool> for HealthStatus {
  fn from(healthy: bool) -> Self {
    if healthy {
      HealthStatus::Healthy
    } else {
      HealthStatus::Unhealthy
    }
  }
}

impl std::fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      HealthStatus::Unknown => write!(f, "unknown"),
      HealthStatus::Healthy => write!(f, "healthy"),
      HealthStatus::Unhealthy => write!(f, "unhealthy"),
    }
  }
}

/// Externally meaningful "is the emulator usable" status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmulatorStatus {
  Starting,
  Running,
  Stopping,
  Stopped,
}

impl EmulatorStatus {
  pub fn is_running(self) -> bool {
    matches!(self, EmulatorStatus::Running)
  }
}

impl std::fmt::Display for EmulatorStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EmulatorStatus::Starting => write!(f, "starting"),
      EmulatorStatus::Running => write!(f, "running"),
      EmulatorStatus::Stopping => write!(f, "stopping"),
      EmulatorStatus::Stopped => write!(f, "stopped"),
    }
  }
}

/// Outcome of a single readiness precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessCheck {
  /// Not determined yet; suppresses any aggregate decision
  #[default]
  Unknown,
  Ok,
  SetupRequired,
}

impl ReadinessCheck {
  pub fn is_known(self) -> bool {
    !matches!(self, ReadinessCheck::Unknown)
  }
}

impl From<bool> for ReadinessCheck {
  fn from(ok: bool) -> Self {
    if ok {
      ReadinessCheck::Ok
    } else {
      ReadinessCheck::SetupRequired
    }
  }
}

impl std::fmt::Display for ReadinessCheck {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ReadinessCheck::Unknown => write!(f, "unknown"),
      ReadinessCheck::Ok => write!(f, "ok"),
      ReadinessCheck::SetupRequired => write!(f, "setup_required"),
    }
  }
}

/// Conjunction of all readiness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStatus {
  Ok,
  SetupRequired,
}

impl std::fmt::Display for SetupStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SetupStatus::Ok => write!(f, "ok"),
      SetupStatus::SetupRequired => write!(f, "setup_required"),
    }
  }
}
