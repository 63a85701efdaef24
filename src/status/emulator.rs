//! Composite emulator status
//!
//! Combines the container lifecycle with the health poller into a single
//! [`EmulatorStatus`]. Health polling is only armed while it can change the
//! outcome: it starts when the container comes up and stops once the
//! emulator is confirmed running, unless `health.poll_while_running` keeps
//! it armed to catch a service crashing inside a live container.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{ContainerStatus, EmulatorStatus, HealthStatus};
use crate::signal::ValueEmitter;
use crate::watchers::{ContainerStatusTracker, HealthPoller};

/// Transition rules, evaluated in order
///
/// A running container that fails its health check is read as shutting
/// down when the emulator was already up, and as booting otherwise.
pub fn derive_emulator_status(
  container: ContainerStatus,
  health: HealthStatus,
  previous: Option<EmulatorStatus>,
) -> EmulatorStatus {
  match (container, health) {
    (ContainerStatus::Stopping, _) => EmulatorStatus::Stopping,
    (ContainerStatus::Stopped, _) => EmulatorStatus::Stopped,
    (ContainerStatus::Running, HealthStatus::Healthy) => EmulatorStatus::Running,
    (ContainerStatus::Running, _) => match previous {
      Some(EmulatorStatus::Running | EmulatorStatus::Stopping) => EmulatorStatus::Stopping,
      _ => EmulatorStatus::Starting,
    },
  }
}

#[derive(Debug, Default)]
struct Inputs {
  container: Option<ContainerStatus>,
  /// Last known probe result; `Unknown` only until the first probe after the container came up
  health: HealthStatus,
  disposed: bool,
}

/// Publishes the derived [`EmulatorStatus`]
#[derive(Clone)]
pub struct EmulatorStatusTracker {
  inner: Arc<Inner>,
}

struct Inner {
  container: ContainerStatusTracker,
  health: HealthPoller,
  status: ValueEmitter<EmulatorStatus>,
  inputs: Mutex<Inputs>,
}

impl EmulatorStatusTracker {
  pub fn new(container: &ContainerStatusTracker, health: HealthPoller) -> Self {
    let inner = Arc::new(Inner {
      container: container.clone(),
      health,
      status: ValueEmitter::new("emulator"),
      inputs: Mutex::new(Inputs::default()),
    });

    let weak = Arc::downgrade(&inner);
    inner.health.on_change(move |health| {
      if let Some(inner) = Weak::upgrade(&weak) {
        inner.apply_health(*health);
      }
    });

    let weak = Arc::downgrade(&inner);
    container.on_change(move |status| {
      if let Some(inner) = Weak::upgrade(&weak) {
        inner.apply_container(*status);
      }
    });

    Self { inner }
  }

  /// Latest derived status; `None` until the container status is known
  pub fn status(&self) -> Option<EmulatorStatus> {
    self.inner.status.value()
  }

  pub fn on_change<F>(&self, callback: F)
  where
    F: Fn(&EmulatorStatus) + Send + Sync + 'static,
  {
    self.inner.status.on_change(callback);
  }

  /// Optimistically treat the container as `status` until the observer reports otherwise
  pub fn force_container_status(&self, status: ContainerStatus) {
    tracing::debug!("Forcing container status to {status}");
    self.inner.apply_container(status);
  }

  /// Re-apply the observed container status, undoing an earlier override
  pub fn resync_container_status(&self) {
    if let Some(status) = self.inner.container.status() {
      self.inner.apply_container(status);
    }
  }

  /// Re-arm health polling while the emulator counts as running
  ///
  /// Polling is suspended once the emulator is running, so a crash that
  /// leaves the container up is only noticed after resuming. Hosts call this
  /// when they need a fresh verdict (before issuing requests, say); the
  /// poller stops again on the next healthy probe. Sessions configured with
  /// `health.poll_while_running` never suspend and do not need it.
  pub fn resume_health_checks(&self) {
    if self.inner.inputs.lock().disposed {
      return;
    }
    self.inner.health.start();
  }

  pub fn dispose(&self) {
    self.inner.inputs.lock().disposed = true;
    self.inner.health.stop();
  }
}

impl Inner {
  fn apply_container(&self, status: ContainerStatus) {
    let mut inputs = self.inputs.lock();
    if inputs.disposed {
      return;
    }
    let previous = inputs.container.replace(status);

    if status.is_running() {
      if previous != Some(ContainerStatus::Running) && self.status.value() != Some(EmulatorStatus::Running) {
        // A fresh container instance, earlier probe results no longer apply
        inputs.health = HealthStatus::Unknown;
        self.health.start();
      }
    } else {
      self.health.stop();
    }

    self.publish(&inputs);
  }

  fn apply_health(&self, health: HealthStatus) {
    // Unknown only means polling was stopped, which carries no new information
    if !health.is_known() {
      return;
    }
    let mut inputs = self.inputs.lock();
    if inputs.disposed {
      return;
    }
    inputs.health = health;
    self.publish(&inputs);
  }

  fn publish(&self, inputs: &Inputs) {
    let Some(container) = inputs.container else {
      return;
    };
    let previous = self.status.value();
    let next = derive_emulator_status(container, inputs.health, previous);
    if previous != Some(next) {
      tracing::info!("Emulator status: {next} (container {container}, health {})", inputs.health);
    }
    self.status.set_value(next);

    if next.is_running() && !self.health.polls_while_running() {
      self.health.stop();
    }
  }
}
