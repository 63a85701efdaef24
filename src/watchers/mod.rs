//! Leaf observers of the outside world
//!
//! Each watcher owns one source of truth and republishes it through a
//! [`ValueEmitter`](crate::signal::ValueEmitter).
//!
//! - `container` - follows the emulator container via `docker events` and `docker inspect`
//! - `health` - polls the emulator's health endpoint while armed
//! - `logs` - mirrors container logs into tracing while the container runs
//! - `files` - re-runs a readiness check when watched files change
//! - `backoff` - retry policy for reconnecting subscriptions

mod backoff;
mod container;
mod files;
mod health;
mod logs;

pub use backoff::{Backoff, RestartPolicy};
pub use container::{ContainerRuntime, ContainerStatusTracker, DockerCli, EventStream, ListenerState};
pub use files::FileStatusWatcher;
pub use health::{HealthPoller, HealthProbe, HttpHealthProbe};
pub use logs::ContainerLogFollower;

#[cfg(test)]
pub(crate) use container::tests::{FakeRuntime, event};
#[cfg(test)]
pub(crate) use health::tests::FakeProbe;
