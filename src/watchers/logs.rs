//! Container log follower
//!
//! Mirrors the emulator container's logs into tracing while it runs. A
//! `docker logs --follow` process starts whenever the container comes up and
//! is interrupted once the container has stopped or the follower is disposed.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::container::ContainerStatusTracker;
use crate::process::{self, SpawnOptions};
use crate::status::ContainerStatus;
use crate::utils::{create_cmd, docker_binary};

const LOG_LABEL: &str = "localstack.logs";

#[derive(Default)]
struct State {
  /// Generation and cancel handle of the live `docker logs` process
  current: Option<(u64, CancellationToken)>,
  generation: u64,
  disposed: bool,
}

/// Streams container logs for as long as the container is running
#[derive(Clone)]
pub struct ContainerLogFollower {
  inner: Arc<Inner>,
}

struct Inner {
  container: String,
  docker: PathBuf,
  state: Mutex<State>,
}

impl ContainerLogFollower {
  pub fn start(container: &ContainerStatusTracker, name: String) -> Self {
    Self::with_docker(container, name, docker_binary())
  }

  /// Like [`start`](Self::start) with an explicit docker binary
  pub fn with_docker(container: &ContainerStatusTracker, name: String, docker: PathBuf) -> Self {
    let inner = Arc::new(Inner {
      container: name,
      docker,
      state: Mutex::new(State::default()),
    });

    let weak = Arc::downgrade(&inner);
    container.on_change(move |status| {
      let Some(inner) = Weak::upgrade(&weak) else {
        return;
      };
      match status {
        ContainerStatus::Running => inner.follow(),
        ContainerStatus::Stopped => inner.stop(),
        ContainerStatus::Stopping => {}
      }
    });

    Self { inner }
  }

  pub fn is_following(&self) -> bool {
    self.inner.state.lock().current.is_some()
  }

  /// Interrupt the log process and ignore further container changes
  pub fn dispose(&self) {
    let mut state = self.inner.state.lock();
    state.disposed = true;
    if let Some((_, cancel)) = state.current.take() {
      cancel.cancel();
    }
  }
}

impl Inner {
  fn follow(self: &Arc<Self>) {
    let (generation, cancel) = {
      let mut state = self.state.lock();
      if state.disposed {
        return;
      }
      // A new container instance gets a fresh stream
      if let Some((_, previous)) = state.current.take() {
        previous.cancel();
      }
      state.generation += 1;
      let generation = state.generation;
      let cancel = CancellationToken::new();
      state.current = Some((generation, cancel.clone()));
      (generation, cancel)
    };

    let since = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_or(0, |d| d.as_secs())
      .to_string();
    let mut cmd = create_cmd(&self.docker);
    cmd.args(["logs", self.container.as_str(), "--follow", "--since", since.as_str()]);
    tracing::debug!("Following logs of container '{}'", self.container);

    let weak = Arc::downgrade(self);
    tokio::spawn(async move {
      let options = SpawnOptions {
        label: LOG_LABEL.to_string(),
        cancel,
        abort_marker: None,
      };
      match process::spawn(cmd, options).await {
        Ok(outcome) => tracing::debug!("Container log stream ended ({outcome:?})"),
        Err(e) => tracing::debug!("Container log stream failed: {e}"),
      }

      if let Some(inner) = weak.upgrade() {
        let mut state = inner.state.lock();
        if state.current.as_ref().is_some_and(|(current, _)| *current == generation) {
          state.current = None;
        }
      }
    });
  }

  fn stop(&self) {
    if let Some((_, cancel)) = self.state.lock().current.take() {
      tracing::debug!("Stopped following logs of container '{}'", self.container);
      cancel.cancel();
    }
  }
}
