//! Container lifecycle observer
//!
//! Follows the emulator container through `docker events` and seeds the
//! initial state with a one-time `docker inspect`. The event subscription is
//! restarted according to a [`RestartPolicy`] whenever it errors or exits
//! unexpectedly, for as long as the tracker is not disposed.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use crate::config::ContainerConfig;
use crate::error::CommandError;
use crate::process;
use crate::signal::ValueEmitter;
use crate::status::ContainerStatus;
use crate::utils::docker_cmd;

/// Raw JSON lines from the container runtime's event stream
pub type EventStream = BoxStream<'static, Result<String, CommandError>>;

/// Access to the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  /// Current `.State.Status` of the named container
  async fn inspect(&self, container: &str) -> Result<String, CommandError>;

  /// Subscribe to start/kill/die events of the named container
  ///
  /// The stream ends cleanly when the subscription closes gracefully and
  /// yields an error when it fails.
  async fn events(&self, container: &str) -> Result<EventStream, CommandError>;
}

/// [`ContainerRuntime`] backed by the docker CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerCli;

#[async_trait]
impl ContainerRuntime for DockerCli {
  async fn inspect(&self, container: &str) -> Result<String, CommandError> {
    let mut cmd = docker_cmd();
    cmd.args(["inspect", "--format", "{{.State.Status}}", container]);
    let output = process::exec(cmd).await?;
    Ok(output.stdout.trim().to_string())
  }

  async fn events(&self, container: &str) -> Result<EventStream, CommandError> {
    let container_filter = format!("container={container}");
    let child = docker_cmd()
      .args([
        "events",
        "--filter",
        container_filter.as_str(),
        "--filter",
        "event=start",
        "--filter",
        "event=kill",
        "--filter",
        "event=die",
        "--format",
        "json",
      ])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| CommandError::from_spawn("docker", e))?;

    child_lines(child, "docker events")
  }
}

/// Stream the stdout lines of `child`
///
/// Ends cleanly when the child exits successfully and yields a final
/// [`CommandError::Failed`] when it exits with an error.
fn child_lines(mut child: Child, command: &'static str) -> Result<EventStream, CommandError> {
  let stdout = child
    .stdout
    .take()
    .ok_or_else(|| CommandError::Io(std::io::Error::other(format!("{command} has no stdout"))))?;
  let lines = BufReader::new(stdout).lines();

  // The child travels with the stream so dropping the stream kills the process
  let stream = futures::stream::unfold(Some((child, lines)), move |state| async move {
    let (mut child, mut lines) = state?;
    match lines.next_line().await {
      Ok(Some(line)) => Some((Ok(line), Some((child, lines)))),
      Ok(None) => match child.wait().await {
        Ok(status) if status.success() => None,
        Ok(status) => Some((
          Err(CommandError::Failed {
            command: command.to_string(),
            code: status.code(),
            stderr: String::new(),
          }),
          None,
        )),
        Err(e) => Some((Err(CommandError::Io(e)), None)),
      },
      Err(e) => Some((Err(CommandError::Io(e)), None)),
    }
  });

  Ok(stream.boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EventAction {
  Start,
  Kill,
  Die,
}

#[derive(Debug, Deserialize)]
struct DockerEvent {
  #[serde(rename = "Action")]
  action: EventAction,
  #[serde(rename = "Actor")]
  actor: EventActor,
}

#[derive(Debug, Deserialize)]
struct EventActor {
  #[serde(rename = "Attributes")]
  attributes: ActorAttributes,
}

#[derive(Debug, Deserialize)]
struct ActorAttributes {
  name: String,
}

/// Map one event line to a status, dropping malformed or foreign events
fn parse_event(line: &str, container: &str) -> Option<ContainerStatus> {
  let line = line.trim();
  if line.is_empty() {
    return None;
  }
  let event: DockerEvent = match serde_json::from_str(line) {
    Ok(event) => event,
    Err(e) => {
      tracing::trace!("Dropping unrecognised docker event: {e}");
      return None;
    }
  };
  if event.actor.attributes.name != container {
    return None;
  }
  Some(match event.action {
    EventAction::Start => ContainerStatus::Running,
    EventAction::Kill => ContainerStatus::Stopping,
    EventAction::Die => ContainerStatus::Stopped,
  })
}

/// State of the event subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
  Listening,
  PendingRestart,
  /// Subscription ended for good (clean exit, docker missing, or retries exhausted)
  Finished,
  Disposed,
}

/// Publishes the emulator container's [`ContainerStatus`]
#[derive(Clone)]
pub struct ContainerStatusTracker {
  inner: Arc<Inner>,
}

struct Inner {
  config: ContainerConfig,
  runtime: Arc<dyn ContainerRuntime>,
  status: ValueEmitter<ContainerStatus>,
  listener: Mutex<ListenerState>,
  cancel: CancellationToken,
}

impl ContainerStatusTracker {
  /// Start listening for events and resolve the initial status
  ///
  /// Returns once the initial inspection finished or timed out, so
  /// [`status`](Self::status) is always set afterwards.
  pub async fn start(runtime: Arc<dyn ContainerRuntime>, config: ContainerConfig) -> Self {
    let tracker = Self {
      inner: Arc::new(Inner {
        config,
        runtime,
        status: ValueEmitter::new("container"),
        listener: Mutex::new(ListenerState::Listening),
        cancel: CancellationToken::new(),
      }),
    };

    let listener = tracker.inner.clone();
    tokio::spawn(async move { listener.listen().await });

    let initial = tracker.inspect().await;
    if tracker.inner.status.set_if_unset(initial) {
      tracing::debug!("Initial container status: {initial}");
    }

    tracker
  }

  /// Latest container status; `None` only before [`start`](Self::start) returns
  pub fn status(&self) -> Option<ContainerStatus> {
    self.inner.status.value()
  }

  pub fn on_change<F>(&self, callback: F)
  where
    F: Fn(&ContainerStatus) + Send + Sync + 'static,
  {
    self.inner.status.on_change(callback);
  }

  pub fn listener_state(&self) -> ListenerState {
    *self.inner.listener.lock()
  }

  /// Re-run the one-time inspection and publish its result
  pub async fn refresh(&self) -> ContainerStatus {
    let status = self.inspect().await;
    self.inner.status.set_value(status);
    status
  }

  /// Cancel any pending restart and terminate the subscription
  pub fn dispose(&self) {
    self.inner.cancel.cancel();
    *self.inner.listener.lock() = ListenerState::Disposed;
  }

  async fn inspect(&self) -> ContainerStatus {
    let config = &self.inner.config;
    match tokio::time::timeout(config.inspect_timeout, self.inner.runtime.inspect(&config.name)).await {
      Ok(Ok(state)) => ContainerStatus::from_inspect_state(&state),
      Ok(Err(e)) => {
        tracing::debug!("Failed to inspect container '{}': {e}", config.name);
        ContainerStatus::Stopped
      }
      Err(_) => {
        tracing::debug!("Inspecting container '{}' timed out", config.name);
        ContainerStatus::Stopped
      }
    }
  }
}

impl Inner {
  fn set_listener(&self, state: ListenerState) {
    let mut listener = self.listener.lock();
    if *listener != ListenerState::Disposed {
      *listener = state;
    }
  }

  async fn listen(&self) {
    let mut backoff = self.config.restart.backoff();

    loop {
      if self.cancel.is_cancelled() {
        return;
      }
      self.set_listener(ListenerState::Listening);
      tracing::debug!("Spawning 'docker events'...");

      let result = tokio::select! {
        () = self.cancel.cancelled() => return,
        result = self.consume(&mut backoff) => result,
      };

      match result {
        Ok(()) => {
          tracing::debug!("Process 'docker events' closed");
          self.set_listener(ListenerState::Finished);
          return;
        }
        Err(e) if e.is_not_found() => {
          tracing::error!("Failed to listen to docker container status changes: {e}");
          self.set_listener(ListenerState::Finished);
          return;
        }
        Err(e) => {
          let Some(delay) = backoff.next_delay() else {
            tracing::warn!(
              "Giving up on 'docker events' after {} attempts: {e}",
              backoff.attempts()
            );
            self.set_listener(ListenerState::Finished);
            return;
          };
          tracing::debug!("Process 'docker events' errored: {e}, restarting in {delay:?}");
          self.set_listener(ListenerState::PendingRestart);

          tokio::select! {
            () = self.cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
          }
        }
      }
    }
  }

  async fn consume(&self, backoff: &mut Backoff) -> Result<(), CommandError> {
    let mut events = self.runtime.events(&self.config.name).await?;
    while let Some(line) = events.next().await {
      let line = line?;
      backoff.reset();
      if let Some(status) = parse_event(&line, &self.config.name) {
        tracing::debug!("Container '{}' is now {status}", self.config.name);
        self.status.set_value(status);
      }
    }
    Ok(())
  }
}
