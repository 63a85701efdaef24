//! One-shot scheduler
//!
//! Coalesces a burst of triggers into a single run of a callback on the next
//! scheduler tick. This is what keeps N upstream events from turning into N
//! recomputations downstream.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;

type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
  Idle,
  Scheduled,
  Running,
  /// Triggered again while the callback was running
  Rerun,
}

/// Runs a callback once on the next tick, ignoring repeat triggers until it fires
///
/// Triggers that arrive while the callback is already running (including
/// while its future is pending) schedule exactly one follow-up run, so no
/// update is lost.
#[derive(Clone)]
pub struct ImmediateOnce {
  inner: Arc<Inner>,
}

struct Inner {
  task: Task,
  state: Mutex<RunState>,
  handle: Handle,
}

impl ImmediateOnce {
  /// Create a scheduler bound to the current tokio runtime
  ///
  /// Panics when called outside of a runtime; use [`ImmediateOnce::with_handle`]
  /// to bind explicitly.
  pub fn new<F, Fut>(callback: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Self::with_handle(Handle::current(), callback)
  }

  pub fn with_handle<F, Fut>(handle: Handle, callback: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Self {
      inner: Arc::new(Inner {
        task: Arc::new(move || callback().boxed()),
        state: Mutex::new(RunState::Idle),
        handle,
      }),
    }
  }

  /// Schedule the callback unless a run is already pending
  ///
  /// Safe to call from any thread, including non-runtime threads such as
  /// file watcher callbacks.
  pub fn trigger(&self) {
    let mut state = self.inner.state.lock();
    match *state {
      RunState::Idle => {
        *state = RunState::Scheduled;
        drop(state);
        self.spawn();
      }
      RunState::Running => *state = RunState::Rerun,
      RunState::Scheduled | RunState::Rerun => {}
    }
  }

  /// Whether a run is scheduled or in progress
  pub fn is_pending(&self) -> bool {
    *self.inner.state.lock() != RunState::Idle
  }

  fn spawn(&self) {
    let inner = self.inner.clone();
    self.inner.handle.spawn(async move {
      // Let the rest of the current burst land before running
      tokio::task::yield_now().await;
      loop {
        *inner.state.lock() = RunState::Running;
        (inner.task)().await;

        let mut state = inner.state.lock();
        if *state == RunState::Rerun {
          continue;
        }
        *state = RunState::Idle;
        break;
      }
    });
  }
}

impl std::fmt::Debug for ImmediateOnce {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ImmediateOnce")
      .field("state", &*self.inner.state.lock())
      .finish_non_exhaustive()
  }
}
