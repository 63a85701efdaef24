//! Composite setup readiness
//!
//! Folds the readiness checks (CLI, AWS profile, authentication, license)
//! into one [`SetupStatus`]. Nothing is published while any check is still
//! unknown, so a half-initialized session never reports a premature verdict.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{ReadinessCheck, SetupStatus};
use crate::signal::{ImmediateOnce, ValueEmitter};
use crate::watchers::FileStatusWatcher;

/// A readiness check together with the name it is reported under
#[derive(Clone)]
pub struct NamedCheck {
  pub name: &'static str,
  pub watcher: FileStatusWatcher,
}

impl NamedCheck {
  pub fn new(watcher: FileStatusWatcher) -> Self {
    Self {
      name: watcher.name(),
      watcher,
    }
  }
}

/// `None` while any check is unknown, otherwise the conjunction of all checks
pub fn aggregate<I>(checks: I) -> Option<SetupStatus>
where
  I: IntoIterator<Item = ReadinessCheck>,
{
  let mut setup_required = false;
  for check in checks {
    match check {
      ReadinessCheck::Unknown => return None,
      ReadinessCheck::SetupRequired => setup_required = true,
      ReadinessCheck::Ok => {}
    }
  }
  Some(if setup_required {
    SetupStatus::SetupRequired
  } else {
    SetupStatus::Ok
  })
}

/// Publishes the aggregated [`SetupStatus`]
#[derive(Clone)]
pub struct SetupStatusTracker {
  inner: Arc<Inner>,
}

struct Inner {
  checks: Vec<NamedCheck>,
  status: ValueEmitter<SetupStatus>,
  schedule: ImmediateOnce,
  cancel: CancellationToken,
}

impl SetupStatusTracker {
  /// Aggregate `checks`, re-running each of them every `recheck_interval`
  pub fn start(checks: Vec<NamedCheck>, recheck_interval: Duration) -> Self {
    let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
      let weak = weak.clone();
      Inner {
        checks,
        status: ValueEmitter::new("setup"),
        schedule: ImmediateOnce::new(move || {
          let inner = weak.upgrade();
          async move {
            if let Some(inner) = inner {
              inner.recompute();
            }
          }
        }),
        cancel: CancellationToken::new(),
      }
    });

    for check in &inner.checks {
      let weak = Arc::downgrade(&inner);
      check.watcher.on_change(move |_| {
        if let Some(inner) = weak.upgrade() {
          inner.schedule.trigger();
        }
      });
    }

    let periodic = Arc::downgrade(&inner);
    let cancel = inner.cancel.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(recheck_interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // The first tick completes immediately and the checks already ran on start
      ticker.tick().await;
      loop {
        tokio::select! {
          () = cancel.cancelled() => return,
          _ = ticker.tick() => {}
        }
        let Some(inner) = periodic.upgrade() else {
          return;
        };
        for check in &inner.checks {
          check.watcher.recheck();
        }
      }
    });

    inner.schedule.trigger();
    Self { inner }
  }

  /// Latest aggregate; `None` until every check has resolved once
  pub fn status(&self) -> Option<SetupStatus> {
    self.inner.status.value()
  }

  /// Snapshot of each individual check
  pub fn statuses(&self) -> Vec<(&'static str, ReadinessCheck)> {
    self
      .inner
      .checks
      .iter()
      .map(|check| (check.name, check.watcher.status()))
      .collect()
  }

  pub fn on_change<F>(&self, callback: F)
  where
    F: Fn(&SetupStatus) + Send + Sync + 'static,
  {
    self.inner.status.on_change(callback);
  }

  /// Stop periodic checks and close every file watcher
  pub fn dispose(&self) {
    self.inner.cancel.cancel();
    for check in &self.inner.checks {
      check.watcher.dispose();
    }
  }
}

impl Inner {
  fn recompute(&self) {
    let Some(status) = aggregate(self.checks.iter().map(|check| check.watcher.status())) else {
      tracing::trace!("Setup status undecided, waiting for all checks");
      return;
    };
    if self.status.value() != Some(status) {
      let failing: Vec<_> = self
        .checks
        .iter()
        .filter(|check| check.watcher.status() == ReadinessCheck::SetupRequired)
        .map(|check| check.name)
        .collect();
      if failing.is_empty() {
        tracing::info!("Setup status: {status}");
      } else {
        tracing::info!("Setup status: {status} ({})", failing.join(", "));
      }
    }
    self.status.set_value(status);
  }
}
