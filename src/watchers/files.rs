//! File presence/change watcher
//!
//! Runs a readiness check whenever one of a fixed set of files is added,
//! changed or removed, and republishes the result. Parent directories are
//! watched rather than the files themselves so files that do not exist yet
//! are picked up once they are created.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::signal::{ImmediateOnce, ValueEmitter};
use crate::status::ReadinessCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileChange {
  Added,
  Changed,
  Removed,
}

impl FileChange {
  fn from_kind(kind: &EventKind) -> Option<Self> {
    match kind {
      EventKind::Create(_) => Some(FileChange::Added),
      EventKind::Modify(_) => Some(FileChange::Changed),
      EventKind::Remove(_) => Some(FileChange::Removed),
      _ => None,
    }
  }
}

/// Publishes the result of a readiness check kept fresh by file system events
#[derive(Clone)]
pub struct FileStatusWatcher {
  inner: Arc<Inner>,
}

struct Inner {
  name: &'static str,
  status: ValueEmitter<ReadinessCheck>,
  check: ImmediateOnce,
  watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileStatusWatcher {
  /// Run `check` now and again on every change to `paths`
  ///
  /// An `Unknown` result is not published, so the watcher stays unset (or
  /// keeps its previous value) until the check can decide. With no paths
  /// the check only runs on [`recheck`](Self::recheck).
  pub fn start<F, Fut>(name: &'static str, paths: Vec<PathBuf>, check: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ReadinessCheck> + Send + 'static,
  {
    let status = ValueEmitter::new(name);
    let publish = status.clone();
    let check = Arc::new(check);
    let check = ImmediateOnce::new(move || {
      let check = check.clone();
      let publish = publish.clone();
      async move {
        let result = check().await;
        tracing::trace!("Check '{name}' returned {result}");
        if result.is_known() {
          publish.set_value(result);
        }
      }
    });

    let watcher = if paths.is_empty() {
      None
    } else {
      match watch_paths(name, &paths, check.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
          tracing::warn!("Failed to watch files for '{name}', relying on periodic checks: {e}");
          None
        }
      }
    };

    check.trigger();

    Self {
      inner: Arc::new(Inner {
        name,
        status,
        check,
        watcher: Mutex::new(watcher),
      }),
    }
  }

  pub fn name(&self) -> &'static str {
    self.inner.name
  }

  /// Schedule the check to run again
  pub fn recheck(&self) {
    self.inner.check.trigger();
  }

  /// Latest check result, `Unknown` until the first decisive run
  pub fn status(&self) -> ReadinessCheck {
    self.inner.status.value().unwrap_or_default()
  }

  pub fn on_change<F>(&self, callback: F)
  where
    F: Fn(&ReadinessCheck) + Send + Sync + 'static,
  {
    self.inner.status.on_change(callback);
  }

  /// Stop watching the file system
  pub fn dispose(&self) {
    if self.inner.watcher.lock().take().is_some() {
      tracing::trace!("Closed file watcher for '{}'", self.inner.name);
    }
  }
}

fn watch_paths(name: &'static str, paths: &[PathBuf], check: ImmediateOnce) -> notify::Result<RecommendedWatcher> {
  let file_names: BTreeSet<OsString> = paths
    .iter()
    .filter_map(|path| path.file_name().map(std::ffi::OsStr::to_os_string))
    .collect();

  let mut watcher = RecommendedWatcher::new(
    move |res: notify::Result<Event>| {
      let event = match res {
        Ok(event) => event,
        Err(e) => {
          tracing::debug!("File watcher error for '{name}': {e}");
          return;
        }
      };
      let Some(change) = FileChange::from_kind(&event.kind) else {
        return;
      };
      let relevant = event
        .paths
        .iter()
        .any(|path| path.file_name().is_some_and(|n| file_names.contains(n)));
      if relevant {
        tracing::trace!("File {change:?} for '{name}': {:?}", event.paths);
        check.trigger();
      }
    },
    notify::Config::default(),
  )?;

  for dir in watch_dirs(paths) {
    match watcher.watch(&dir, RecursiveMode::NonRecursive) {
      Ok(()) => tracing::trace!("Watching {} for '{name}'", dir.display()),
      Err(e) => tracing::debug!("Cannot watch {} for '{name}': {e}", dir.display()),
    }
  }

  Ok(watcher)
}

/// Existing parent directories of `paths`, deduplicated
fn watch_dirs(paths: &[PathBuf]) -> BTreeSet<PathBuf> {
  paths
    .iter()
    .filter_map(|path| path.parent())
    .filter(|dir| !dir.as_os_str().is_empty() && dir.is_dir())
    .map(Path::to_path_buf)
    .collect()
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use super::*;

  async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
      if condition() {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
  }

  fn exists_check(path: PathBuf) -> impl Fn() -> std::future::Ready<ReadinessCheck> + Send + Sync + 'static {
    move || std::future::ready(ReadinessCheck::from(path.exists()))
  }

  #[test]
  fn test_watch_dirs_dedupes_and_skips_missing() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
      dir.path().join("config"),
      dir.path().join("credentials"),
      dir.path().join("missing").join("auth.json"),
    ];
    let dirs = watch_dirs(&paths);
    assert_eq!(dirs.len(), 1);
    assert!(dirs.contains(dir.path()));
  }

  #[test]
  fn test_file_change_ignores_access_events() {
    assert_eq!(
      FileChange::from_kind(&EventKind::Create(notify::event::CreateKind::File)),
      Some(FileChange::Added)
    );
    assert_eq!(
      FileChange::from_kind(&EventKind::Remove(notify::event::RemoveKind::File)),
      Some(FileChange::Removed)
    );
    assert_eq!(
      FileChange::from_kind(&EventKind::Access(notify::event::AccessKind::Read)),
      None
    );
  }

  #[tokio::test]
  async fn test_initial_check_is_published() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.json");
    std::fs::write(&path, "{}").unwrap();

    let watcher = FileStatusWatcher::start("auth", vec![path.clone()], exists_check(path));
    assert!(wait_for(|| watcher.status() == ReadinessCheck::Ok).await);
    watcher.dispose();
  }

  #[tokio::test]
  async fn test_file_creation_and_removal_rerun_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.json");

    let watcher = FileStatusWatcher::start("auth", vec![path.clone()], exists_check(path.clone()));
    assert!(wait_for(|| watcher.status() == ReadinessCheck::SetupRequired).await);

    std::fs::write(&path, "{}").unwrap();
    assert!(wait_for(|| watcher.status() == ReadinessCheck::Ok).await);

    std::fs::remove_file(&path).unwrap();
    assert!(wait_for(|| watcher.status() == ReadinessCheck::SetupRequired).await);
    watcher.dispose();
  }

  #[tokio::test]
  async fn test_unrelated_files_do_not_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.json");
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let watcher = FileStatusWatcher::start("auth", vec![path], move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(ReadinessCheck::Ok)
    });
    assert!(wait_for(|| runs.load(Ordering::SeqCst) == 1).await);

    std::fs::write(dir.path().join("other.txt"), "x").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    watcher.dispose();
  }

  #[tokio::test]
  async fn test_unknown_result_is_not_published() {
    let watcher = FileStatusWatcher::start("license", Vec::new(), || std::future::ready(ReadinessCheck::Unknown));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    watcher.on_change(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(watcher.status(), ReadinessCheck::Unknown);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_recheck_without_paths() {
    let result = Arc::new(Mutex::new(ReadinessCheck::SetupRequired));
    let source = result.clone();
    let watcher = FileStatusWatcher::start("cli", Vec::new(), move || std::future::ready(*source.lock()));
    assert!(wait_for(|| watcher.status() == ReadinessCheck::SetupRequired).await);

    *result.lock() = ReadinessCheck::Ok;
    watcher.recheck();
    assert!(wait_for(|| watcher.status() == ReadinessCheck::Ok).await);
  }

  #[tokio::test]
  async fn test_dispose_stops_watching() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.json");

    let watcher = FileStatusWatcher::start("auth", vec![path.clone()], exists_check(path.clone()));
    assert!(wait_for(|| watcher.status() == ReadinessCheck::SetupRequired).await);

    watcher.dispose();
    std::fs::write(&path, "{}").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(watcher.status(), ReadinessCheck::SetupRequired);
  }
}
