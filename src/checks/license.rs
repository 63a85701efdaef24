//! License validity as reported by `localstack license info`

use std::path::{Path, PathBuf};

use super::cli::CliTracker;
use crate::process;
use crate::status::ReadinessCheck;
use crate::utils::localstack_cmd;
use crate::watchers::FileStatusWatcher;

const LICENSE_VALIDITY_MARKER: &str = "license validity: valid";

pub async fn check_is_license_valid(cli_path: &Path, image_name: &str) -> bool {
  let mut cmd = localstack_cmd(cli_path, image_name);
  cmd.args(["license", "info"]);
  match process::exec(cmd).await {
    Ok(output) => output.stdout.contains(LICENSE_VALIDITY_MARKER),
    Err(e) => {
      tracing::error!("Failed to query license: {e}");
      false
    }
  }
}

/// Ask the CLI to activate a license; failures are only logged
pub async fn activate_license(cli_path: &Path, image_name: &str) {
  let mut cmd = localstack_cmd(cli_path, image_name);
  cmd.args(["license", "activate"]);
  if let Err(e) = process::exec(cmd).await {
    tracing::error!("Failed to activate license: {e}");
  }
}

/// Watch the cached license and the auth file, re-checking whenever the CLI moves
///
/// Reports unknown while the CLI lookup is still pending, since there is
/// nothing to ask yet.
pub fn track(cli: &CliTracker, license_file: PathBuf, auth_file: PathBuf, image_name: String) -> FileStatusWatcher {
  let paths = vec![license_file, auth_file];
  let lookup = cli.clone();
  let image_name = std::sync::Arc::new(image_name);
  let watcher = FileStatusWatcher::start("license", paths, move || {
    let lookup = lookup.clone();
    let image_name = image_name.clone();
    async move {
      match lookup.cli_path() {
        None => ReadinessCheck::Unknown,
        Some(None) => ReadinessCheck::SetupRequired,
        Some(Some(cli_path)) => ReadinessCheck::from(check_is_license_valid(&cli_path, &image_name).await),
      }
    }
  });

  let recheck = watcher.clone();
  cli.on_cli_path_change(move |path| {
    tracing::trace!("CLI path changed to {path:?}, re-checking license");
    recheck.recheck();
  });

  watcher
}

#[cfg(all(test, unix))]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::checks::cli::tests::fake_cli;

  const IMAGE: &str = "localstack/localstack-pro";

  async fn wait_known(watcher: &FileStatusWatcher) -> ReadinessCheck {
    for _ in 0..100 {
      let status = watcher.status();
      if status.is_known() {
        return status;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    watcher.status()
  }

  #[tokio::test]
  async fn test_valid_marker() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
      dir.path(),
      "[ \"$1 $2\" = 'license info' ] && echo 'License type: Pro\nlicense validity: valid'",
    );
    assert!(check_is_license_valid(&cli, IMAGE).await);
  }

  #[tokio::test]
  async fn test_invalid_marker() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(dir.path(), "echo 'license validity: expired'");
    assert!(!check_is_license_valid(&cli, IMAGE).await);
  }

  #[tokio::test]
  async fn test_command_failure_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(dir.path(), "echo 'license validity: valid'; exit 1");
    assert!(!check_is_license_valid(&cli, IMAGE).await);
    assert!(!check_is_license_valid(&dir.path().join("missing"), IMAGE).await);
  }

  #[tokio::test]
  async fn test_tracker_uses_resolved_cli() {
    let dir = tempfile::tempdir().unwrap();
    let cli_path = fake_cli(
      dir.path(),
      "case \"$1\" in --version) echo 4.1.0 ;; license) echo 'license validity: valid' ;; esac",
    );
    let cli = CliTracker::start(Some(cli_path), IMAGE.to_string());
    let watcher = track(
      &cli,
      dir.path().join("license.json"),
      dir.path().join("auth.json"),
      IMAGE.to_string(),
    );

    assert_eq!(wait_known(&watcher).await, ReadinessCheck::Ok);
    watcher.dispose();
    cli.dispose();
  }

  #[tokio::test]
  async fn test_tracker_without_cli_requires_setup() {
    let dir = tempfile::tempdir().unwrap();
    let cli = CliTracker::start(Some(dir.path().join("localstack")), IMAGE.to_string());
    let watcher = track(
      &cli,
      dir.path().join("license.json"),
      dir.path().join("auth.json"),
      IMAGE.to_string(),
    );

    // The missing binary still resolves to a path, which then fails the license query
    assert_eq!(wait_known(&watcher).await, ReadinessCheck::SetupRequired);
    watcher.dispose();
    cli.dispose();
  }
}
