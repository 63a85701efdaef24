//! Emulator lifecycle commands
//!
//! Start and stop run through the LocalStack CLI. The emulator status is
//! moved optimistically before the command runs and resynced from the
//! container observer if the command fails or is cancelled.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::checks::license::{activate_license, check_is_license_valid};
use crate::config::RestartPolicy;
use crate::process::{self, SpawnOptions, SpawnOutcome};
use crate::status::{ContainerStatus, EmulatorStatusTracker};
use crate::utils::localstack_cmd;

/// The CLI keeps running when the container fails to come up; this shows up on stderr
const CONTAINER_EXCEPTION: &str = "localstack.utils.container_utils.container_client.ContainerException";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
  Started,
  Cancelled,
  /// Start failed and the license turned out to be invalid
  LicenseInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseActivation {
  Valid,
  Cancelled,
  /// The retry policy gave up before the license became valid
  Exhausted,
}

pub async fn start_emulator(
  emulator: &EmulatorStatusTracker,
  cli_path: &Path,
  image_name: &str,
  cancel: CancellationToken,
) -> Result<StartOutcome> {
  tracing::info!("Starting LocalStack");
  emulator.force_container_status(ContainerStatus::Running);

  // --no-banner and --detached keep the CLI from printing characters some consoles cannot encode
  let mut cmd = localstack_cmd(cli_path, image_name);
  cmd.args(["start", "--no-banner", "--detached"]);
  let options = SpawnOptions {
    label: "localstack.start".to_string(),
    cancel,
    abort_marker: Some(CONTAINER_EXCEPTION),
  };

  match process::spawn(cmd, options).await {
    Ok(SpawnOutcome::Completed) => Ok(StartOutcome::Started),
    Ok(SpawnOutcome::Cancelled) => {
      emulator.resync_container_status();
      Ok(StartOutcome::Cancelled)
    }
    Err(e) => {
      emulator.resync_container_status();
      if !check_is_license_valid(cli_path, image_name).await {
        tracing::warn!("No valid LocalStack license found");
        return Ok(StartOutcome::LicenseInvalid);
      }
      Err(e).context("Failed to start LocalStack")
    }
  }
}

/// Returns `false` when cancelled
pub async fn stop_emulator(
  emulator: &EmulatorStatusTracker,
  cli_path: &Path,
  image_name: &str,
  cancel: CancellationToken,
) -> Result<bool> {
  tracing::info!("Stopping LocalStack");
  emulator.force_container_status(ContainerStatus::Stopping);

  let mut cmd = localstack_cmd(cli_path, image_name);
  cmd.arg("stop");
  let options = SpawnOptions {
    label: "localstack.stop".to_string(),
    cancel,
    abort_marker: None,
  };

  match process::spawn(cmd, options).await {
    Ok(SpawnOutcome::Completed) => Ok(true),
    Ok(SpawnOutcome::Cancelled) => {
      emulator.resync_container_status();
      Ok(false)
    }
    Err(e) => {
      emulator.resync_container_status();
      Err(e).context("Failed to stop LocalStack")
    }
  }
}

/// Check, activate and wait until the license is valid
pub async fn activate_license_until_valid(
  cli_path: &Path,
  image_name: &str,
  policy: &RestartPolicy,
  cancel: CancellationToken,
) -> LicenseActivation {
  let mut backoff = policy.backoff();
  loop {
    if cancel.is_cancelled() {
      return LicenseActivation::Cancelled;
    }
    if check_is_license_valid(cli_path, image_name).await {
      tracing::info!("License is valid");
      return LicenseActivation::Valid;
    }
    activate_license(cli_path, image_name).await;

    let Some(delay) = backoff.next_delay() else {
      tracing::warn!("License still invalid after {} activation attempts", backoff.attempts());
      return LicenseActivation::Exhausted;
    };
    tokio::select! {
      () = cancel.cancelled() => return LicenseActivation::Cancelled,
      () = tokio::time::sleep(delay) => {}
    }
  }
}
