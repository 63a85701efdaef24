//! Session context
//!
//! Owns every tracker for the lifetime of one session and wires them
//! together. Nothing in here is global: each session builds its own
//! observers from an [`AppConfig`] and tears them down in [`Session::dispose`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::checks::{CliTracker, auth, license, profile};
use crate::config::AppConfig;
use crate::manage::{self, LicenseActivation, StartOutcome};
use crate::status::{EmulatorStatusTracker, NamedCheck, SetupStatusTracker};
use crate::timing::{timed, try_timed};
use crate::watchers::{
  ContainerLogFollower, ContainerRuntime, ContainerStatusTracker, DockerCli, HealthPoller, HealthProbe, HttpHealthProbe,
};

pub struct Session {
  config: AppConfig,
  container: ContainerStatusTracker,
  logs: ContainerLogFollower,
  emulator: EmulatorStatusTracker,
  cli: CliTracker,
  setup: SetupStatusTracker,
}

impl Session {
  /// Start a session against the local docker daemon and health endpoint
  pub async fn start(config: AppConfig) -> Result<Self> {
    let probe = HttpHealthProbe::new(&config.health).context("Failed to build health probe client")?;
    Ok(Self::start_with(config, Arc::new(DockerCli), Arc::new(probe)).await)
  }

  pub async fn start_with(config: AppConfig, runtime: Arc<dyn ContainerRuntime>, probe: Arc<dyn HealthProbe>) -> Self {
    let container = timed(
      "container-status",
      ContainerStatusTracker::start(runtime, config.container.clone()),
    )
    .await;
    let logs = ContainerLogFollower::start(&container, config.container.name.clone());
    let health = HealthPoller::new(probe, &config.health);
    let emulator = EmulatorStatusTracker::new(&container, health);

    let setup_config = &config.setup;
    let image_name = config.cli.image_name.clone();
    let cli = CliTracker::start(setup_config.cli_location.clone(), image_name.clone());
    let checks = vec![
      NamedCheck::new(cli.readiness().clone()),
      NamedCheck::new(profile::track(setup_config.aws_dir.clone())),
      NamedCheck::new(auth::track(setup_config.localstack_dir.clone())),
      NamedCheck::new(license::track(
        &cli,
        setup_config.license_file.clone(),
        auth::auth_file(&setup_config.localstack_dir),
        image_name,
      )),
    ];
    let setup = SetupStatusTracker::start(checks, setup_config.recheck_interval);

    Self {
      config,
      container,
      logs,
      emulator,
      cli,
      setup,
    }
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  pub fn container(&self) -> &ContainerStatusTracker {
    &self.container
  }

  pub fn logs(&self) -> &ContainerLogFollower {
    &self.logs
  }

  pub fn emulator(&self) -> &EmulatorStatusTracker {
    &self.emulator
  }

  pub fn cli(&self) -> &CliTracker {
    &self.cli
  }

  pub fn setup(&self) -> &SetupStatusTracker {
    &self.setup
  }

  pub async fn start_emulator(&self, cancel: CancellationToken) -> Result<StartOutcome> {
    let cli_path = self.require_cli().await?;
    try_timed(
      "manage.start",
      manage::start_emulator(&self.emulator, &cli_path, &self.config.cli.image_name, cancel),
    )
    .await
  }

  /// Returns `false` when cancelled
  pub async fn stop_emulator(&self, cancel: CancellationToken) -> Result<bool> {
    let cli_path = self.require_cli().await?;
    try_timed(
      "manage.stop",
      manage::stop_emulator(&self.emulator, &cli_path, &self.config.cli.image_name, cancel),
    )
    .await
  }

  /// Activate the license, pausing between attempts per `setup.license_retry`
  pub async fn activate_license(&self, cancel: CancellationToken) -> Result<LicenseActivation> {
    let cli_path = self.require_cli().await?;
    Ok(
      manage::activate_license_until_valid(
        &cli_path,
        &self.config.cli.image_name,
        &self.config.setup.license_retry,
        cancel,
      )
      .await,
    )
  }

  async fn require_cli(&self) -> Result<std::path::PathBuf> {
    self
      .cli
      .resolved_path()
      .await
      .context("LocalStack CLI not found, install it or set its location")
  }

  /// Stop every observer owned by this session
  pub fn dispose(&self) {
    tracing::debug!("Disposing session");
    self.setup.dispose();
    self.cli.dispose();
    self.emulator.dispose();
    self.logs.dispose();
    self.container.dispose();
  }
}
