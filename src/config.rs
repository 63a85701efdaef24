//! Session configuration
//!
//! One explicit struct per component, all fields defaulted so a missing or
//! partial config file is always valid. Durations are stored in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils::{DEFAULT_IMAGE_NAME, home_dir};
pub use crate::watchers::RestartPolicy;

const CONFIG_DIR_NAME: &str = "localstack-status";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub container: ContainerConfig,
  pub health: HealthConfig,
  pub setup: SetupConfig,
  pub cli: CliConfig,
}

/// Container Lifecycle Observer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
  /// Name of the emulator container as known to docker
  pub name: String,
  /// Upper bound for the initial `docker inspect`, after which the container counts as stopped
  #[serde(with = "duration_ms")]
  pub inspect_timeout: Duration,
  /// Reconnection policy for the `docker events` subscription
  pub restart: RestartPolicy,
}

impl Default for ContainerConfig {
  fn default() -> Self {
    Self {
      name: "localstack-main".to_string(),
      inspect_timeout: Duration::from_secs(1),
      restart: RestartPolicy::default(),
    }
  }
}

/// Process Health Poller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
  pub url: Url,
  #[serde(with = "duration_ms")]
  pub interval: Duration,
  #[serde(with = "duration_ms")]
  pub timeout: Duration,
  /// Keep probing once the emulator is running, so a crashed service inside a
  /// live container is reported as stopping
  pub poll_while_running: bool,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      url: Url::parse("http://127.0.0.1:4566/_localstack/health").expect("static health url is valid"),
      interval: Duration::from_secs(1),
      timeout: Duration::from_millis(500),
      poll_while_running: false,
    }
  }
}

/// Setup-Readiness settings and the files its checks read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
  /// Fallback re-check period in case file system events are missed
  #[serde(with = "duration_ms")]
  pub recheck_interval: Duration,
  /// Explicit CLI location, checked before the well-known install paths
  pub cli_location: Option<PathBuf>,
  /// Directory holding `auth.json`
  pub localstack_dir: PathBuf,
  /// Directory holding the AWS `config` and `credentials` files
  pub aws_dir: PathBuf,
  /// Cached license written by the CLI
  pub license_file: PathBuf,
  /// Pause between `license activate` attempts
  pub license_retry: RestartPolicy,
}

impl Default for SetupConfig {
  fn default() -> Self {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    let cache = dirs::cache_dir().unwrap_or_else(|| home.join(".cache"));
    Self {
      recheck_interval: Duration::from_secs(1),
      cli_location: None,
      localstack_dir: home.join(".localstack"),
      aws_dir: home.join(".aws"),
      license_file: cache.join("localstack").join("license.json"),
      license_retry: RestartPolicy::default(),
    }
  }
}

/// Environment for LocalStack CLI invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
  pub image_name: String,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      image_name: DEFAULT_IMAGE_NAME.to_string(),
    }
  }
}

impl AppConfig {
  /// Default location: `<config_dir>/localstack-status/config.json`
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
  }

  /// Load from `path`, or from the default location when `None`
  ///
  /// A missing file yields the defaults; an unreadable or malformed file is an error.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(path) => path.to_path_buf(),
      None => match Self::default_path() {
        Some(path) => path,
        None => return Ok(Self::default()),
      },
    };

    if !path.exists() {
      tracing::debug!("No config at {}, using defaults", path.display());
      return Ok(Self::default());
    }

    let contents =
      std::fs::read_to_string(&path).with_context(|| format!("Failed to read config at {}", path.display()))?;
    let config: Self =
      serde_json::from_str(&contents).with_context(|| format!("Failed to parse config at {}", path.display()))?;
    config
      .validate()
      .with_context(|| format!("Invalid config at {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    self.container.restart.validate().context("container.restart")?;
    self.setup.license_retry.validate().context("setup.license_retry")?;
    Ok(())
  }
}

/// Serialize a `Duration` as whole milliseconds
pub(crate) mod duration_ms {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}
