//! LocalStack CLI discovery
//!
//! The CLI counts as installed when a candidate exists, is executable and
//! reports a major version of at least 4. The resolved path is published
//! separately because other checks shell out to it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::process;
use crate::signal::ValueEmitter;
use crate::status::ReadinessCheck;
use crate::utils::{home_dir, localstack_cmd};
use crate::watchers::FileStatusWatcher;

const MIN_MAJOR_VERSION: u32 = 4;

static VERSION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\b(\d+\.\d+.(?:\d[\d\w]*))\b").expect("version regex is valid"));

/// Outcome of probing one CLI location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliCheck {
  pub path: Option<PathBuf>,
  pub found: bool,
  pub executable: bool,
  /// `None` when the version could not be determined
  pub up_to_date: Option<bool>,
}

impl CliCheck {
  pub fn is_ready(&self) -> bool {
    self.found && self.executable && self.up_to_date == Some(true)
  }
}

/// Well-known install locations, in lookup order
pub fn cli_candidates() -> Vec<PathBuf> {
  let home = home_dir().unwrap_or_default();
  let local_install = home.join(".local").join("localstack");

  if cfg!(windows) {
    let system_drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
    let global_install = PathBuf::from(format!("{system_drive}\\")).join("Program Files").join("localstack");
    vec![
      PathBuf::from("localstack.exe"),
      global_install.join("localstack").join("localstack.exe"),
      local_install.join("localstack.exe"),
    ]
  } else {
    vec![
      PathBuf::from("localstack"),
      PathBuf::from("/usr/bin/localstack"),
      PathBuf::from("/usr/local/bin/localstack"),
      PathBuf::from("/opt/homebrew/bin/localstack"),
      PathBuf::from("/home/linuxbrew/.linuxbrew/bin/localstack"),
      home.join(".linuxbrew").join("bin").join("localstack"),
      home.join(".local").join("bin").join("localstack"),
      local_install.join("localstack"),
    ]
  }
}

fn parse_version(output: &str) -> Option<&str> {
  VERSION.captures(output).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn major_version(version: &str) -> Option<u32> {
  version.split_once('.').and_then(|(major, _)| major.parse().ok())
}

async fn localstack_major_version(cli_path: &Path, image_name: &str) -> Option<u32> {
  let mut cmd = localstack_cmd(cli_path, image_name);
  cmd.arg("--version");
  match process::exec(cmd).await {
    Ok(output) => parse_version(&output.stdout).and_then(major_version),
    Err(e) => {
      tracing::debug!("Failed to read LocalStack CLI version at {}: {e}", cli_path.display());
      None
    }
  }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
  metadata.is_file()
}

/// Bare program names are looked up on PATH
fn resolve_candidate(candidate: &Path) -> Option<PathBuf> {
  if candidate.is_absolute() {
    Some(candidate.to_path_buf())
  } else {
    which::which(candidate).ok()
  }
}

async fn verify_cli(cli_path: &Path, image_name: &str) -> CliCheck {
  let metadata = tokio::fs::metadata(cli_path).await.ok();
  let found = metadata.is_some();
  let executable = metadata.as_ref().is_some_and(is_executable);
  let up_to_date = if executable {
    localstack_major_version(cli_path, image_name)
      .await
      .map(|major| major >= MIN_MAJOR_VERSION)
  } else {
    None
  };
  CliCheck {
    path: Some(cli_path.to_path_buf()),
    found,
    executable,
    up_to_date,
  }
}

/// Probe the custom location if given, otherwise the first candidate that exists
pub async fn find_localstack(custom_location: Option<&Path>, image_name: &str) -> CliCheck {
  if let Some(location) = custom_location {
    return verify_cli(location, image_name).await;
  }

  for candidate in cli_candidates() {
    let Some(path) = resolve_candidate(&candidate) else {
      continue;
    };
    let check = verify_cli(&path, image_name).await;
    if check.found {
      return check;
    }
  }

  CliCheck::default()
}

pub async fn check_localstack_installed(custom_location: Option<&Path>, image_name: &str) -> bool {
  find_localstack(custom_location, image_name).await.is_ready()
}

/// Tracks CLI readiness and the resolved CLI path
#[derive(Clone)]
pub struct CliTracker {
  readiness: FileStatusWatcher,
  path: ValueEmitter<Option<PathBuf>>,
}

impl CliTracker {
  pub fn start(custom_location: Option<PathBuf>, image_name: String) -> Self {
    let path = ValueEmitter::new("cli_path");

    let mut watched: Vec<PathBuf> = cli_candidates().into_iter().filter(|p| p.is_absolute()).collect();
    if let Some(location) = custom_location.as_ref().filter(|p| p.is_absolute()) {
      watched.push(location.clone());
    }

    let publish = path.clone();
    let custom_location = Arc::new(custom_location);
    let image_name = Arc::new(image_name);
    let readiness = FileStatusWatcher::start("cli", watched, move || {
      let publish = publish.clone();
      let custom_location = custom_location.clone();
      let image_name = image_name.clone();
      async move {
        let check = find_localstack(custom_location.as_deref(), &image_name).await;
        tracing::debug!(
          "LocalStack CLI: {:?} (found: {}, executable: {}, up to date: {:?})",
          check.path,
          check.found,
          check.executable,
          check.up_to_date
        );
        publish.set_value(check.path.clone());
        ReadinessCheck::from(check.is_ready())
      }
    });

    Self { readiness, path }
  }

  pub fn readiness(&self) -> &FileStatusWatcher {
    &self.readiness
  }

  /// `None` until the first lookup finished, then the resolved path if any
  pub fn cli_path(&self) -> Option<Option<PathBuf>> {
    self.path.value()
  }

  /// Resolved CLI path, waiting for the first lookup if necessary
  pub async fn resolved_path(&self) -> Option<PathBuf> {
    self.path.first_value().await
  }

  pub fn on_cli_path_change<F>(&self, callback: F)
  where
    F: Fn(&Option<PathBuf>) + Send + Sync + 'static,
  {
    self.path.on_change(callback);
  }

  pub fn dispose(&self) {
    self.readiness.dispose();
  }
}
