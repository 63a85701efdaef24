//! Utility functions for locating binaries and building commands

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Common Homebrew/system paths to search for binaries
const BREW_PATHS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];

/// Docker image the LocalStack CLI should start, passed through `IMAGE_NAME`
pub const DEFAULT_IMAGE_NAME: &str = "localstack/localstack-pro";

/// Find a binary in common locations (prioritize known paths over PATH)
pub fn find_binary(name: &str) -> Option<PathBuf> {
  // Editors and launchers often start us with a trimmed PATH
  for base in BREW_PATHS {
    let path = Path::new(base).join(name);
    if path.exists() {
      return Some(path);
    }
  }

  which::which(name).ok()
}

/// Get the user's home directory reliably
pub fn home_dir() -> Option<PathBuf> {
  if let Ok(home) = std::env::var("HOME")
    && !home.is_empty()
  {
    return Some(PathBuf::from(home));
  }

  dirs::home_dir()
}

/// Create a Command with an environment usable from GUI-launched processes
pub(crate) fn create_cmd(program: impl AsRef<OsStr>) -> Command {
  let mut cmd = Command::new(program);

  if std::env::var("HOME").is_err()
    && let Some(home) = home_dir()
  {
    cmd.env("HOME", home);
  }

  #[cfg(unix)]
  {
    let current_path = std::env::var("PATH").unwrap_or_default();
    if !current_path.contains("/opt/homebrew/bin") {
      let new_path = format!("/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:{current_path}");
      cmd.env("PATH", new_path);
    }
  }

  cmd
}

/// Location of the docker binary, falling back to a bare `docker` lookup
pub fn docker_binary() -> PathBuf {
  find_binary("docker").unwrap_or_else(|| PathBuf::from("docker"))
}

/// Create a Command for docker, finding the binary in common paths
pub fn docker_cmd() -> Command {
  create_cmd(docker_binary())
}

/// Create a Command for the LocalStack CLI at `cli_path`
///
/// Every invocation carries `IMAGE_NAME` and `LOCALSTACK_LDM_PREVIEW`.
pub fn localstack_cmd(cli_path: &Path, image_name: &str) -> Command {
  let mut cmd = create_cmd(cli_path);
  cmd.env("IMAGE_NAME", image_name);
  cmd.env("LOCALSTACK_LDM_PREVIEW", "1");
  cmd
}

/// Human readable rendering of a command line, used in logs and errors
pub fn describe_cmd(cmd: &Command) -> String {
  let std_cmd = cmd.as_std();
  let program = Path::new(std_cmd.get_program())
    .file_name()
    .unwrap_or_else(|| std_cmd.get_program())
    .to_string_lossy()
    .into_owned();
  std::iter::once(program)
    .chain(std_cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()))
    .collect::<Vec<_>>()
    .join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_brew_paths_contains_common_locations() {
    assert!(BREW_PATHS.contains(&"/opt/homebrew/bin"));
    assert!(BREW_PATHS.contains(&"/usr/local/bin"));
    assert!(BREW_PATHS.contains(&"/usr/bin"));
  }

  #[cfg(unix)]
  #[test]
  fn test_find_binary_returns_path_for_common_binaries() {
    let path = find_binary("ls");
    assert!(path.is_some(), "ls binary should be found");
    assert!(path.unwrap().exists());
  }

  #[test]
  fn test_find_binary_returns_none_for_nonexistent() {
    let path = find_binary("this_binary_definitely_does_not_exist_xyz123");
    assert!(path.is_none());
  }

  #[test]
  fn test_docker_cmd_returns_command() {
    let cmd = docker_cmd();
    assert!(format!("{cmd:?}").contains("docker"));
  }

  #[test]
  fn test_localstack_cmd_sets_cli_environment() {
    let cmd = localstack_cmd(Path::new("/usr/local/bin/localstack"), DEFAULT_IMAGE_NAME);
    let envs: Vec<_> = cmd
      .as_std()
      .get_envs()
      .filter_map(|(key, value)| Some((key.to_string_lossy().into_owned(), value?.to_string_lossy().into_owned())))
      .collect();
    assert!(envs.contains(&("IMAGE_NAME".to_string(), DEFAULT_IMAGE_NAME.to_string())));
    assert!(envs.contains(&("LOCALSTACK_LDM_PREVIEW".to_string(), "1".to_string())));
  }

  #[test]
  fn test_describe_cmd_uses_file_name_and_args() {
    let mut cmd = localstack_cmd(Path::new("/usr/local/bin/localstack"), DEFAULT_IMAGE_NAME);
    cmd.args(["license", "info"]);
    assert_eq!(describe_cmd(&cmd), "localstack license info");
  }

  #[test]
  fn test_home_dir_not_empty() {
    if let Some(path) = home_dir() {
      assert!(!path.as_os_str().is_empty());
    }
  }
}
