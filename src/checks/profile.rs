//! AWS profile check
//!
//! The `localstack` profile is configured when `~/.aws/config` points it at
//! the emulator and `~/.aws/credentials` carries the dummy `test` keys.

use std::path::{Path, PathBuf};

use super::ini::{IniFile, IniSection};
use crate::status::ReadinessCheck;
use crate::watchers::FileStatusWatcher;

const CONFIG_PROFILE: &str = "profile localstack";
// The credentials file does not use the `profile` prefix
const CREDENTIALS_PROFILE: &str = "localstack";

pub const VALID_ENDPOINT_URLS: [&str; 3] = [
  "http://localhost.localstack.cloud:4566",
  "http://127.0.0.1:4566",
  "http://localhost:4566",
];

const TEST_CREDENTIAL: &str = "test";

pub fn config_file(aws_dir: &Path) -> PathBuf {
  aws_dir.join("config")
}

pub fn credentials_file(aws_dir: &Path) -> PathBuf {
  aws_dir.join("credentials")
}

fn config_is_valid(section: Option<&IniSection>) -> bool {
  let Some(section) = section else {
    return false;
  };
  section.get("region").is_some_and(|region| !region.is_empty())
    && section
      .get("endpoint_url")
      .is_some_and(|url| VALID_ENDPOINT_URLS.contains(&url))
}

fn credentials_are_valid(section: Option<&IniSection>) -> bool {
  section.is_some_and(|section| {
    section.get("aws_access_key_id") == Some(TEST_CREDENTIAL)
      && section.get("aws_secret_access_key") == Some(TEST_CREDENTIAL)
  })
}

/// Missing or unreadable files count as empty
async fn read_ini(path: &Path) -> IniFile {
  match tokio::fs::read_to_string(path).await {
    Ok(contents) => IniFile::parse(&contents),
    Err(e) => {
      if e.kind() != std::io::ErrorKind::NotFound {
        tracing::debug!("Failed to read {}: {e}", path.display());
      }
      IniFile::default()
    }
  }
}

pub async fn check_is_profile_configured(aws_dir: &Path) -> bool {
  let (config_path, credentials_path) = (config_file(aws_dir), credentials_file(aws_dir));
  let (config, credentials) = tokio::join!(read_ini(&config_path), read_ini(&credentials_path));
  config_is_valid(config.section(CONFIG_PROFILE)) && credentials_are_valid(credentials.section(CREDENTIALS_PROFILE))
}

/// Watch the AWS config and credentials files
pub fn track(aws_dir: PathBuf) -> FileStatusWatcher {
  let paths = vec![config_file(&aws_dir), credentials_file(&aws_dir)];
  let aws_dir = std::sync::Arc::new(aws_dir);
  FileStatusWatcher::start("profile", paths, move || {
    let aws_dir = aws_dir.clone();
    async move { ReadinessCheck::from(check_is_profile_configured(&aws_dir).await) }
  })
}
