//! Authentication token stored in `~/.localstack/auth.json`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::status::ReadinessCheck;
use crate::watchers::FileStatusWatcher;

const AUTH_FILE_NAME: &str = "auth.json";
const AUTH_TOKEN_KEY: &str = "LOCALSTACK_AUTH_TOKEN";

pub fn auth_file(localstack_dir: &Path) -> PathBuf {
  localstack_dir.join(AUTH_FILE_NAME)
}

/// Stored auth token, empty when missing or unreadable
pub async fn read_auth_token(localstack_dir: &Path) -> String {
  let path = auth_file(localstack_dir);
  let contents = match tokio::fs::read_to_string(&path).await {
    Ok(contents) => contents,
    Err(_) => return String::new(),
  };
  match serde_json::from_str::<Value>(&contents) {
    Ok(value) => value
      .get(AUTH_TOKEN_KEY)
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
    Err(e) => {
      tracing::debug!("Ignoring malformed {}: {e}", path.display());
      String::new()
    }
  }
}

/// Write `token` to the auth file, creating the directory if needed
pub async fn save_auth_token(localstack_dir: &Path, token: &str) -> Result<()> {
  tokio::fs::create_dir_all(localstack_dir)
    .await
    .with_context(|| format!("Failed to create {}", localstack_dir.display()))?;

  let mut object = Map::new();
  object.insert(AUTH_TOKEN_KEY.to_string(), Value::String(token.to_string()));
  let contents = serde_json::to_string_pretty(&Value::Object(object))?;

  let path = auth_file(localstack_dir);
  tokio::fs::write(&path, contents)
    .await
    .with_context(|| format!("Failed to write {}", path.display()))?;
  tracing::info!("Saved auth token to {}", path.display());
  Ok(())
}

pub async fn check_is_authenticated(localstack_dir: &Path) -> bool {
  !read_auth_token(localstack_dir).await.is_empty()
}

/// Watch the auth file
pub fn track(localstack_dir: PathBuf) -> FileStatusWatcher {
  let paths = vec![auth_file(&localstack_dir)];
  let localstack_dir = std::sync::Arc::new(localstack_dir);
  FileStatusWatcher::start("auth", paths, move || {
    let localstack_dir = localstack_dir.clone();
    async move { ReadinessCheck::from(check_is_authenticated(&localstack_dir).await) }
  })
}
