//! Error types for external command execution

use std::io;

use thiserror::Error;

/// Failure while running an external tool (docker, the LocalStack CLI)
///
/// Observers never let these escape their loops; they are mapped to the
/// negative state of whatever check issued the command.
#[derive(Debug, Error)]
pub enum CommandError {
  #[error("`{program}` is not installed or not on PATH")]
  NotFound { program: String },

  #[error("failed to spawn `{program}`: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("`{command}` exited with code {code:?}: {stderr}")]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("`{command}` was aborted after reporting `{marker}`")]
  Aborted { command: String, marker: &'static str },

  #[error(transparent)]
  Io(#[from] io::Error),
}

impl CommandError {
  /// Classify a spawn failure, separating a missing binary from other I/O errors
  pub fn from_spawn(program: impl Into<String>, source: io::Error) -> Self {
    let program = program.into();
    if source.kind() == io::ErrorKind::NotFound {
      CommandError::NotFound { program }
    } else {
      CommandError::Spawn { program, source }
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, CommandError::NotFound { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_spawn_maps_missing_binary() {
    let err = CommandError::from_spawn("docker", io::Error::from(io::ErrorKind::NotFound));
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "`docker` is not installed or not on PATH");
  }

  #[test]
  fn test_from_spawn_keeps_other_errors() {
    let err = CommandError::from_spawn("docker", io::Error::from(io::ErrorKind::PermissionDenied));
    assert!(!err.is_not_found());
    assert!(matches!(err, CommandError::Spawn { ref program, .. } if program == "docker"));
  }

  #[test]
  fn test_failed_display_includes_code_and_stderr() {
    let err = CommandError::Failed {
      command: "docker events".to_string(),
      code: Some(1),
      stderr: "daemon not running".to_string(),
    };
    assert_eq!(
      err.to_string(),
      "`docker events` exited with code Some(1): daemon not running"
    );
  }
}
