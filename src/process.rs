//! Subprocess execution
//!
//! `exec` runs a command to completion and captures its output. `spawn` runs
//! a long-lived command, pipes its output into tracing line by line, and can
//! be cancelled or aborted on a known failure marker.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;
use crate::utils::describe_cmd;

/// Time a cancelled process gets to exit after being interrupted
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Run `cmd` to completion, failing on a non-zero exit status
pub async fn exec(mut cmd: Command) -> Result<ExecOutput, CommandError> {
  let command = describe_cmd(&cmd);
  let program = cmd.as_std().get_program().to_string_lossy().into_owned();
  tracing::trace!("Running `{command}`");

  let output = cmd
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|e| CommandError::from_spawn(program, e))?;

  let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
  let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

  if output.status.success() {
    Ok(ExecOutput { stdout, stderr })
  } else {
    Err(CommandError::Failed {
      command,
      code: output.status.code(),
      stderr: stderr.trim().to_string(),
    })
  }
}

/// How a spawned command ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
  Completed,
  Cancelled,
}

impl SpawnOutcome {
  pub fn is_cancelled(self) -> bool {
    matches!(self, SpawnOutcome::Cancelled)
  }
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
  /// Prefix for piped output lines
  pub label: String,
  pub cancel: CancellationToken,
  /// Kill the process as soon as stderr contains this text
  pub abort_marker: Option<&'static str>,
}

/// Run `cmd`, streaming its output into the log until it exits or is cancelled
pub async fn spawn(mut cmd: Command, options: SpawnOptions) -> Result<SpawnOutcome, CommandError> {
  let command = describe_cmd(&cmd);
  let program = cmd.as_std().get_program().to_string_lossy().into_owned();
  let label = if options.label.is_empty() {
    command.clone()
  } else {
    options.label.clone()
  };

  if options.cancel.is_cancelled() {
    return Ok(SpawnOutcome::Cancelled);
  }

  tracing::debug!("Spawning `{command}`");
  let mut child = cmd
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .spawn()
    .map_err(|e| CommandError::from_spawn(program, e))?;

  let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
  let mut stderr = child.stderr.take().map(|err| BufReader::new(err).lines());

  loop {
    tokio::select! {
      () = options.cancel.cancelled() => {
        tracing::debug!("[{label}] Cancelled, terminating process");
        terminate(&mut child).await;
        return Ok(SpawnOutcome::Cancelled);
      }
      line = next_line(stdout.as_mut()), if stdout.is_some() => match line {
        Some(line) => log_line(&label, &line, OutputStream::Stdout),
        None => stdout = None,
      },
      line = next_line(stderr.as_mut()), if stderr.is_some() => match line {
        Some(line) => {
          if let Some(marker) = options.abort_marker
            && line.contains(marker)
          {
            log_line(&label, &line, OutputStream::Stderr);
            terminate(&mut child).await;
            return Err(CommandError::Aborted { command, marker });
          }
          log_line(&label, &line, OutputStream::Stderr);
        }
        None => stderr = None,
      },
      status = child.wait(), if stdout.is_none() && stderr.is_none() => {
        let status = status?;
        return if status.success() {
          tracing::info!("[{label}] Process ended (exit code = {:?})", status.code());
          Ok(SpawnOutcome::Completed)
        } else {
          tracing::error!("[{label}] Process ended (exit code = {:?})", status.code());
          Err(CommandError::Failed {
            command,
            code: status.code(),
            stderr: String::new(),
          })
        };
      }
    }
  }
}

async fn next_line<R>(lines: Option<&mut tokio::io::Lines<R>>) -> Option<String>
where
  R: tokio::io::AsyncBufRead + Unpin,
{
  match lines {
    Some(lines) => lines.next_line().await.ok().flatten(),
    None => None,
  }
}

/// Interrupt the child and give it [`TERMINATE_GRACE`] to clean up before killing it
async fn terminate(child: &mut Child) {
  interrupt(child);
  if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
    return;
  }
  tracing::debug!("Process ignored interrupt for {TERMINATE_GRACE:?}, killing it");
  if let Err(e) = child.start_kill() {
    tracing::debug!("Failed to kill process: {e}");
  }
  let _ = child.wait().await;
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
  use nix::sys::signal::{Signal, kill};
  use nix::unistd::Pid;

  // No id means the child was already reaped
  let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
    return;
  };
  if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
    tracing::debug!("Failed to interrupt process {pid}: {e}");
  }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
  if let Err(e) = child.start_kill() {
    tracing::debug!("Failed to terminate process: {e}");
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
  Stdout,
  Stderr,
}

/// Log level carried by a LocalStack log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
}

static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?)[ ]+([A-Z]+)[ ]+(.*)$").expect("log line regex is valid")
});

/// Strip the timestamp and level from a LocalStack log line
fn parse_line(line: &str) -> (&str, Option<LineLevel>) {
  let Some(captures) = LOG_LINE.captures(line) else {
    return (line, None);
  };
  let level = match captures.get(2).map_or("", |m| m.as_str()) {
    "TRACE" => Some(LineLevel::Trace),
    "DEBUG" => Some(LineLevel::Debug),
    "INFO" => Some(LineLevel::Info),
    "WARN" | "WARNING" => Some(LineLevel::Warn),
    "ERROR" | "FATAL" | "CRITICAL" => Some(LineLevel::Error),
    _ => None,
  };
  let rest = captures.get(3).map_or(line, |m| m.as_str().trim());
  (rest, level)
}

fn log_line(label: &str, line: &str, stream: OutputStream) {
  let line = line.trim();
  if line.is_empty() {
    return;
  }
  let (message, level) = parse_line(line);
  let level = level.unwrap_or(match stream {
    OutputStream::Stdout => LineLevel::Info,
    OutputStream::Stderr => LineLevel::Error,
  });
  match level {
    LineLevel::Trace => tracing::trace!("[{label}] {message}"),
    LineLevel::Debug => tracing::debug!("[{label}] {message}"),
    LineLevel::Info => tracing::info!("[{label}] {message}"),
    LineLevel::Warn => tracing::warn!("[{label}] {message}"),
    LineLevel::Error => tracing::error!("[{label}] {message}"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_line_extracts_level() {
    let (message, level) = parse_line("2024-05-01T10:00:00.123  WARN   localstack.runtime : slow start");
    assert_eq!(message, "localstack.runtime : slow start");
    assert_eq!(level, Some(LineLevel::Warn));
  }

  #[test]
  fn test_parse_line_maps_error_family() {
    assert_eq!(parse_line("2024-05-01T10:00:00 FATAL boom").1, Some(LineLevel::Error));
    assert_eq!(parse_line("2024-05-01T10:00:00 CRITICAL boom").1, Some(LineLevel::Error));
    assert_eq!(parse_line("2024-05-01T10:00:00 WARNING boom").1, Some(LineLevel::Warn));
  }

  #[test]
  fn test_parse_line_passes_through_plain_text() {
    let (message, level) = parse_line("Ready.");
    assert_eq!(message, "Ready.");
    assert_eq!(level, None);
  }

  #[test]
  fn test_parse_line_unknown_level_keeps_message() {
    let (message, level) = parse_line("2024-05-01T10:00:00 NOTICE hello");
    assert_eq!(message, "hello");
    assert_eq!(level, None);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_exec_captures_stdout() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "echo hello"]);
    let output = exec(cmd).await.unwrap();
    assert_eq!(output.stdout.trim(), "hello");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_exec_reports_failure_with_stderr() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "echo nope >&2; exit 3"]);
    let err = exec(cmd).await.unwrap_err();
    assert!(matches!(err, CommandError::Failed { code: Some(3), ref stderr, .. } if stderr == "nope"));
  }

  #[tokio::test]
  async fn test_exec_missing_binary_is_not_found() {
    let cmd = Command::new("this_binary_definitely_does_not_exist_xyz123");
    let err = exec(cmd).await.unwrap_err();
    assert!(err.is_not_found());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_spawn_completes() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "echo out; echo err >&2"]);
    let outcome = spawn(cmd, SpawnOptions::default()).await.unwrap();
    assert_eq!(outcome, SpawnOutcome::Completed);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_spawn_cancellation_is_not_an_error() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "sleep 30"]);
    let cancel = CancellationToken::new();
    let options = SpawnOptions {
      label: "sleep".to_string(),
      cancel: cancel.clone(),
      abort_marker: None,
    };

    let handle = tokio::spawn(spawn(cmd, options));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.is_cancelled());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_cancellation_lets_process_clean_up() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("interrupted");
    let mut cmd = Command::new("sh");
    cmd.args([
      "-c",
      &format!("trap 'echo int > \"{}\"; exit 0' INT TERM; sleep 30 & wait", marker.display()),
    ]);
    let cancel = CancellationToken::new();
    let options = SpawnOptions {
      cancel: cancel.clone(),
      ..SpawnOptions::default()
    };

    let handle = tokio::spawn(spawn(cmd, options));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "int");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_cancellation_kills_process_ignoring_interrupt() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "trap '' INT; sleep 30 & wait"]);
    let cancel = CancellationToken::new();
    let options = SpawnOptions {
      cancel: cancel.clone(),
      ..SpawnOptions::default()
    };

    let handle = tokio::spawn(spawn(cmd, options));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let started = std::time::Instant::now();
    cancel.cancel();

    let outcome = tokio::time::timeout(TERMINATE_GRACE * 2, handle).await.unwrap().unwrap().unwrap();
    assert!(outcome.is_cancelled());
    assert!(started.elapsed() >= TERMINATE_GRACE);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_spawn_aborts_on_marker() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "echo 'ContainerException: boom' >&2; sleep 30"]);
    let options = SpawnOptions {
      abort_marker: Some("ContainerException"),
      ..SpawnOptions::default()
    };

    let err = spawn(cmd, options).await.unwrap_err();
    assert!(matches!(err, CommandError::Aborted { marker: "ContainerException", .. }));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_spawn_non_zero_exit_fails() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "exit 2"]);
    let err = spawn(cmd, SpawnOptions::default()).await.unwrap_err();
    assert!(matches!(err, CommandError::Failed { code: Some(2), .. }));
  }
}
