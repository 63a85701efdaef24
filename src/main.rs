use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use localstack_status::manage::{LicenseActivation, StartOutcome};
use localstack_status::{AppConfig, Session};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "localstack-status", version, about)]
struct Cli {
  /// Config file, defaults to `<config_dir>/localstack-status/config.json`
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Location of the LocalStack CLI, overriding the well-known install paths
  #[arg(long, global = true, env = "LOCALSTACK_CLI_LOCATION")]
  cli_location: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Follow emulator and setup status until interrupted
  Watch,
  /// Start the emulator
  Start,
  /// Stop the emulator
  Stop,
  /// Report setup readiness once every check has resolved
  Check {
    /// Give up after this many seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
  },
  /// Activate the license until it is valid
  ActivateLicense,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("localstack_status=info")))
    .init();

  let cli = Cli::parse();
  let mut config = AppConfig::load(cli.config.as_deref())?;
  if cli.cli_location.is_some() {
    config.setup.cli_location = cli.cli_location;
  }

  let session = Session::start(config).await?;
  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::info!("Interrupted");
      interrupt.cancel();
    }
  });

  let result = run(&session, cli.command, cancel).await;
  session.dispose();
  result
}

async fn run(session: &Session, command: Command, cancel: CancellationToken) -> Result<ExitCode> {
  match command {
    Command::Watch => {
      session
        .emulator()
        .on_change(|status| tracing::info!(%status, "LocalStack"));
      session.setup().on_change(|status| tracing::info!(%status, "Setup"));
      cancel.cancelled().await;
      Ok(ExitCode::SUCCESS)
    }
    Command::Start => match session.start_emulator(cancel).await? {
      StartOutcome::Started => Ok(ExitCode::SUCCESS),
      StartOutcome::Cancelled => Ok(ExitCode::from(130)),
      StartOutcome::LicenseInvalid => {
        tracing::error!("No valid LocalStack license found, run `activate-license` first");
        Ok(ExitCode::FAILURE)
      }
    },
    Command::Stop => {
      let stopped = session.stop_emulator(cancel).await?;
      Ok(if stopped { ExitCode::SUCCESS } else { ExitCode::from(130) })
    }
    Command::Check { timeout } => check(session, Duration::from_secs(timeout), cancel).await,
    Command::ActivateLicense => match session.activate_license(cancel).await? {
      LicenseActivation::Valid => Ok(ExitCode::SUCCESS),
      LicenseActivation::Cancelled => Ok(ExitCode::from(130)),
      LicenseActivation::Exhausted => Ok(ExitCode::FAILURE),
    },
  }
}

#[allow(clippy::print_stdout)]
async fn check(session: &Session, timeout: Duration, cancel: CancellationToken) -> Result<ExitCode> {
  let mut changes = {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    session.setup().on_change(move |status| {
      let _ = tx.send(*status);
    });
    rx
  };

  let status = tokio::select! {
    () = cancel.cancelled() => return Ok(ExitCode::from(130)),
    () = tokio::time::sleep(timeout) => None,
    status = changes.recv() => status,
  };

  let report = serde_json::json!({
    "status": status,
    "checks": session
      .setup()
      .statuses()
      .into_iter()
      .map(|(name, check)| (name.to_string(), serde_json::to_value(check).unwrap_or_default()))
      .collect::<serde_json::Map<_, _>>(),
    "emulator": session.emulator().status(),
  });
  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(match status {
    Some(localstack_status::status::SetupStatus::Ok) => ExitCode::SUCCESS,
    _ => ExitCode::FAILURE,
  })
}
