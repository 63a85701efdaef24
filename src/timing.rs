//! Timed startup steps

use std::fmt::Display;

use tokio::time::Instant;

/// Run `fut`, tracing how long it took
pub async fn timed<F>(name: &str, fut: F) -> F::Output
where
  F: Future,
{
  tracing::trace!("[{name}]: Starting...");
  let start = Instant::now();
  let output = fut.await;
  tracing::trace!("[{name}]: completed in {:?}", start.elapsed());
  output
}

/// Like [`timed`], but reports failures at error level
pub async fn try_timed<F, T, E>(name: &str, fut: F) -> Result<T, E>
where
  F: Future<Output = Result<T, E>>,
  E: Display,
{
  tracing::trace!("[{name}]: Starting...");
  let start = Instant::now();
  let result = fut.await;
  match &result {
    Ok(_) => tracing::trace!("[{name}]: completed in {:?}", start.elapsed()),
    Err(e) => tracing::error!("[{name}]: failed in {:?}: {e}", start.elapsed()),
  }
  result
}
