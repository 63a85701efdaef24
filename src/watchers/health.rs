//! Process health poller
//!
//! Probes the emulator's health endpoint on a fixed period while armed. The
//! loop re-arms only after the previous probe finished, so probes never
//! overlap, and stopping resets the status to unknown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::HealthConfig;
use crate::signal::ValueEmitter;
use crate::status::HealthStatus;

/// A single health check against the emulator
#[async_trait]
pub trait HealthProbe: Send + Sync {
  /// `true` when the emulator answered successfully
  async fn probe(&self) -> bool;
}

/// Probes `GET <url>`; any 2xx counts as healthy
pub struct HttpHealthProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpHealthProbe {
  pub fn new(config: &HealthConfig) -> anyhow::Result<Self> {
    let client = reqwest::Client::builder().timeout(config.timeout).no_proxy().build()?;
    Ok(Self {
      client,
      url: config.url.clone(),
    })
  }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
  async fn probe(&self) -> bool {
    match self.client.get(self.url.clone()).send().await {
      Ok(response) => response.status().is_success(),
      Err(e) => {
        tracing::trace!("Health probe failed: {e}");
        false
      }
    }
  }
}

/// Periodic health poller with start/stop control
#[derive(Clone)]
pub struct HealthPoller {
  inner: Arc<Inner>,
}

struct Inner {
  probe: Arc<dyn HealthProbe>,
  interval: Duration,
  timeout: Duration,
  poll_while_running: bool,
  status: ValueEmitter<HealthStatus>,
  /// Present while the loop is armed
  armed: Mutex<Option<CancellationToken>>,
}

impl HealthPoller {
  pub fn new(probe: Arc<dyn HealthProbe>, config: &HealthConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        probe,
        interval: config.interval,
        timeout: config.timeout,
        poll_while_running: config.poll_while_running,
        status: ValueEmitter::with_value("health", HealthStatus::Unknown),
        armed: Mutex::new(None),
      }),
    }
  }

  /// Arm the polling loop; no-op while already armed
  pub fn start(&self) {
    let token = {
      let mut armed = self.inner.armed.lock();
      if armed.is_some() {
        return;
      }
      let token = CancellationToken::new();
      *armed = Some(token.clone());
      token
    };

    tracing::debug!("Starting health checks");
    let inner = self.inner.clone();
    tokio::spawn(async move { inner.run(token).await });
  }

  /// Disarm the loop and reset the status to unknown
  pub fn stop(&self) {
    let mut armed = self.inner.armed.lock();
    if let Some(token) = armed.take() {
      tracing::debug!("Stopping health checks");
      token.cancel();
    }
    self.inner.status.set_value(HealthStatus::Unknown);
  }

  /// Whether polling should continue after the emulator is confirmed running
  pub fn polls_while_running(&self) -> bool {
    self.inner.poll_while_running
  }

  pub fn is_polling(&self) -> bool {
    self.inner.armed.lock().is_some()
  }

  pub fn status(&self) -> HealthStatus {
    self.inner.status.value().unwrap_or_default()
  }

  pub fn on_change<F>(&self, callback: F)
  where
    F: Fn(&HealthStatus) + Send + Sync + 'static,
  {
    self.inner.status.on_change(callback);
  }
}

impl Inner {
  async fn run(&self, token: CancellationToken) {
    loop {
      let healthy = tokio::select! {
        () = token.cancelled() => return,
        result = tokio::time::timeout(self.timeout, self.probe.probe()) => result.unwrap_or(false),
      };

      {
        // Checked under the lock so a concurrent stop() always wins
        let _armed = self.armed.lock();
        if token.is_cancelled() {
          return;
        }
        self.status.set_value(HealthStatus::from(healthy));
      }

      tokio::select! {
        () = token.cancelled() => return,
        () = tokio::time::sleep(self.interval) => {}
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use super::*;

  /// Probe whose answer can be flipped from the test
  pub(crate) struct FakeProbe {
    pub healthy: AtomicBool,
    pub calls: AtomicUsize,
    pub delay: Duration,
  }

  impl FakeProbe {
    pub(crate) fn new(healthy: bool) -> Arc<Self> {
      Self::with_delay(healthy, Duration::ZERO)
    }

    pub(crate) fn with_delay(healthy: bool, delay: Duration) -> Arc<Self> {
      Arc::new(Self {
        healthy: AtomicBool::new(healthy),
        calls: AtomicUsize::new(0),
        delay,
      })
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
      self.healthy.store(healthy, Ordering::SeqCst);
    }
  }

  #[async_trait]
  impl HealthProbe for FakeProbe {
    async fn probe(&self) -> bool {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      self.healthy.load(Ordering::SeqCst)
    }
  }

  /// Serve `response` to every connection on a local port
  async fn serve(response: &'static str, delay: Duration) -> Url {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      while let Ok((mut socket, _)) = listener.accept().await {
        tokio::spawn(async move {
          let mut request = [0u8; 1024];
          let _ = socket.read(&mut request).await;
          tokio::time::sleep(delay).await;
          let _ = socket.write_all(response.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });
    Url::parse(&format!("http://{addr}/_localstack/health")).unwrap()
  }

  fn http_check(url: Url) -> HttpHealthProbe {
    let config = HealthConfig {
      url,
      timeout: Duration::from_millis(300),
      ..HealthConfig::default()
    };
    HttpHealthProbe::new(&config).unwrap()
  }

  #[tokio::test]
  async fn test_http_check_success_status_is_healthy() {
    let url = serve(
      "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}",
      Duration::ZERO,
    )
    .await;
    assert!(http_check(url).probe().await);

    let url = serve(
      "HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n",
      Duration::ZERO,
    )
    .await;
    assert!(http_check(url).probe().await);
  }

  #[tokio::test]
  async fn test_http_check_error_status_is_unhealthy() {
    let url = serve(
      "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
      Duration::ZERO,
    )
    .await;
    assert!(!http_check(url).probe().await);
  }

  #[tokio::test]
  async fn test_http_check_refused_connection_is_unhealthy() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/_localstack/health")).unwrap();
    assert!(!http_check(url).probe().await);
  }

  #[tokio::test]
  async fn test_http_check_slow_server_is_unhealthy() {
    let url = serve(
      "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
      Duration::from_secs(2),
    )
    .await;
    let started = std::time::Instant::now();
    assert!(!http_check(url).probe().await);
    assert!(started.elapsed() < Duration::from_secs(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_status_unknown_until_started() {
    let poller = HealthPoller::new(FakeProbe::new(true), &HealthConfig::default());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(poller.status(), HealthStatus::Unknown);
    assert!(!poller.is_polling());
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_publishes_probe_result() {
    let probe = FakeProbe::new(true);
    let poller = HealthPoller::new(probe.clone(), &HealthConfig::default());

    poller.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(poller.status(), HealthStatus::Healthy);

    probe.set_healthy(false);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(poller.status(), HealthStatus::Unhealthy);
  }

  #[tokio::test(start_paused = true)]
  async fn test_polls_on_fixed_interval() {
    let probe = FakeProbe::new(true);
    let poller = HealthPoller::new(probe.clone(), &HealthConfig::default());

    poller.start();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    // t = 0, 1, 2, 3
    assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_resets_to_unknown_and_halts_polling() {
    let probe = FakeProbe::new(true);
    let poller = HealthPoller::new(probe.clone(), &HealthConfig::default());

    poller.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    poller.stop();
    assert_eq!(poller.status(), HealthStatus::Unknown);

    let calls = probe.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_during_inflight_probe_discards_result() {
    let probe = FakeProbe::with_delay(true, Duration::from_millis(300));
    let poller = HealthPoller::new(probe.clone(), &HealthConfig::default());

    poller.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.stop();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(poller.status(), HealthStatus::Unknown);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_probe_times_out_as_unhealthy() {
    let probe = FakeProbe::with_delay(true, Duration::from_secs(2));
    let poller = HealthPoller::new(probe, &HealthConfig::default());

    poller.start();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(poller.status(), HealthStatus::Unhealthy);
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_is_idempotent() {
    let probe = FakeProbe::new(true);
    let poller = HealthPoller::new(probe.clone(), &HealthConfig::default());

    poller.start();
    poller.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
  }
}
