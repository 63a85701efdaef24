//! Debounced value signal
//!
//! Holds the latest value of a status, coalesces updates made within one
//! tick into a single notification, and replays the current value to late
//! subscribers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use super::once::ImmediateOnce;

/// Subscriber callback. Errors are logged and never reach other subscribers.
pub type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber<T> {
  callback: Callback<T>,
  /// Last value handed to this subscriber, guards against consecutive duplicates
  last_seen: Mutex<Option<T>>,
}

struct State<T> {
  value: Option<T>,
  subscribers: Vec<Arc<Subscriber<T>>>,
}

struct Inner<T> {
  name: &'static str,
  state: Mutex<State<T>>,
  /// Wakes [`ValueEmitter::first_value`] callers once a value is stored
  stored: Notify,
}

/// Single-value publish/subscribe primitive
///
/// Cloning yields another handle to the same signal.
pub struct ValueEmitter<T> {
  inner: Arc<Inner<T>>,
  notify: ImmediateOnce,
}

impl<T> Clone for ValueEmitter<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      notify: self.notify.clone(),
    }
  }
}

impl<T> ValueEmitter<T>
where
  T: Clone + PartialEq + Send + Sync + 'static,
{
  /// Create an unset signal. Must be called from within a tokio runtime.
  pub fn new(name: &'static str) -> Self {
    let inner = Arc::new(Inner {
      name,
      state: Mutex::new(State {
        value: None,
        subscribers: Vec::new(),
      }),
      stored: Notify::new(),
    });

    let flush_target = inner.clone();
    let notify = ImmediateOnce::new(move || {
      let inner = flush_target.clone();
      async move { inner.flush() }
    });

    Self { inner, notify }
  }

  /// Create a signal that already holds `value`
  pub fn with_value(name: &'static str, value: T) -> Self {
    let emitter = Self::new(name);
    emitter.inner.state.lock().value = Some(value);
    emitter
  }

  pub fn name(&self) -> &'static str {
    self.inner.name
  }

  /// Current value, `None` while unset
  pub fn value(&self) -> Option<T> {
    self.inner.state.lock().value.clone()
  }

  /// Store `value` and schedule a notification if it differs from the previous one
  pub fn set_value(&self, value: T) {
    {
      let mut state = self.inner.state.lock();
      if state.value.as_ref() == Some(&value) {
        return;
      }
      state.value = Some(value);
    }
    self.inner.stored.notify_waiters();
    self.notify.trigger();
  }

  /// Store `value` only if nothing has been set yet
  ///
  /// Returns whether the value was applied.
  pub fn set_if_unset(&self, value: T) -> bool {
    {
      let mut state = self.inner.state.lock();
      if state.value.is_some() {
        return false;
      }
      state.value = Some(value);
    }
    self.inner.stored.notify_waiters();
    self.notify.trigger();
    true
  }

  /// Current value, waiting for the first one if unset
  ///
  /// Does not register a subscriber, so it is cheap to call repeatedly.
  pub async fn first_value(&self) -> T {
    loop {
      let stored = self.inner.stored.notified();
      tokio::pin!(stored);
      // Registered before the check so a concurrent store is not missed
      stored.as_mut().enable();
      if let Some(value) = self.value() {
        return value;
      }
      stored.await;
    }
  }

  /// Register an infallible subscriber
  ///
  /// If a value is already set, the callback is invoked immediately with it.
  pub fn on_change<F>(&self, callback: F)
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    self.try_on_change(move |value| {
      callback(value);
      Ok(())
    });
  }

  /// Register a fallible subscriber; errors are logged and swallowed
  pub fn try_on_change<F>(&self, callback: F)
  where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    let subscriber = Arc::new(Subscriber {
      callback: Arc::new(callback),
      last_seen: Mutex::new(None),
    });
    self.inner.state.lock().subscribers.push(subscriber.clone());

    // Replay outside of the scheduling path so late subscribers never miss the current value
    self.inner.deliver(&subscriber);
  }

  /// Forward every change into a channel
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.on_change(move |value| {
      // Receiver gone means the consumer lost interest
      let _ = tx.send(value.clone());
    });
    rx
  }
}

impl<T> Inner<T>
where
  T: Clone + PartialEq,
{
  fn flush(&self) {
    let subscribers = self.state.lock().subscribers.clone();
    for subscriber in &subscribers {
      self.deliver(subscriber);
    }
  }

  fn deliver(&self, subscriber: &Subscriber<T>) {
    // Held across the callback so deliveries to one subscriber never interleave
    let mut last_seen = subscriber.last_seen.lock();
    let Some(value) = self.state.lock().value.clone() else {
      return;
    };
    if last_seen.as_ref() == Some(&value) {
      return;
    }
    *last_seen = Some(value.clone());

    if let Err(e) = (subscriber.callback)(&value) {
      tracing::error!(signal = self.name, "Subscriber failed: {e:#}");
    }
  }
}

#[cfg(test)]
impl<T> ValueEmitter<T> {
  pub(crate) fn subscriber_count(&self) -> usize {
    self.inner.state.lock().subscribers.len()
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ValueEmitter<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("ValueEmitter")
      .field("name", &self.inner.name)
      .field("value", &state.value)
      .field("subscribers", &state.subscribers.len())
      .finish()
  }
}
