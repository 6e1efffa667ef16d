//! Online/offline tracking.
//!
//! The monitor owns the current reading; components mount a handle to follow
//! it and unmount by dropping the handle. Until the first real reading arrives
//! every handle reports online.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::agent::{Network, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// Source of live connectivity readings.
#[async_trait]
pub trait Probe: Send + Sync {
  async fn check(&self) -> Connectivity;
}

/// Probe that considers the origin reachable if a HEAD request gets any response.
pub struct HttpProbe {
  network: Arc<dyn Network>,
  url: Url,
}

impl HttpProbe {
  pub fn new(network: Arc<dyn Network>, url: Url) -> Self {
    Self { network, url }
  }
}

#[async_trait]
impl Probe for HttpProbe {
  async fn check(&self) -> Connectivity {
    match self.network.fetch(&Request::head(self.url.clone())).await {
      Ok(_) => Connectivity::Online,
      Err(e) => {
        debug!(error = %e, "connectivity probe failed");
        Connectivity::Offline
      }
    }
  }
}

pub struct ConnectivityMonitor {
  tx: watch::Sender<Option<Connectivity>>,
  poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(None);
    Self {
      tx,
      poller: Mutex::new(None),
    }
  }

  /// Record a reading. Listeners are only woken when the status changes.
  pub fn set(&self, status: Connectivity) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == Some(status) {
        false
      } else {
        *current = Some(status);
        true
      }
    });
    if changed {
      info!(?status, "connectivity changed");
    }
    changed
  }

  /// Last real reading, if any.
  pub fn current(&self) -> Option<Connectivity> {
    *self.tx.borrow()
  }

  /// Start following the status.
  pub fn mount(&self) -> ConnectivityHandle {
    ConnectivityHandle {
      rx: self.tx.subscribe(),
    }
  }

  /// Number of mounted handles.
  #[cfg(test)]
  pub fn listeners(&self) -> usize {
    self.tx.receiver_count()
  }

  /// Probe at `interval` and feed readings into the monitor until it is dropped.
  pub fn spawn_poller(self: &Arc<Self>, probe: Arc<dyn Probe>, interval: Duration) {
    let monitor: Weak<Self> = Arc::downgrade(self);
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let reading = probe.check().await;
        match monitor.upgrade() {
          Some(monitor) => {
            monitor.set(reading);
          }
          None => break,
        }
      }
    });

    if let Ok(mut slot) = self.poller.lock() {
      if let Some(previous) = slot.replace(handle) {
        previous.abort();
      }
    }
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    if let Ok(mut slot) = self.poller.lock() {
      if let Some(handle) = slot.take() {
        handle.abort();
      }
    }
  }
}

/// A mounted view of the connectivity status.
pub struct ConnectivityHandle {
  rx: watch::Receiver<Option<Connectivity>>,
}

impl ConnectivityHandle {
  /// Optimistic: online until a real reading says otherwise.
  pub fn is_online(&self) -> bool {
    *self.rx.borrow() != Some(Connectivity::Offline)
  }

  /// Wait for the next status change. `None` once the monitor is gone.
  pub async fn changed(&mut self) -> Option<bool> {
    self.rx.changed().await.ok()?;
    let online = *self.rx.borrow_and_update() != Some(Connectivity::Offline);
    Some(online)
  }
}
