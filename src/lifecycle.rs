//! Registration of the caching agent and readiness reporting.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::agent::{AgentState, CachingAgent, SyncReport};
use crate::config::NotificationPermission;
use crate::error::AgentError;

/// Environment capable of hosting the caching agent.
#[async_trait]
pub trait AgentHost: Send + Sync {
  /// Whether the environment can run the agent at all.
  fn is_supported(&self) -> bool;

  async fn register(&self) -> Result<(), AgentError>;

  async fn wait_until_active(&self) -> Result<(), AgentError>;

  async fn request_notification_permission(&self) -> NotificationPermission;

  async fn register_sync(&self, tag: &str) -> Result<(), AgentError>;

  async fn unregister(&self) -> Result<(), AgentError>;
}

/// Hosts a [`CachingAgent`] inside this process.
pub struct LocalAgentHost {
  agent: Arc<CachingAgent>,
  enabled: bool,
  permission: NotificationPermission,
  sync_tags: Mutex<BTreeSet<String>>,
}

impl LocalAgentHost {
  pub fn new(agent: Arc<CachingAgent>, enabled: bool, permission: NotificationPermission) -> Self {
    Self {
      agent,
      enabled,
      permission,
      sync_tags: Mutex::new(BTreeSet::new()),
    }
  }

  pub fn agent(&self) -> &Arc<CachingAgent> {
    &self.agent
  }

  pub fn sync_tags(&self) -> Vec<String> {
    self
      .sync_tags
      .lock()
      .map(|tags| tags.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Run every registered sync task, as the platform does on reconnection.
  pub async fn fire_syncs(&self) -> Vec<SyncReport> {
    let mut reports = Vec::new();
    for tag in self.sync_tags() {
      if let Some(report) = self.agent.handle_sync(&tag).await {
        reports.push(report);
      }
    }
    reports
  }
}

#[async_trait]
impl AgentHost for LocalAgentHost {
  fn is_supported(&self) -> bool {
    self.enabled
  }

  async fn register(&self) -> Result<(), AgentError> {
    if self.agent.is_installed()? {
      info!(cache = %self.agent.config().cache_name, "agent already installed");
      self.agent.resume_installed();
    } else {
      self.agent.install().await?;
    }

    if self.agent.waiting_skipped() {
      let agent = Arc::clone(&self.agent);
      tokio::spawn(async move {
        agent.activate().await;
      });
    }
    Ok(())
  }

  async fn wait_until_active(&self) -> Result<(), AgentError> {
    self.agent.wait_until_active().await
  }

  async fn request_notification_permission(&self) -> NotificationPermission {
    self.agent.set_notification_permission(self.permission);
    self.permission
  }

  async fn register_sync(&self, tag: &str) -> Result<(), AgentError> {
    if self.agent.state() != AgentState::Activated {
      return Err(AgentError::Install(format!(
        "cannot register sync tag {} before activation",
        tag
      )));
    }
    self
      .sync_tags
      .lock()
      .map_err(|_| AgentError::Poisoned)?
      .insert(tag.to_string());
    Ok(())
  }

  async fn unregister(&self) -> Result<(), AgentError> {
    self.agent.unregister();
    self
      .sync_tags
      .lock()
      .map_err(|_| AgentError::Poisoned)?
      .clear();
    Ok(())
  }
}

/// Registers the agent on start and reports readiness to the UI.
pub struct LifecycleController {
  host: Arc<dyn AgentHost>,
  sync_tag: String,
  ready: watch::Sender<bool>,
  registered: AtomicBool,
}

impl LifecycleController {
  pub fn new(host: Arc<dyn AgentHost>, sync_tag: impl Into<String>) -> Self {
    let (ready, _) = watch::channel(false);
    Self {
      host,
      sync_tag: sync_tag.into(),
      ready,
      registered: AtomicBool::new(false),
    }
  }

  pub fn is_ready(&self) -> bool {
    *self.ready.borrow()
  }

  #[cfg(test)]
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.ready.subscribe()
  }

  /// Whether registration succeeded and teardown will unregister.
  pub fn is_registered(&self) -> bool {
    self.registered.load(Ordering::SeqCst)
  }

  /// Bring the agent up. Always ends ready, even when registration fails.
  pub async fn start(&self) {
    if !self.host.is_supported() {
      info!("caching agent unavailable, continuing without it");
      self.ready.send_replace(true);
      return;
    }

    match self.register().await {
      Ok(()) => self.registered.store(true, Ordering::SeqCst),
      Err(e) => error!(error = %e, "caching agent registration failed"),
    }
    self.ready.send_replace(true);
  }

  async fn register(&self) -> Result<(), AgentError> {
    self.host.register().await?;
    self.host.wait_until_active().await?;
    info!("caching agent active");

    let permission = self.host.request_notification_permission().await;
    info!(?permission, "notification permission");

    if let Err(e) = self.host.register_sync(&self.sync_tag).await {
      warn!(tag = %self.sync_tag, error = %e, "background sync registration failed");
    } else {
      info!(tag = %self.sync_tag, "background sync registered");
    }
    Ok(())
  }

  /// Unregister the agent if `start` registered it.
  pub async fn teardown(&self) {
    if !self.registered.swap(false, Ordering::SeqCst) {
      return;
    }
    match self.host.unregister().await {
      Ok(()) => info!("caching agent unregistered"),
      Err(e) => error!(error = %e, "failed to unregister caching agent"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::{AgentConfig, FakeNetwork, SqliteCacheStorage};
  use crate::config::Config;
  use std::sync::atomic::AtomicUsize;

  const ROOT: &str = "http://localhost:3000/";
  const MANIFEST: &str = "http://localhost:3000/manifest.json";

  fn local_host(network: Arc<FakeNetwork>, storage: Arc<SqliteCacheStorage>) -> Arc<LocalAgentHost> {
    let config = AgentConfig::from_config(&Config::default()).unwrap();
    let agent = Arc::new(CachingAgent::new(config, storage, network));
    Arc::new(LocalAgentHost::new(
      agent,
      true,
      NotificationPermission::Granted,
    ))
  }

  fn online_network() -> Arc<FakeNetwork> {
    let network = Arc::new(FakeNetwork::new());
    network.route(ROOT, 200, b"<html></html>");
    network.route(MANIFEST, 200, b"{}");
    network
  }

  #[tokio::test]
  async fn test_start_registers_and_becomes_ready() {
    let storage = Arc::new(SqliteCacheStorage::in_memory().unwrap());
    let host = local_host(online_network(), storage);
    let controller = LifecycleController::new(host.clone(), "sync-todos");
    let mut ready = controller.subscribe();

    controller.start().await;

    assert!(controller.is_ready());
    assert!(controller.is_registered());
    assert!(*ready.borrow_and_update());
    assert_eq!(host.agent().state(), AgentState::Activated);
    assert_eq!(host.sync_tags(), vec!["sync-todos".to_string()]);
  }

  #[tokio::test]
  async fn test_second_start_reuses_installed_cache() {
    let storage = Arc::new(SqliteCacheStorage::in_memory().unwrap());
    let network = online_network();
    LifecycleController::new(local_host(network.clone(), storage.clone()), "sync-todos")
      .start()
      .await;

    network.set_offline(true);
    let host = local_host(network.clone(), storage);
    let controller = LifecycleController::new(host.clone(), "sync-todos");
    controller.start().await;

    assert!(controller.is_registered());
    assert_eq!(host.agent().state(), AgentState::Activated);
    assert_eq!(network.request_count(ROOT), 1);
  }

  #[tokio::test]
  async fn test_registration_failure_still_reports_ready() {
    let storage = Arc::new(SqliteCacheStorage::in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    network.set_offline(true);
    let host = local_host(network, storage);
    let controller = LifecycleController::new(host.clone(), "sync-todos");

    controller.start().await;

    assert!(controller.is_ready());
    assert!(!controller.is_registered());
    assert_eq!(host.agent().state(), AgentState::Redundant);

    // Nothing to unregister
    controller.teardown().await;
    assert_eq!(host.agent().state(), AgentState::Redundant);
  }

  #[tokio::test]
  async fn test_teardown_unregisters_after_success() {
    let storage = Arc::new(SqliteCacheStorage::in_memory().unwrap());
    let host = local_host(online_network(), storage);
    let controller = LifecycleController::new(host.clone(), "sync-todos");
    controller.start().await;

    controller.teardown().await;

    assert!(!controller.is_registered());
    assert_eq!(host.agent().state(), AgentState::Redundant);
    assert!(host.sync_tags().is_empty());
  }

  #[tokio::test]
  async fn test_fire_syncs_runs_registered_tags() {
    let storage = Arc::new(SqliteCacheStorage::in_memory().unwrap());
    let host = local_host(online_network(), storage);
    assert!(host.fire_syncs().await.is_empty());

    LifecycleController::new(host.clone(), "sync-todos")
      .start()
      .await;
    let reports = host.fire_syncs().await;
    assert_eq!(reports, vec![SyncReport::default()]);
  }

  /// Host whose optional steps all fail and which counts unregister calls.
  #[derive(Default)]
  struct FlakyHost {
    supported: bool,
    unregistered: AtomicUsize,
  }

  #[async_trait]
  impl AgentHost for FlakyHost {
    fn is_supported(&self) -> bool {
      self.supported
    }
    async fn register(&self) -> Result<(), AgentError> {
      Ok(())
    }
    async fn wait_until_active(&self) -> Result<(), AgentError> {
      Ok(())
    }
    async fn request_notification_permission(&self) -> NotificationPermission {
      NotificationPermission::Denied
    }
    async fn register_sync(&self, _tag: &str) -> Result<(), AgentError> {
      Err(AgentError::Install("sync unsupported".to_string()))
    }
    async fn unregister(&self) -> Result<(), AgentError> {
      self.unregistered.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_optional_step_failures_do_not_block() {
    let host = Arc::new(FlakyHost {
      supported: true,
      ..FlakyHost::default()
    });
    let controller = LifecycleController::new(host.clone(), "sync-todos");
    controller.start().await;

    assert!(controller.is_ready());
    assert!(controller.is_registered());

    controller.teardown().await;
    controller.teardown().await;
    assert_eq!(host.unregistered.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unsupported_environment_is_ready_immediately() {
    let host = Arc::new(FlakyHost::default());
    let controller = LifecycleController::new(host.clone(), "sync-todos");
    controller.start().await;

    assert!(controller.is_ready());
    assert!(!controller.is_registered());
    controller.teardown().await;
    assert_eq!(host.unregistered.load(Ordering::SeqCst), 0);
  }
}
