//! The caching agent: install, activate, fetch interception, sync and push.

use futures::future::{join_all, try_join_all};
use futures::FutureExt;
use reqwest::Method;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use super::http::{AllowList, Request, Response};
use super::notify::{LogNotifier, Notification, Notifier};
use super::outcome::{FetchOutcome, Served};
use super::storage::CacheStorage;
use super::sync::{NoPendingTodos, PendingTodos, SyncReport};
use super::network::Network;
use crate::config::{Config, NotificationPermission, NotificationSettings};
use crate::error::AgentError;
use crate::todo::Todo;

/// Settings injected into the agent's lifecycle handlers.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  /// Version-tagged bucket name; every other bucket is dropped on activation
  pub cache_name: String,
  pub allow_list: AllowList,
  /// URLs fetched and stored during install
  pub precache: Vec<Url>,
  /// Root document served to navigations while offline
  pub root: Url,
  pub sync_tag: String,
  pub sync_url: Url,
  pub notification: NotificationSettings,
}

impl AgentConfig {
  pub fn from_config(config: &Config) -> Result<Self, url::ParseError> {
    let allow_list = AllowList::new(config.origin.clone(), config.agent.cached_paths.clone());
    Ok(Self {
      cache_name: config.agent.cache_name.clone(),
      precache: allow_list.urls()?,
      allow_list,
      root: config.origin.join("/")?,
      sync_tag: config.sync.tag.clone(),
      sync_url: config.origin.join(&config.sync.endpoint)?,
      notification: config.notification.clone(),
    })
  }
}

/// Lifecycle position of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Failed to install, or unregistered
  Redundant,
}

/// Result of handling a push message.
#[derive(Debug, Clone)]
pub struct PushOutcome {
  pub notification: Notification,
  pub shown: bool,
}

pub struct CachingAgent {
  config: AgentConfig,
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  pending: Arc<dyn PendingTodos>,
  notifier: Arc<dyn Notifier>,
  state: watch::Sender<AgentState>,
  waiting_skipped: AtomicBool,
  controlling: AtomicBool,
  notifications_granted: AtomicBool,
}

impl CachingAgent {
  pub fn new(
    config: AgentConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
  ) -> Self {
    let (state, _) = watch::channel(AgentState::Parsed);
    Self {
      config,
      storage,
      network,
      pending: Arc::new(NoPendingTodos),
      notifier: Arc::new(LogNotifier),
      state,
      waiting_skipped: AtomicBool::new(false),
      controlling: AtomicBool::new(false),
      notifications_granted: AtomicBool::new(false),
    }
  }

  #[cfg(test)]
  pub fn with_pending(mut self, pending: Arc<dyn PendingTodos>) -> Self {
    self.pending = pending;
    self
  }

  #[cfg(test)]
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn state(&self) -> AgentState {
    *self.state.borrow()
  }

  fn set_state(&self, state: AgentState) {
    debug!(?state, "agent state");
    self.state.send_replace(state);
  }

  /// Whether install asked to be activated without waiting.
  pub fn waiting_skipped(&self) -> bool {
    self.waiting_skipped.load(Ordering::SeqCst)
  }

  /// Whether the agent has claimed its clients and intercepts their fetches.
  pub fn is_controlling(&self) -> bool {
    self.controlling.load(Ordering::SeqCst)
  }

  pub fn set_notification_permission(&self, permission: NotificationPermission) {
    self
      .notifications_granted
      .store(permission == NotificationPermission::Granted, Ordering::SeqCst);
  }

  /// Wait until the agent is activated. Fails if it becomes redundant first.
  pub async fn wait_until_active(&self) -> Result<(), AgentError> {
    let mut rx = self.state.subscribe();
    let state = *rx
      .wait_for(|s| matches!(s, AgentState::Activated | AgentState::Redundant))
      .await
      .map_err(|_| AgentError::Install("agent state channel closed".to_string()))?;

    match state {
      AgentState::Activated => Ok(()),
      _ => Err(AgentError::Install(
        "agent became redundant before activating".to_string(),
      )),
    }
  }

  /// True when the current bucket already holds every precached URL.
  pub fn is_installed(&self) -> Result<bool, AgentError> {
    let stored = self.storage.urls(&self.config.cache_name)?;
    Ok(
      self
        .config
        .precache
        .iter()
        .all(|url| stored.iter().any(|s| s == url.as_str())),
    )
  }

  /// Adopt a bucket populated by an earlier install of the same version.
  pub fn resume_installed(&self) {
    self.waiting_skipped.store(true, Ordering::SeqCst);
    self.set_state(AgentState::Installed);
  }

  /// Fetch and store every precached URL. All-or-nothing.
  pub async fn install(&self) -> Result<(), AgentError> {
    self.set_state(AgentState::Installing);

    match self.precache().await {
      Ok(count) => {
        info!(cache = %self.config.cache_name, count, "agent installed");
        // Skip waiting: activate as soon as install finishes
        self.waiting_skipped.store(true, Ordering::SeqCst);
        self.set_state(AgentState::Installed);
        Ok(())
      }
      Err(e) => {
        error!(error = %e, "agent install failed");
        self.set_state(AgentState::Redundant);
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize, AgentError> {
    let fetches = self.config.precache.iter().map(|url| async move {
      let response = self
        .network
        .fetch(&Request::get(url.clone()))
        .await
        .map_err(|e| AgentError::Install(e.to_string()))?;
      if !response.is_ok() {
        return Err(AgentError::Install(format!(
          "{} returned status {}",
          url, response.status
        )));
      }
      Ok((url.clone(), response))
    });
    let entries = try_join_all(fetches).await?;

    self.storage.put_all(&self.config.cache_name, &entries)?;
    Ok(entries.len())
  }

  /// Drop stale buckets and take control of clients. Returns the dropped names.
  pub async fn activate(&self) -> Vec<String> {
    self.set_state(AgentState::Activating);

    let stale = match self.storage.keys() {
      Ok(names) => names
        .into_iter()
        .filter(|name| *name != self.config.cache_name)
        .collect(),
      Err(e) => {
        warn!(error = %e, "failed to list caches during activation");
        Vec::new()
      }
    };

    let mut dropped = Vec::new();
    for name in stale {
      match self.storage.delete(&name) {
        Ok(_) => {
          info!(cache = %name, "deleted stale cache");
          dropped.push(name);
        }
        Err(e) => warn!(cache = %name, error = %e, "failed to delete stale cache"),
      }
    }

    // Claim clients
    self.controlling.store(true, Ordering::SeqCst);
    self.set_state(AgentState::Activated);
    dropped
  }

  /// Stop intercepting and mark the agent redundant. Cached data is kept.
  pub fn unregister(&self) {
    self.controlling.store(false, Ordering::SeqCst);
    self.waiting_skipped.store(false, Ordering::SeqCst);
    self.set_state(AgentState::Redundant);
  }

  /// Intercept a request. Never panics and never returns an error to the caller.
  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    match AssertUnwindSafe(self.intercept(request)).catch_unwind().await {
      Ok(Ok(outcome)) => outcome,
      Ok(Err(e)) => {
        error!(url = %request.url, error = %e, "fetch interception failed");
        FetchOutcome::Failed(e)
      }
      Err(panic) => {
        let message = panic_message(panic);
        error!(url = %request.url, panic = %message, "fetch interception panicked");
        FetchOutcome::Failed(AgentError::Panicked(message))
      }
    }
  }

  async fn intercept(&self, request: &Request) -> Result<FetchOutcome, AgentError> {
    if !self.is_controlling() {
      return Ok(FetchOutcome::Passthrough);
    }

    if request.method != Method::GET {
      return Ok(FetchOutcome::Passthrough);
    }

    if !self.config.allow_list.allows(&request.url) {
      return Ok(FetchOutcome::Passthrough);
    }

    let served = if request.is_navigation() {
      self.navigate(request).await?
    } else {
      self.cache_first(request).await?
    };
    Ok(FetchOutcome::Respond(served))
  }

  /// Network first, falling back to the cached root document.
  async fn navigate(&self, request: &Request) -> Result<Served, AgentError> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(e) => {
        warn!(url = %request.url, error = %e, "navigation failed, trying cached root");
        match self.storage.match_url(&self.config.cache_name, &self.config.root)? {
          Some(cached) => Ok(Served::offline(cached.response, cached.cached_at)),
          None => Err(AgentError::Offline(request.url.to_string())),
        }
      }
    }
  }

  /// Cache first; on a miss fetch and store qualifying responses.
  async fn cache_first(&self, request: &Request) -> Result<Served, AgentError> {
    match self.storage.match_url(&self.config.cache_name, &request.url) {
      Ok(Some(cached)) => return Ok(Served::from_cache(cached.response, cached.cached_at)),
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, error = %e, "cache lookup failed, going to network"),
    }

    let response = self.network.fetch(request).await?;
    if response.is_cacheable() {
      self.store(&request.url, &response);
    } else {
      debug!(url = %request.url, status = response.status, kind = ?response.kind, "response not cached");
    }
    Ok(Served::from_network(response))
  }

  /// Store a fetched response. Failures are logged only.
  fn store(&self, url: &Url, response: &Response) {
    if let Err(e) = self.storage.put(&self.config.cache_name, url, response) {
      let err = AgentError::CacheWrite {
        cache: self.config.cache_name.clone(),
        url: url.to_string(),
        reason: e.to_string(),
      };
      error!(error = %err, "cache write failed");
    }
  }

  /// Run the sync task for `tag`. Returns `None` for tags this agent does not own.
  pub async fn handle_sync(&self, tag: &str) -> Option<SyncReport> {
    if tag != self.config.sync_tag {
      debug!(tag, "ignoring unknown sync tag");
      return None;
    }
    Some(self.sync_todos().await)
  }

  async fn sync_todos(&self) -> SyncReport {
    let todos = match self.pending.todos_to_sync().await {
      Ok(todos) => todos,
      Err(e) => {
        error!(error = %e, "error syncing todos");
        return SyncReport::default();
      }
    };

    let results = join_all(todos.iter().map(|todo| self.post_todo(todo))).await;

    let mut report = SyncReport {
      attempted: todos.len(),
      ..SyncReport::default()
    };
    for (todo, result) in todos.iter().zip(results) {
      match result {
        Ok(()) => report.delivered += 1,
        Err(e) => {
          error!(id = %todo.id, error = %e, "failed to sync todo");
          report.failures.push((todo.id.clone(), e.to_string()));
        }
      }
    }
    info!(
      attempted = report.attempted,
      delivered = report.delivered,
      "sync finished"
    );
    report
  }

  async fn post_todo(&self, todo: &Todo) -> Result<(), AgentError> {
    let request = Request::post_json(self.config.sync_url.clone(), todo)?;
    let response = self.network.fetch(&request).await?;
    debug!(id = %todo.id, status = response.status, "posted todo");
    Ok(())
  }

  /// Show a notification for a push message.
  pub async fn handle_push(&self, payload: Option<&str>) -> PushOutcome {
    let notification = Notification::for_push(&self.config.notification, payload);

    if !self.notifications_granted.load(Ordering::SeqCst) {
      warn!("notification permission not granted, dropping push");
      return PushOutcome {
        notification,
        shown: false,
      };
    }

    let shown = match self.notifier.show(&notification).await {
      Ok(()) => true,
      Err(e) => {
        error!(error = %e, "failed to show notification");
        false
      }
    };
    PushOutcome {
      notification,
      shown,
    }
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
