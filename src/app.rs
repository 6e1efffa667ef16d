use crate::agent::{
  AgentConfig, AgentState, CacheStorage, CachingAgent, FetchOutcome, HttpNetwork, Network, Request,
  Response, ResponseSource, SqliteCacheStorage, SyncReport,
};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::connectivity::{Connectivity, ConnectivityHandle, ConnectivityMonitor, HttpProbe, Probe};
use crate::error::StoreError;
use crate::lifecycle::{LifecycleController, LocalAgentHost};
use crate::todo::{Todo, TodoInput, TodoPatch, TodoStore};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

const OFFLINE_BANNER: &str =
  "You are currently offline. Changes will be synced when you're back online.";

/// Snapshot printed by `status`.
#[derive(Debug, Clone)]
pub struct Status {
  pub connectivity: Option<Connectivity>,
  pub ready: bool,
  pub agent: AgentState,
  pub registered: bool,
  pub caches: Vec<(String, Vec<String>)>,
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Local record store
  store: TodoStore,

  /// Cache buckets shared with the agent
  storage: Arc<dyn CacheStorage>,

  network: Arc<dyn Network>,

  host: Arc<LocalAgentHost>,

  lifecycle: LifecycleController,

  connectivity: Arc<ConnectivityMonitor>,

  /// Mounted for the app's lifetime; drives the offline banner
  online: ConnectivityHandle,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let store = TodoStore::open(data_dir.join("todos.db"));
    let storage = Arc::new(SqliteCacheStorage::open(&data_dir.join("cache.db"))?);
    let network = Arc::new(HttpNetwork::new(config.origin.clone())?);
    Self::with_parts(config, store, storage, network)
  }

  fn with_parts(
    config: Config,
    store: TodoStore,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
  ) -> Result<Self> {
    let agent_config = AgentConfig::from_config(&config)
      .map_err(|e| eyre!("Invalid origin or path in configuration: {}", e))?;
    let agent = Arc::new(CachingAgent::new(
      agent_config,
      Arc::clone(&storage),
      Arc::clone(&network),
    ));
    let host = Arc::new(LocalAgentHost::new(
      agent,
      config.agent.enabled,
      config.agent.notifications,
    ));
    let lifecycle = LifecycleController::new(host.clone(), config.sync.tag.clone());
    let connectivity = Arc::new(ConnectivityMonitor::new());
    let online = connectivity.mount();

    Ok(Self {
      config,
      store,
      storage,
      network,
      host,
      lifecycle,
      connectivity,
      online,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    // Nothing is loaded until the agent reports ready
    self.lifecycle.start().await;

    if command.loads_todos() {
      self.refresh_connectivity().await;
      if !self.online.is_online() {
        println!("{}", OFFLINE_BANNER);
      }
    }

    match command {
      Command::List => print_todos(&self.load_todos().await?),
      Command::Add { title } => {
        let todo = self.add_todo(&title).await?;
        println!("Added {}", todo.id);
        print_todos(&self.load_todos().await?);
      }
      Command::Toggle { id } => {
        let todo = self.toggle_todo(&id).await?;
        println!(
          "Marked {:?} as {}",
          todo.title,
          if todo.completed { "complete" } else { "incomplete" }
        );
        print_todos(&self.load_todos().await?);
      }
      Command::Delete { id } => {
        self.delete_todo(&id).await?;
        print_todos(&self.load_todos().await?);
      }
      Command::Reset => {
        self.reset().await?;
        println!("All todos removed");
      }
      Command::Fetch { path, navigate } => {
        let (response, source) = self.fetch(&path, navigate).await?;
        let source = match source {
          Some(ResponseSource::Network) => "network (via agent)",
          Some(ResponseSource::Cache) => "cache",
          Some(ResponseSource::Offline) => "cache (offline fallback)",
          None => "network",
        };
        println!("{} {} from {}", response.status, response.url, source);
        println!("{}", response.text());
      }
      Command::Sync => {
        let reports = self.sync().await;
        if reports.is_empty() {
          println!("No background sync registered");
        }
        for report in reports {
          print_report(&report);
        }
      }
      Command::Push { message } => {
        let outcome = self.host.agent().handle_push(message.as_deref()).await;
        println!(
          "{}: {}{}",
          outcome.notification.title,
          outcome.notification.body,
          if outcome.shown { "" } else { " (not shown: permission not granted)" }
        );
      }
      Command::Status => {
        self.refresh_connectivity().await;
        print_status(&self.status()?);
      }
      Command::Watch => self.watch().await?,
    }

    Ok(())
  }

  /// Take one connectivity reading from the origin.
  async fn refresh_connectivity(&self) -> Connectivity {
    let probe = HttpProbe::new(Arc::clone(&self.network), self.config.origin.clone());
    let reading = probe.check().await;
    self.connectivity.set(reading);
    reading
  }

  async fn load_todos(&self) -> Result<Vec<Todo>> {
    self.store.get_all().await.map_err(|e| {
      error!(error = %e, "error loading todos");
      e.into()
    })
  }

  async fn add_todo(&self, words: &[String]) -> Result<Todo> {
    let title = commands::normalize_title(words).ok_or(StoreError::EmptyTitle)?;
    self
      .store
      .add(TodoInput::new(title))
      .await
      .map_err(|e| {
        error!(error = %e, "error adding todo");
        e.into()
      })
  }

  async fn toggle_todo(&self, id: &str) -> Result<Todo> {
    let todos = self.load_todos().await?;
    let Some(todo) = todos.iter().find(|t| t.id == id) else {
      error!(id, "error toggling todo: not found");
      return Err(StoreError::NotFound(id.to_string()).into());
    };

    self
      .store
      .update(id, TodoPatch::completed(!todo.completed))
      .await
      .map_err(|e| {
        error!(error = %e, "error toggling todo");
        e.into()
      })
  }

  async fn delete_todo(&self, id: &str) -> Result<()> {
    self.store.delete(id).await.map_err(|e| {
      error!(error = %e, "error deleting todo");
      e.into()
    })
  }

  async fn reset(&self) -> Result<()> {
    self.store.reset_all().await.map_err(|e| {
      error!(error = %e, "error resetting database");
      e.into()
    })
  }

  /// Send a request through the agent; passed-through requests go to the network directly.
  async fn fetch(&self, path: &str, navigate: bool) -> Result<(Response, Option<ResponseSource>)> {
    let url = self
      .config
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {:?}: {}", path, e))?;
    let request = if navigate {
      Request::navigate(url)
    } else {
      Request::get(url)
    };

    match self.host.agent().handle_fetch(&request).await {
      FetchOutcome::Respond(served) => {
        debug!(url = %request.url, source = ?served.source, cached_at = ?served.cached_at, "served by agent");
        Ok((served.response, Some(served.source)))
      }
      FetchOutcome::Passthrough => Ok((self.network.fetch(&request).await?, None)),
      FetchOutcome::Failed(e) => Err(e.into()),
    }
  }

  async fn sync(&self) -> Vec<SyncReport> {
    self.host.fire_syncs().await
  }

  fn status(&self) -> Result<Status> {
    let mut caches = Vec::new();
    for name in self.storage.keys()? {
      let urls = self.storage.urls(&name)?;
      caches.push((name, urls));
    }

    Ok(Status {
      connectivity: self.connectivity.current(),
      ready: self.lifecycle.is_ready(),
      agent: self.host.agent().state(),
      registered: self.lifecycle.is_registered(),
      caches,
    })
  }

  /// Follow connectivity until interrupted, syncing whenever the origin comes back.
  async fn watch(&self) -> Result<()> {
    let mut handle = self.connectivity.mount();
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new(
      Arc::clone(&self.network),
      self.config.origin.clone(),
    ));
    self
      .connectivity
      .spawn_poller(probe, self.config.connectivity.poll_interval());

    info!(origin = %self.config.origin, "watching connectivity");
    println!("Watching {} (Ctrl-C to stop)", self.config.origin);

    let mut was_online = handle.is_online();
    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        changed = handle.changed() => {
          let Some(online) = changed else { break };
          if online && !was_online {
            println!("Back online");
            for report in self.sync().await {
              print_report(&report);
            }
          } else if !online {
            println!("{}", OFFLINE_BANNER);
          }
          was_online = online;
        }
      }
    }

    self.lifecycle.teardown().await;
    Ok(())
  }
}

fn print_todos(todos: &[Todo]) {
  if todos.is_empty() {
    println!("No todos yet. Add one with `otodo add <title>`.");
    return;
  }
  for todo in todos {
    let mark = if todo.completed { "x" } else { " " };
    println!("[{}] {}  {}", mark, todo.id, todo.title);
  }
}

fn print_report(report: &SyncReport) {
  println!(
    "Synced {}/{} todos{}",
    report.delivered,
    report.attempted,
    if report.is_clean() { "" } else { " (some failed, see log)" }
  );
}

fn print_status(status: &Status) {
  let connectivity = match status.connectivity {
    Some(Connectivity::Online) => "online",
    Some(Connectivity::Offline) => "offline",
    None => "unknown",
  };
  println!("Connectivity: {}", connectivity);
  println!(
    "Agent: {:?}{}",
    status.agent,
    if status.registered { "" } else { " (not registered)" }
  );
  println!("Ready: {}", status.ready);
  for (name, urls) in &status.caches {
    println!("Cache {} ({} entries)", name, urls.len());
    for url in urls {
      println!("  {}", url);
    }
  }
}
