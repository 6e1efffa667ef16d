//! Error types for the record store and the caching agent.

use thiserror::Error;

/// Failures surfaced by the local record store.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The underlying SQLite operation failed or its transaction aborted.
  #[error("storage operation failed: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("todo not found: {0}")]
  NotFound(String),

  #[error("todo title must not be empty")]
  EmptyTitle,

  #[error("failed to prepare storage location: {0}")]
  Io(#[from] std::io::Error),

  #[error("storage task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  #[error("storage connection lock poisoned")]
  Poisoned,

  #[error("stored todo {id} is malformed: {reason}")]
  Corrupt { id: String, reason: String },

  #[error("database schema version {found} is newer than supported version {supported}")]
  SchemaVersion { found: i64, supported: i64 },
}

/// Failures inside the caching agent.
#[derive(Debug, Error)]
pub enum AgentError {
  #[error("network request to {url} failed: {reason}")]
  Network { url: String, reason: String },

  /// Storing a fetched response failed. Never blocks returning the response.
  #[error("failed to write {url} into cache {cache}: {reason}")]
  CacheWrite {
    cache: String,
    url: String,
    reason: String,
  },

  #[error("cache storage failed: {0}")]
  Cache(#[from] rusqlite::Error),

  #[error("offline and no cached copy of {0}")]
  Offline(String),

  #[error("installation failed: {0}")]
  Install(String),

  #[error("failed to serialize sync payload: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("cache storage lock poisoned")]
  Poisoned,

  #[error("failed to prepare cache location: {0}")]
  Io(#[from] std::io::Error),

  #[error("fetch handler panicked: {0}")]
  Panicked(String),
}

impl AgentError {
  pub fn network(url: impl ToString, reason: impl ToString) -> Self {
    AgentError::Network {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }
}
