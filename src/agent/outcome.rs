//! Results of intercepting a request.

use chrono::{DateTime, Utc};

use super::http::Response;
use crate::error::AgentError;

/// A response produced by the agent, with metadata about where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Fresh response from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Cache hit on the cache-first path.
  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed, serving the cached fallback.
  pub fn offline(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Network unavailable, cached root document served instead
  Offline,
}

/// What the agent did with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not handled; the caller goes to the network itself.
  Passthrough,
  Respond(Served),
  /// Handled, but no response could be produced.
  Failed(AgentError),
}

impl FetchOutcome {
  #[cfg(test)]
  pub fn served(&self) -> Option<&Served> {
    match self {
      FetchOutcome::Respond(served) => Some(served),
      _ => None,
    }
  }
}
