//! Background sync of pending todos.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::todo::Todo;

/// Source of todos waiting to be pushed to the server.
#[async_trait]
pub trait PendingTodos: Send + Sync {
  async fn todos_to_sync(&self) -> Result<Vec<Todo>, StoreError>;
}

/// Nothing is ever pending. Records carry no dirty flag yet, so there is no
/// way to tell which ones the server has not seen.
pub struct NoPendingTodos;

#[async_trait]
impl PendingTodos for NoPendingTodos {
  async fn todos_to_sync(&self) -> Result<Vec<Todo>, StoreError> {
    Ok(Vec::new())
  }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub delivered: usize,
  /// `(todo id, error message)` for each failed POST
  pub failures: Vec<(String, String)>,
}

impl SyncReport {
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }
}
