//! SQLite-backed record store.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::types::{format_timestamp, parse_timestamp, Todo, TodoInput, TodoPatch};
use crate::error::StoreError;

/// Bumped only to trigger first-time table creation.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS todos (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    completed INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const SELECT_COLUMNS: &str = "SELECT id, title, completed, created_at, updated_at FROM todos";

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  Memory,
}

/// Owner of the store's connection handle.
///
/// The handle is opened on first use and cached. A reset closes it and leaves
/// the slot empty, so the next operation opens a fresh connection.
pub struct StoreContext {
  location: Location,
  conn: Mutex<Option<Connection>>,
}

impl StoreContext {
  fn new(location: Location) -> Self {
    Self {
      location,
      conn: Mutex::new(None),
    }
  }

  fn open(&self) -> Result<Connection, StoreError> {
    let conn = match &self.location {
      Location::File(path) => {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)?;
        }
        Connection::open(path)?
      }
      Location::Memory => Connection::open_in_memory()?,
    };

    run_migrations(&conn)?;
    debug!(location = ?self.location, "opened todo store");
    Ok(conn)
  }

  /// Run `f` against the cached connection, opening it first if needed.
  fn with_connection<T>(
    &self,
    f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let mut slot = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    let mut conn = match slot.take() {
      Some(conn) => conn,
      None => self.open()?,
    };
    let result = f(&mut conn);
    *slot = Some(conn);
    result
  }

  /// Like `with_connection`, but on success the connection is closed and the
  /// slot left empty. A failed `f` keeps the connection cached.
  fn with_connection_then_close<T>(
    &self,
    f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let mut slot = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    let mut conn = match slot.take() {
      Some(conn) => conn,
      None => self.open()?,
    };
    let result = f(&mut conn);
    if result.is_err() {
      *slot = Some(conn);
    } else if let Err((_, e)) = conn.close() {
      debug!(error = %e, "closing todo store connection failed");
    }
    result
  }

  #[cfg(test)]
  fn is_open(&self) -> bool {
    self.conn.lock().map(|slot| slot.is_some()).unwrap_or(false)
  }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if version > SCHEMA_VERSION {
    return Err(StoreError::SchemaVersion {
      found: version,
      supported: SCHEMA_VERSION,
    });
  }
  if version < SCHEMA_VERSION {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  }
  Ok(())
}

/// Raw row as read from SQLite, before timestamp parsing.
struct TodoRow {
  id: String,
  title: String,
  completed: bool,
  created_at: String,
  updated_at: String,
}

impl TodoRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      title: row.get(1)?,
      completed: row.get(2)?,
      created_at: row.get(3)?,
      updated_at: row.get(4)?,
    })
  }

  fn into_todo(self) -> Result<Todo, StoreError> {
    let corrupt = |e: chrono::ParseError| StoreError::Corrupt {
      id: self.id.clone(),
      reason: e.to_string(),
    };
    let created_at = parse_timestamp(&self.created_at).map_err(corrupt)?;
    let updated_at = parse_timestamp(&self.updated_at).map_err(corrupt)?;
    Ok(Todo {
      id: self.id,
      title: self.title,
      completed: self.completed,
      created_at,
      updated_at,
    })
  }
}

/// Asynchronous handle to the todo record store.
#[derive(Clone)]
pub struct TodoStore {
  ctx: Arc<StoreContext>,
}

impl TodoStore {
  /// Store backed by a database file. Nothing is opened until first use.
  pub fn open(path: impl AsRef<Path>) -> Self {
    Self {
      ctx: Arc::new(StoreContext::new(Location::File(path.as_ref().to_path_buf()))),
    }
  }

  /// Store backed by a private in-memory database.
  #[cfg(test)]
  pub fn in_memory() -> Self {
    Self {
      ctx: Arc::new(StoreContext::new(Location::Memory)),
    }
  }

  async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&StoreContext) -> Result<T, StoreError> + Send + 'static,
  {
    let ctx = Arc::clone(&self.ctx);
    tokio::task::spawn_blocking(move || f(&ctx)).await?
  }

  /// Create a todo with a fresh id and timestamps.
  pub async fn add(&self, input: TodoInput) -> Result<Todo, StoreError> {
    let todo = Todo::create(input)?;
    self
      .blocking(move |ctx| {
        ctx.with_connection(|conn| {
          let tx = conn.transaction()?;
          tx.execute(
            "INSERT INTO todos (id, title, completed, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
              todo.id,
              todo.title,
              todo.completed,
              format_timestamp(&todo.created_at),
              format_timestamp(&todo.updated_at),
            ],
          )?;
          tx.commit()?;
          debug!(id = %todo.id, "added todo");
          Ok(todo)
        })
      })
      .await
  }

  /// All todos in the engine's native order.
  pub async fn get_all(&self) -> Result<Vec<Todo>, StoreError> {
    self
      .blocking(|ctx| {
        ctx.with_connection(|conn| {
          let tx = conn.transaction()?;
          let rows = {
            let mut stmt = tx.prepare(&format!("{} ORDER BY rowid", SELECT_COLUMNS))?;
            let rows = stmt
              .query_map([], TodoRow::from_row)?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
          };
          tx.commit()?;
          rows.into_iter().map(TodoRow::into_todo).collect()
        })
      })
      .await
  }

  /// Merge `patch` into the todo with `id`. Read and write share one transaction.
  pub async fn update(&self, id: &str, patch: TodoPatch) -> Result<Todo, StoreError> {
    let id = id.to_string();
    self
      .blocking(move |ctx| {
        ctx.with_connection(|conn| {
          let tx = conn.transaction()?;
          let row = tx
            .query_row(
              &format!("{} WHERE id = ?", SELECT_COLUMNS),
              params![id],
              TodoRow::from_row,
            )
            .optional()?;
          let mut todo = match row {
            Some(row) => row.into_todo()?,
            None => return Err(StoreError::NotFound(id)),
          };

          todo.apply(patch)?;

          tx.execute(
            "UPDATE todos SET title = ?, completed = ?, updated_at = ? WHERE id = ?",
            params![
              todo.title,
              todo.completed,
              format_timestamp(&todo.updated_at),
              todo.id,
            ],
          )?;
          tx.commit()?;
          debug!(id = %todo.id, completed = todo.completed, "updated todo");
          Ok(todo)
        })
      })
      .await
  }

  /// Remove the todo with `id`. Missing ids are not an error.
  pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
    let id = id.to_string();
    self
      .blocking(move |ctx| {
        ctx.with_connection(|conn| {
          let tx = conn.transaction()?;
          let removed = tx.execute("DELETE FROM todos WHERE id = ?", params![id])?;
          tx.commit()?;
          debug!(id = %id, removed, "deleted todo");
          Ok(())
        })
      })
      .await
  }

  /// Remove every todo in a single transaction, then drop the cached connection.
  pub async fn reset_all(&self) -> Result<(), StoreError> {
    self
      .blocking(|ctx| {
        ctx.with_connection_then_close(|conn| {
          let tx = conn.transaction()?;
          let removed = tx.execute("DELETE FROM todos", [])?;
          tx.commit()?;
          info!(removed, "reset todo store");
          Ok(())
        })
      })
      .await
  }

  #[cfg(test)]
  fn is_connected(&self) -> bool {
    self.ctx.is_open()
  }
}
