use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A single todo record as persisted in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
  pub id: String,
  pub title: String,
  pub completed: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a todo. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoInput {
  pub title: String,
  pub completed: bool,
}

impl TodoInput {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      completed: false,
    }
  }
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
  pub title: Option<String>,
  pub completed: Option<bool>,
}

impl TodoPatch {
  pub fn completed(completed: bool) -> Self {
    Self {
      completed: Some(completed),
      ..Self::default()
    }
  }
}

impl Todo {
  pub(crate) fn create(input: TodoInput) -> Result<Self, StoreError> {
    if input.title.is_empty() {
      return Err(StoreError::EmptyTitle);
    }
    let now = now();
    Ok(Self {
      id: uuid::Uuid::new_v4().to_string(),
      title: input.title,
      completed: input.completed,
      created_at: now,
      updated_at: now,
    })
  }

  /// Merge a patch into this record, always moving `updated_at` forward.
  pub(crate) fn apply(&mut self, patch: TodoPatch) -> Result<(), StoreError> {
    if let Some(title) = patch.title {
      if title.is_empty() {
        return Err(StoreError::EmptyTitle);
      }
      self.title = title;
    }
    if let Some(completed) = patch.completed {
      self.completed = completed;
    }
    self.updated_at = next_after(self.updated_at);
    Ok(())
  }
}

/// Current time at millisecond precision, matching the stored ISO-8601 form.
pub(crate) fn now() -> DateTime<Utc> {
  Utc::now().trunc_subsecs(3)
}

/// Now, or one millisecond past `previous` if the clock has not moved on.
pub(crate) fn next_after(previous: DateTime<Utc>) -> DateTime<Utc> {
  let now = now();
  if now > previous {
    now
  } else {
    previous + Duration::milliseconds(1)
  }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
  DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
