use async_trait::async_trait;
use tracing::info;

use crate::config::NotificationSettings;
use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

impl Notification {
  /// Build a notification for a push message, falling back to the default body.
  pub fn for_push(settings: &NotificationSettings, payload: Option<&str>) -> Self {
    Self {
      title: settings.title.clone(),
      body: payload
        .map(str::to_string)
        .unwrap_or_else(|| settings.default_body.clone()),
      icon: settings.icon.clone(),
      badge: settings.badge.clone(),
    }
  }
}

/// Displays notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<(), AgentError>;
}

/// Notifier that records notifications in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn show(&self, notification: &Notification) -> Result<(), AgentError> {
    info!(
      title = %notification.title,
      body = %notification.body,
      icon = %notification.icon,
      "notification"
    );
    Ok(())
  }
}
