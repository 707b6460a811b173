//! Push payloads and the notifications they produce.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const DEFAULT_TITLE: &str = "Bael";
const DEFAULT_BODY: &str = "New notification";
const ICON: &str = "/public/icon-192.png";
const BADGE: &str = "/public/badge-72.png";
const VIBRATE: [u32; 3] = [100, 50, 100];

/// Action `dismiss` closes a notification without opening anything.
pub const DISMISS_ACTION: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Body of a push message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushPayload {
  #[serde(default = "default_title")]
  pub title: String,
  #[serde(default = "default_body")]
  pub body: String,
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default)]
  pub actions: Option<Vec<NotificationAction>>,
}

fn default_title() -> String {
  DEFAULT_TITLE.to_string()
}

fn default_body() -> String {
  DEFAULT_BODY.to_string()
}

impl Default for PushPayload {
  fn default() -> Self {
    Self {
      title: default_title(),
      body: default_body(),
      data: None,
      actions: None,
    }
  }
}

impl PushPayload {
  /// Parse raw push data. JSON objects are read field by field; anything
  /// else becomes the body of a default notification.
  pub fn parse(raw: Option<&[u8]>) -> Self {
    let Some(raw) = raw else {
      return Self::default();
    };

    match serde_json::from_slice::<PushPayload>(raw) {
      Ok(payload) => payload,
      Err(_) => Self {
        body: String::from_utf8_lossy(raw).into_owned(),
        ..Self::default()
      },
    }
  }
}

/// A notification ready to be displayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: Value,
  pub actions: Vec<NotificationAction>,
}

impl From<PushPayload> for Notification {
  fn from(payload: PushPayload) -> Self {
    Self {
      title: payload.title,
      body: payload.body,
      icon: ICON.to_string(),
      badge: BADGE.to_string(),
      vibrate: VIBRATE.to_vec(),
      data: payload.data.unwrap_or_else(|| Value::Object(Default::default())),
      actions: payload.actions.unwrap_or_else(default_actions),
    }
  }
}

fn default_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      action: "open".to_string(),
      title: "Open Bael".to_string(),
    },
    NotificationAction {
      action: DISMISS_ACTION.to_string(),
      title: "Dismiss".to_string(),
    },
  ]
}

/// Where notifications get displayed.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      actions = notification.actions.len(),
      "notification"
    );
    Ok(())
  }
}

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Dismissed,
  /// An existing client was messaged and focused
  Focused(crate::clients::ClientId),
  /// No client was open; a new window was opened
  Opened(crate::clients::ClientId),
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_missing_payload_uses_defaults() {
    let notification = Notification::from(PushPayload::parse(None));
    assert_eq!(notification.title, "Bael");
    assert_eq!(notification.body, "New notification");
    assert_eq!(notification.data, json!({}));
    assert_eq!(notification.actions.len(), 2);
    assert_eq!(notification.vibrate, vec![100, 50, 100]);
  }

  #[test]
  fn test_json_payload() {
    let raw = json!({
      "title": "Reply",
      "body": "Agent finished",
      "data": {"chat": 7},
      "actions": [{"action": "view", "title": "View"}],
    })
    .to_string();

    let notification = Notification::from(PushPayload::parse(Some(raw.as_bytes())));
    assert_eq!(notification.title, "Reply");
    assert_eq!(notification.data, json!({"chat": 7}));
    assert_eq!(
      notification.actions,
      vec![NotificationAction {
        action: "view".to_string(),
        title: "View".to_string()
      }]
    );
  }

  #[test]
  fn test_plain_text_payload_becomes_body() {
    let payload = PushPayload::parse(Some(b"server restarted"));
    assert_eq!(payload.title, "Bael");
    assert_eq!(payload.body, "server restarted");
  }
}
