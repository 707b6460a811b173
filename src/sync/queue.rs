//! Durable queue of writes made while offline.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::Database;

/// A queued message. `body` is the full JSON object, including its `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
  pub id: String,
  pub body: Value,
}

impl PendingMessage {
  /// Wrap a JSON object, taking its `id` field or assigning one.
  pub fn from_value(mut body: Value) -> Result<Self> {
    let object = body
      .as_object_mut()
      .ok_or_else(|| eyre!("Pending message must be a JSON object"))?;

    let id = match object.get("id") {
      Some(Value::String(s)) => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      Some(other) => return Err(eyre!("Unsupported message id: {}", other)),
      None => {
        let id = generate_id(object);
        object.insert("id".to_string(), Value::String(id.clone()));
        id
      }
    };

    Ok(Self { id, body })
  }
}

/// SHA256 over the message and the enqueue time, truncated for readability.
fn generate_id(object: &serde_json::Map<String, Value>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(Value::Object(object.clone()).to_string().as_bytes());
  hasher.update(
    Utc::now()
      .timestamp_nanos_opt()
      .unwrap_or_default()
      .to_le_bytes(),
  );
  let digest = hex::encode(hasher.finalize());
  digest[..16].to_string()
}

/// Trait for pending write queue backends.
pub trait PendingQueue: Send + Sync {
  /// Add a message, replacing any queued message with the same id.
  fn enqueue(&self, message: &PendingMessage) -> Result<()>;

  /// All queued messages, oldest first.
  fn all(&self) -> Result<Vec<PendingMessage>>;

  /// Remove a message. Returns whether it was queued.
  fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite-backed queue (table `pending_messages`).
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl PendingQueue for SqliteQueue {
  fn enqueue(&self, message: &PendingMessage) -> Result<()> {
    let body = message.body.to_string();

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO pending_messages (id, body, queued_at)
         VALUES (?, ?, datetime('now'))",
        params![message.id, body],
      )
      .map_err(|e| eyre!("Failed to queue message {}: {}", message.id, e))?;

    Ok(())
  }

  fn all(&self) -> Result<Vec<PendingMessage>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT id, body FROM pending_messages ORDER BY queued_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
      .map_err(|e| eyre!("Failed to read pending messages: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending message: {}", e))?;

    rows
      .into_iter()
      .map(|(id, body)| {
        let body = serde_json::from_str(&body)
          .map_err(|e| eyre!("Failed to decode pending message {}: {}", id, e))?;
        Ok(PendingMessage { id, body })
      })
      .collect()
  }

  fn delete(&self, id: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM pending_messages WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete pending message {}: {}", id, e))?;

    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> SqliteQueue {
    SqliteQueue::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_enqueue_list_delete() {
    let queue = queue();
    let a = PendingMessage::from_value(json!({"id": "a", "text": "hi"})).unwrap();
    let b = PendingMessage::from_value(json!({"id": 2, "text": "there"})).unwrap();
    queue.enqueue(&a).unwrap();
    queue.enqueue(&b).unwrap();

    let all = queue.all().unwrap();
    assert_eq!(all, vec![a, b.clone()]);
    assert_eq!(all[1].id, "2");

    assert!(queue.delete("a").unwrap());
    assert!(!queue.delete("a").unwrap());
    assert_eq!(queue.all().unwrap(), vec![b]);
  }

  #[test]
  fn test_missing_id_is_generated_into_body() {
    let message = PendingMessage::from_value(json!({"text": "hi"})).unwrap();
    assert_eq!(message.id.len(), 16);
    assert_eq!(message.body["id"], Value::String(message.id.clone()));
  }

  #[test]
  fn test_non_object_rejected() {
    assert!(PendingMessage::from_value(json!(["not", "an", "object"])).is_err());
    assert!(PendingMessage::from_value(json!({"id": null})).is_err());
  }
}
