//! Background sync: replaying writes queued while offline.

mod queue;

pub use queue::{PendingMessage, PendingQueue, SqliteQueue};

use color_eyre::Result;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

use crate::net::{Network, Request};

/// Tag carried by a sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTag {
  /// Replay the pending write queue
  Messages,
  /// Tell every client that a sync pass finished
  Data,
  Other(String),
}

impl FromStr for SyncTag {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "sync-messages" => SyncTag::Messages,
      "sync-data" => SyncTag::Data,
      other => SyncTag::Other(other.to_string()),
    })
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncTag::Messages => write!(f, "sync-messages"),
      SyncTag::Data => write!(f, "sync-data"),
      SyncTag::Other(tag) => write!(f, "{}", tag),
    }
  }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Delivered and removed from the queue
  pub sent: Vec<String>,
  /// Still queued for the next sync
  pub retained: Vec<String>,
}

/// POST every queued message to `endpoint`, deleting the ones that were
/// accepted with a 2xx status.
///
/// Delivery is at-least-once: a message whose delete fails after a
/// successful POST stays queued and is sent again next time.
pub async fn replay(
  queue: &dyn PendingQueue,
  network: &dyn Network,
  endpoint: &Url,
) -> Result<ReplayReport> {
  let mut report = ReplayReport::default();

  for message in queue.all()? {
    let request = Request::post_json(endpoint.clone(), &message.body)?;

    match network.fetch(&request).await {
      Ok(response) if response.is_ok() => match queue.delete(&message.id) {
        Ok(_) => {
          debug!(id = %message.id, "pending message delivered");
          report.sent.push(message.id);
        }
        Err(e) => {
          warn!(id = %message.id, error = %e, "delivered message could not be dequeued");
          report.retained.push(message.id);
        }
      },
      Ok(response) => {
        warn!(id = %message.id, status = response.status, "failed to sync message");
        report.retained.push(message.id);
      }
      Err(e) => {
        warn!(id = %message.id, error = %e, "failed to sync message");
        report.retained.push(message.id);
      }
    }
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::testing::MockNetwork;
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  /// Rejects the first POST and accepts the rest.
  struct FlakyNetwork {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Network for FlakyNetwork {
    async fn fetch(&self, _request: &Request) -> Result<crate::net::Response> {
      if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
        Err(eyre!("connection reset"))
      } else {
        Ok(crate::net::Response::new(200, "application/json", "{}"))
      }
    }
  }

  fn queue_with(ids: &[&str]) -> SqliteQueue {
    let queue = SqliteQueue::new(Arc::new(Database::open_in_memory().unwrap()));
    for id in ids {
      queue
        .enqueue(&PendingMessage::from_value(json!({"id": id, "text": "hello"})).unwrap())
        .unwrap();
    }
    queue
  }

  #[test]
  fn test_tag_parsing() {
    assert_eq!("sync-messages".parse::<SyncTag>().unwrap(), SyncTag::Messages);
    assert_eq!("sync-data".parse::<SyncTag>().unwrap(), SyncTag::Data);
    assert_eq!(
      "other".parse::<SyncTag>().unwrap(),
      SyncTag::Other("other".to_string())
    );
  }

  #[tokio::test]
  async fn test_failed_post_stays_queued() {
    let queue = queue_with(&["first", "second"]);
    let network = FlakyNetwork {
      calls: AtomicUsize::new(0),
    };
    let endpoint = Url::parse("http://app.test/api/message").unwrap();

    let report = replay(&queue, &network, &endpoint).await.unwrap();

    assert_eq!(report.sent, vec!["second".to_string()]);
    assert_eq!(report.retained, vec!["first".to_string()]);
    let remaining: Vec<String> = queue.all().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(remaining, vec!["first".to_string()]);
  }

  #[tokio::test]
  async fn test_rejected_status_stays_queued() {
    let queue = queue_with(&["only"]);
    let network = MockNetwork::new();
    network.respond("http://app.test/api/message", 500, "boom");
    let endpoint = Url::parse("http://app.test/api/message").unwrap();

    let report = replay(&queue, &network, &endpoint).await.unwrap();

    assert!(report.sent.is_empty());
    assert_eq!(queue.all().unwrap().len(), 1);

    let posted = &network.requests()[0];
    assert_eq!(posted.method, reqwest::Method::POST);
    let body: serde_json::Value = serde_json::from_slice(posted.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"id": "only", "text": "hello"}));
  }
}
