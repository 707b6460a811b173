use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a page sends to the worker, dispatched on `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate an installed worker without waiting
  SkipWaiting,
  /// Fetch and store URLs in the dynamic partition
  CacheUrls { urls: Vec<String> },
  /// Delete one partition, or every partition of this app
  ClearCache {
    #[serde(default, rename = "cacheName", skip_serializing_if = "Option::is_none")]
    cache_name: Option<String>,
  },
  /// Ask for the total size of stored bodies
  GetCacheSize,
}

/// Messages the worker sends to pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  CacheSize { size: u64 },
  SyncComplete { timestamp: i64 },
  NotificationClick { data: Value },
}
