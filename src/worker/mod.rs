//! The offline worker: request interception, page messages, sync and push.
//!
//! A [`Worker`] owns every capability it touches. Nothing is global; the
//! proxy server and the CLI each build one and pass it around by clone.

mod lifecycle;
mod messages;

pub use lifecycle::{InstallReport, Lifecycle, WorkerState};
pub use messages::{ClientMessage, WorkerMessage};

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, Partition, PartitionNames, SqliteStorage, Strategy};
use crate::clients::Clients;
use crate::config::Config;
use crate::db::Database;
use crate::net::{Network, Request, Response};
use crate::push::{ClickOutcome, Notification, Notifier, PushPayload, DISMISS_ACTION};
use crate::sync::{self, PendingMessage, PendingQueue, ReplayReport, SqliteQueue, SyncTag};

/// Settings derived from the configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub origin: Url,
  pub names: PartitionNames,
  pub api_prefix: String,
  pub message_endpoint: Url,
  pub precache: Vec<String>,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;
    let message_endpoint = origin
      .join(&config.cache.message_endpoint)
      .map_err(|e| eyre!("Invalid message endpoint '{}': {}", config.cache.message_endpoint, e))?;

    Ok(Self {
      names: PartitionNames::new(&config.cache.prefix, &config.cache.version),
      api_prefix: config.cache.api_prefix.clone(),
      precache: config.cache.precache.clone(),
      message_endpoint,
      origin,
    })
  }
}

/// Everything the worker reaches outside itself.
pub struct Capabilities {
  pub storage: Arc<dyn CacheStorage>,
  pub network: Arc<dyn Network>,
  pub queue: Arc<dyn PendingQueue>,
  pub clients: Arc<dyn Clients>,
  pub notifier: Arc<dyn Notifier>,
}

impl Capabilities {
  /// Cache partitions and the pending queue share one SQLite database.
  pub fn sqlite(
    db: Arc<Database>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      storage: Arc::new(SqliteStorage::new(Arc::clone(&db))),
      queue: Arc::new(SqliteQueue::new(db)),
      network,
      clients,
      notifier,
    }
  }
}

/// Result of a sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  Replayed(ReplayReport),
  /// Number of clients told that sync completed
  Notified(usize),
  Ignored,
}

#[derive(Clone)]
pub struct Worker {
  settings: Arc<WorkerSettings>,
  layer: CacheLayer,
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  queue: Arc<dyn PendingQueue>,
  clients: Arc<dyn Clients>,
  notifier: Arc<dyn Notifier>,
  lifecycle: Arc<Lifecycle>,
}

impl Worker {
  pub fn new(settings: WorkerSettings, caps: Capabilities) -> Self {
    let layer = CacheLayer::new(
      Arc::clone(&caps.storage),
      Arc::clone(&caps.network),
      settings.names.clone(),
      &settings.api_prefix,
    );

    Self {
      settings: Arc::new(settings),
      layer,
      storage: caps.storage,
      network: caps.network,
      queue: caps.queue,
      clients: caps.clients,
      notifier: caps.notifier,
      lifecycle: Arc::new(Lifecycle::new()),
    }
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  pub fn storage(&self) -> &dyn CacheStorage {
    self.storage.as_ref()
  }

  pub fn queue(&self) -> &dyn PendingQueue {
    self.queue.as_ref()
  }

  // ==========================================================================
  // Fetch interception
  // ==========================================================================

  /// Whether a request is handled by the caching strategies. Cross-origin,
  /// WebSocket and non-GET requests pass through untouched.
  pub fn intercepts(&self, request: &Request) -> bool {
    if request.url.origin() != self.settings.origin.origin() {
      return false;
    }

    let path = request.url.path();
    let websocket = matches!(request.url.scheme(), "ws" | "wss")
      || path == "/ws"
      || path.starts_with("/ws/");
    if websocket {
      return false;
    }

    request.method == Method::GET
  }

  /// Answer an intercepted request. `None` means the request is not ours and
  /// should go straight to the network.
  ///
  /// Intercepted requests always get a response: strategy errors (storage
  /// failures) become a plain 503.
  pub async fn handle_fetch(&self, request: &Request) -> Option<Response> {
    if !self.intercepts(request) {
      debug!(url = %request.url, method = %request.method, "passing through");
      return None;
    }

    let strategy = Strategy::select(request.url.path(), &self.settings.api_prefix);

    match self.layer.execute(strategy, request).await {
      Ok(result) => {
        debug!(url = %request.url, %strategy, source = ?result.source, "served");
        Some(result.data)
      }
      Err(e) => {
        error!(url = %request.url, %strategy, error = %e, "cache failure");
        Some(Response::service_unavailable())
      }
    }
  }

  /// Forward a request that is not intercepted.
  pub async fn passthrough(&self, request: &Request) -> Result<Response> {
    self.network.fetch(request).await
  }

  // ==========================================================================
  // Page messages
  // ==========================================================================

  /// Handle a message from a page. Some messages produce a reply.
  pub async fn handle_message(&self, message: ClientMessage) -> Result<Option<WorkerMessage>> {
    match message {
      ClientMessage::SkipWaiting => {
        self.lifecycle.skip_waiting();
        if self.lifecycle.state() == WorkerState::Installed {
          self.activate().await?;
        }
        Ok(None)
      }
      ClientMessage::CacheUrls { urls } => {
        self.cache_urls(&urls).await?;
        Ok(None)
      }
      ClientMessage::ClearCache { cache_name } => {
        self.clear_cache(cache_name.as_deref())?;
        Ok(None)
      }
      ClientMessage::GetCacheSize => {
        let size = self.cache_size()?;
        Ok(Some(WorkerMessage::CacheSize { size }))
      }
    }
  }

  /// Fetch each URL and store 2xx responses in the dynamic partition.
  /// Relative URLs resolve against the origin; URLs on any other origin are
  /// skipped. Returns how many were stored.
  pub async fn cache_urls(&self, urls: &[String]) -> Result<usize> {
    let partition = self.settings.names.name(Partition::Dynamic);
    self.storage.open(partition)?;

    let mut stored = 0;
    for raw in urls {
      let url = match self.settings.origin.join(raw) {
        Ok(url) => url,
        Err(e) => {
          warn!(url = %raw, error = %e, "failed to cache");
          continue;
        }
      };

      if url.origin() != self.settings.origin.origin() {
        warn!(%url, "refusing to cache cross-origin url");
        continue;
      }

      match self.network.fetch(&Request::get(url.clone())).await {
        Ok(response) if response.is_ok() => {
          self.storage.put(partition, url.as_str(), &response)?;
          stored += 1;
        }
        Ok(response) => {
          debug!(%url, status = response.status, "not cached");
        }
        Err(e) => {
          warn!(%url, error = %e, "failed to cache");
        }
      }
    }

    Ok(stored)
  }

  /// Delete one partition by name, or every partition owned by this app.
  /// Returns the names that were deleted.
  pub fn clear_cache(&self, name: Option<&str>) -> Result<Vec<String>> {
    let targets: Vec<String> = match name {
      Some(name) => vec![name.to_string()],
      None => self
        .storage
        .partitions()?
        .into_iter()
        .filter(|p| self.settings.names.owns(p))
        .collect(),
    };

    let mut deleted = Vec::new();
    for partition in targets {
      if self.storage.delete(&partition)? {
        info!(%partition, "cache cleared");
        deleted.push(partition);
      }
    }

    Ok(deleted)
  }

  /// Total body bytes across every partition owned by this app.
  pub fn cache_size(&self) -> Result<u64> {
    let mut total = 0;
    for partition in self.storage.partitions()? {
      if self.settings.names.owns(&partition) {
        total += self.storage.size(&partition)?;
      }
    }
    Ok(total)
  }

  // ==========================================================================
  // Background sync
  // ==========================================================================

  /// Queue a write for the next `sync-messages` event.
  pub fn enqueue(&self, body: Value) -> Result<PendingMessage> {
    let message = PendingMessage::from_value(body)?;
    self.queue.enqueue(&message)?;
    debug!(id = %message.id, "message queued");
    Ok(message)
  }

  pub async fn sync(&self, tag: &SyncTag) -> Result<SyncOutcome> {
    info!(%tag, "background sync");

    match tag {
      SyncTag::Messages => {
        let report = sync::replay(
          self.queue.as_ref(),
          self.network.as_ref(),
          &self.settings.message_endpoint,
        )
        .await?;
        info!(sent = report.sent.len(), retained = report.retained.len(), "messages synced");
        Ok(SyncOutcome::Replayed(report))
      }
      SyncTag::Data => {
        let message = WorkerMessage::SyncComplete {
          timestamp: Utc::now().timestamp_millis(),
        };
        Ok(SyncOutcome::Notified(self.broadcast(&message)?))
      }
      SyncTag::Other(_) => {
        debug!(%tag, "unknown sync tag");
        Ok(SyncOutcome::Ignored)
      }
    }
  }

  /// Post a message to every client. Returns how many received it.
  fn broadcast(&self, message: &WorkerMessage) -> Result<usize> {
    let mut delivered = 0;
    for client in self.clients.match_all()? {
      match self.clients.post_message(client.id, message) {
        Ok(()) => delivered += 1,
        Err(e) => debug!(id = client.id, error = %e, "client unreachable"),
      }
    }
    Ok(delivered)
  }

  // ==========================================================================
  // Push notifications
  // ==========================================================================

  /// Show the notification carried by a push message.
  pub fn push(&self, raw: Option<&[u8]>) -> Result<Notification> {
    let notification = Notification::from(PushPayload::parse(raw));
    self.notifier.show(&notification)?;
    Ok(notification)
  }

  /// React to a click on a notification: message and focus the first client
  /// on the origin, or open a new window at `/`.
  pub fn notification_click(&self, action: Option<&str>, data: Value) -> Result<ClickOutcome> {
    if action == Some(DISMISS_ACTION) {
      return Ok(ClickOutcome::Dismissed);
    }

    let origin = self.settings.origin.origin();
    let existing = self.clients.match_all()?.into_iter().find(|client| {
      Url::parse(&client.url)
        .map(|url| url.origin() == origin)
        .unwrap_or(false)
    });

    if let Some(client) = existing {
      self
        .clients
        .post_message(client.id, &WorkerMessage::NotificationClick { data })?;
      self.clients.focus(client.id)?;
      return Ok(ClickOutcome::Focused(client.id));
    }

    let url = self
      .settings
      .origin
      .join("/")
      .map_err(|e| eyre!("Failed to resolve start page: {}", e))?;
    let id = self.clients.open_window(url.as_str())?;
    Ok(ClickOutcome::Opened(id))
  }
}
