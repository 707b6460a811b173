//! Pages connected to the worker.
//!
//! In the proxy each Server-Sent Events connection is a client. The registry
//! keeps a channel per client so worker messages can be pushed to it.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::worker::WorkerMessage;

pub type ClientId = u64;

/// Snapshot of a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: ClientId,
  pub url: String,
  pub focused: bool,
  /// Whether the current worker has claimed this client
  pub controlled: bool,
}

/// Client capability used by lifecycle, sync and notification handling.
pub trait Clients: Send + Sync {
  /// All live clients, oldest first.
  fn match_all(&self) -> Result<Vec<ClientInfo>>;

  fn post_message(&self, id: ClientId, message: &WorkerMessage) -> Result<()>;

  fn focus(&self, id: ClientId) -> Result<()>;

  /// Open a new window at `url` and return its client id.
  fn open_window(&self, url: &str) -> Result<ClientId>;

  /// Take control of every client. Returns how many were claimed.
  fn claim(&self) -> Result<usize>;
}

struct ClientSlot {
  url: String,
  focused: bool,
  controlled: bool,
  /// None for windows opened by the worker that never connected back
  tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
}

impl ClientSlot {
  fn is_live(&self) -> bool {
    self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(true)
  }
}

/// In-process client registry.
pub struct ClientRegistry {
  next_id: AtomicU64,
  clients: Mutex<BTreeMap<ClientId, ClientSlot>>,
}

impl Default for ClientRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU64::new(1),
      clients: Mutex::new(BTreeMap::new()),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ClientId, ClientSlot>>> {
    self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn insert(
    &self,
    url: &str,
    tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
  ) -> Result<ClientId> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.lock()?.insert(
      id,
      ClientSlot {
        url: url.to_string(),
        focused: false,
        controlled: false,
        tx,
      },
    );
    Ok(id)
  }

  /// Register a page at `url`; messages for it arrive on the receiver.
  ///
  /// A page on the same origin as a window the worker opened takes over the
  /// oldest such window, keeping its id and focus.
  pub fn register(&self, url: &str) -> Result<(ClientId, mpsc::UnboundedReceiver<WorkerMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let origin = Url::parse(url).ok().map(|u| u.origin());
    {
      let mut clients = self.lock()?;
      let opened = clients.iter_mut().find(|(_, slot)| {
        slot.tx.is_none()
          && origin.is_some()
          && Url::parse(&slot.url).ok().map(|u| u.origin()) == origin
      });

      if let Some((id, slot)) = opened {
        slot.url = url.to_string();
        slot.tx = Some(tx);
        debug!(id, url, "opened window connected");
        return Ok((*id, rx));
      }
    }

    let id = self.insert(url, Some(tx))?;
    debug!(id, url, "client registered");
    Ok((id, rx))
  }

  pub fn unregister(&self, id: ClientId) -> Result<()> {
    self.lock()?.remove(&id);
    Ok(())
  }
}

impl Clients for ClientRegistry {
  fn match_all(&self) -> Result<Vec<ClientInfo>> {
    let mut clients = self.lock()?;
    clients.retain(|_, slot| slot.is_live());

    Ok(
      clients
        .iter()
        .map(|(id, slot)| ClientInfo {
          id: *id,
          url: slot.url.clone(),
          focused: slot.focused,
          controlled: slot.controlled,
        })
        .collect(),
    )
  }

  fn post_message(&self, id: ClientId, message: &WorkerMessage) -> Result<()> {
    let mut clients = self.lock()?;
    let slot = clients
      .get(&id)
      .ok_or_else(|| eyre!("Unknown client {}", id))?;

    let Some(tx) = &slot.tx else {
      debug!(id, "client has no channel, message dropped");
      return Ok(());
    };

    if tx.send(message.clone()).is_err() {
      clients.remove(&id);
      return Err(eyre!("Client {} disconnected", id));
    }

    Ok(())
  }

  fn focus(&self, id: ClientId) -> Result<()> {
    let mut clients = self.lock()?;
    if !clients.contains_key(&id) {
      return Err(eyre!("Unknown client {}", id));
    }
    for (client_id, slot) in clients.iter_mut() {
      slot.focused = *client_id == id;
    }
    Ok(())
  }

  fn open_window(&self, url: &str) -> Result<ClientId> {
    let id = self.insert(url, None)?;
    self.focus(id)?;
    info!(id, url, "opened window");
    Ok(id)
  }

  fn claim(&self) -> Result<usize> {
    let mut clients = self.lock()?;
    for slot in clients.values_mut() {
      slot.controlled = true;
    }
    Ok(clients.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages_reach_registered_client() {
    let registry = ClientRegistry::new();
    let (id, mut rx) = registry.register("http://app.test/").unwrap();

    registry
      .post_message(id, &WorkerMessage::CacheSize { size: 42 })
      .unwrap();

    assert_eq!(rx.try_recv().unwrap(), WorkerMessage::CacheSize { size: 42 });
  }

  #[test]
  fn test_disconnected_clients_are_pruned() {
    let registry = ClientRegistry::new();
    let (_gone, rx) = registry.register("http://app.test/a").unwrap();
    let (kept, _rx) = registry.register("http://app.test/b").unwrap();
    drop(rx);

    let clients = registry.match_all().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, kept);
  }

  #[test]
  fn test_claim_and_focus() {
    let registry = ClientRegistry::new();
    let (a, _rx_a) = registry.register("http://app.test/a").unwrap();
    let (b, _rx_b) = registry.register("http://app.test/b").unwrap();

    assert_eq!(registry.claim().unwrap(), 2);
    registry.focus(b).unwrap();

    let clients = registry.match_all().unwrap();
    assert!(clients.iter().all(|c| c.controlled));
    assert!(!clients.iter().find(|c| c.id == a).unwrap().focused);
    assert!(clients.iter().find(|c| c.id == b).unwrap().focused);
  }

  #[test]
  fn test_page_takes_over_opened_window() {
    let registry = ClientRegistry::new();
    let opened = registry.open_window("http://app.test/").unwrap();
    let (_foreign, _rx_foreign) = registry.register("https://elsewhere.example/").unwrap();

    let (id, mut rx) = registry.register("http://app.test/chat").unwrap();
    assert_eq!(id, opened);

    let clients = registry.match_all().unwrap();
    assert_eq!(clients.len(), 2);
    let page = clients.iter().find(|c| c.id == id).unwrap();
    assert_eq!(page.url, "http://app.test/chat");
    assert!(page.focused);

    registry
      .post_message(id, &WorkerMessage::CacheSize { size: 1 })
      .unwrap();
    assert_eq!(rx.try_recv().unwrap(), WorkerMessage::CacheSize { size: 1 });
  }

  #[test]
  fn test_unregister_removes_live_client() {
    let registry = ClientRegistry::new();
    let (id, _rx) = registry.register("http://app.test/").unwrap();

    registry.unregister(id).unwrap();

    assert!(registry.match_all().unwrap().is_empty());
  }

  #[test]
  fn test_open_window_is_focused() {
    let registry = ClientRegistry::new();
    let id = registry.open_window("http://app.test/").unwrap();

    let clients = registry.match_all().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, id);
    assert!(clients[0].focused);
  }
}
