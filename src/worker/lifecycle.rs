//! Install and activate: precaching and version garbage collection.

use color_eyre::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::Partition;
use crate::net::Request;

use super::Worker;

/// Worker lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
  /// Created, install not started
  Parsed,
  Installing,
  /// Installed, waiting to activate
  Installed,
  Activating,
  /// Active and controlling clients
  Activated,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
    }
  }
}

/// Observable lifecycle state.
pub struct Lifecycle {
  state: watch::Sender<WorkerState>,
  skip_waiting: AtomicBool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    let (state, _) = watch::channel(WorkerState::Parsed);
    Self {
      state,
      skip_waiting: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  /// Watch state changes, e.g. to wait for `Activated`.
  pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
    self.state.subscribe()
  }

  fn transition(&self, next: WorkerState) {
    let previous = self.state.send_replace(next);
    info!(from = %previous, to = %next, "worker state");
  }

  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  pub fn is_skipping_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }
}

/// Outcome of precaching the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

impl Worker {
  /// Precache the manifest into the static partition.
  ///
  /// A manifest entry that cannot be fetched, or answers with a non-2xx
  /// status, is logged and skipped. Only storage failures abort the install.
  pub async fn install(&self) -> Result<InstallReport> {
    self.lifecycle.transition(WorkerState::Installing);

    let partition = self.layer.names().name(Partition::Static).to_string();
    self.storage.open(&partition)?;
    info!(%partition, assets = self.settings.precache.len(), "precaching static assets");

    let mut report = InstallReport::default();
    for path in &self.settings.precache {
      let url = match self.settings.origin.join(path) {
        Ok(url) => url,
        Err(e) => {
          warn!(%path, error = %e, "invalid precache entry");
          report.failed.push(path.clone());
          continue;
        }
      };

      match self.network.fetch(&Request::get(url.clone())).await {
        Ok(response) if response.is_ok() => {
          self.storage.put(&partition, url.as_str(), &response)?;
          report.cached.push(path.clone());
        }
        Ok(response) => {
          warn!(%path, status = response.status, "asset failed to cache");
          report.failed.push(path.clone());
        }
        Err(e) => {
          warn!(%path, error = %e, "asset failed to cache");
          report.failed.push(path.clone());
        }
      }
    }

    self.lifecycle.skip_waiting();
    self.lifecycle.transition(WorkerState::Installed);

    Ok(report)
  }

  /// Delete partitions left over from other versions and claim all clients.
  /// Returns the names of the deleted partitions.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self.lifecycle.transition(WorkerState::Activating);

    let names = self.layer.names();
    let mut deleted = Vec::new();
    for partition in self.storage.partitions()? {
      if names.is_stale(&partition) {
        info!(%partition, "deleting old cache");
        self.storage.delete(&partition)?;
        deleted.push(partition);
      }
    }

    let claimed = self.clients.claim()?;
    info!(claimed, "claimed clients");

    self.lifecycle.transition(WorkerState::Activated);
    Ok(deleted)
  }

  /// Install, then activate as soon as install finishes if waiting was
  /// skipped, either by install itself or by an earlier `SKIP_WAITING`.
  pub async fn start(&self) -> Result<InstallReport> {
    let report = self.install().await?;
    if self.lifecycle.is_skipping_waiting() {
      self.activate().await?;
    }
    Ok(report)
  }
}
