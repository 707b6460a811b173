//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::fallback::{self, FallbackKind, OFFLINE_PAGE_PATH};
use crate::net::{Network, Request, Response};

use super::storage::CacheStorage;
use super::strategy::Strategy;
use super::traits::{CacheResult, Partition, PartitionNames};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the request handler and the network,
/// providing transparent caching with offline fallback.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  names: Arc<PartitionNames>,
  api_prefix: Arc<str>,
}

impl CacheLayer {
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    names: PartitionNames,
    api_prefix: &str,
  ) -> Self {
    Self {
      storage,
      network,
      names: Arc::new(names),
      api_prefix: Arc::from(api_prefix),
    }
  }

  pub fn names(&self) -> &PartitionNames {
    &self.names
  }

  pub fn api_prefix(&self) -> &str {
    &self.api_prefix
  }

  /// Run the given strategy for a request.
  pub async fn execute(
    &self,
    strategy: Strategy,
    request: &Request,
  ) -> Result<CacheResult<Response>> {
    match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    }
  }

  /// Serve from any partition; only go to the network on a miss.
  ///
  /// 1. Check every partition - on a hit, return immediately
  /// 2. On a miss, fetch and store 2xx responses in the static partition
  /// 3. On network failure, return the offline fallback
  pub async fn cache_first(&self, request: &Request) -> Result<CacheResult<Response>> {
    if let Some(cached) = self.storage.match_any(request.cache_key())? {
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(Partition::Static, request, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network unavailable, serving fallback");
        self.offline(request)
      }
    }
  }

  /// Prefer the network; the cache is only a degradation path.
  ///
  /// 1. Fetch - store 2xx responses in the dynamic partition
  /// 2. On network failure, serve any cached copy
  /// 3. Without a cached copy, return the offline fallback
  pub async fn network_first(&self, request: &Request) -> Result<CacheResult<Response>> {
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(Partition::Dynamic, request, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network unavailable, trying cache");
        match self.storage.match_any(request.cache_key())? {
          Some(cached) => Ok(CacheResult::from_cache(cached.response, cached.cached_at)),
          None => self.offline(request),
        }
      }
    }
  }

  /// Return the cached copy right away and refresh it in the background.
  ///
  /// The refresh always runs; it updates the data partition for the next
  /// request. Without a cached copy the caller waits for the refresh, and if
  /// that fails too, gets the offline fallback.
  pub async fn stale_while_revalidate(&self, request: &Request) -> Result<CacheResult<Response>> {
    let partition = self.names.name(Partition::Data).to_string();
    self.storage.open(&partition)?;
    let cached = self.storage.match_in(&partition, request.cache_key())?;

    let refresh = self.spawn_refresh(request.clone(), partition);

    if let Some(cached) = cached {
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match refresh.await {
      Ok(Ok(response)) => Ok(CacheResult::from_network(response)),
      Ok(Err(_)) => self.offline(request),
      Err(e) => {
        warn!(url = %request.url, error = %e, "refresh task failed");
        self.offline(request)
      }
    }
  }

  /// Detached fetch that overwrites the data partition entry on success.
  /// Errors are logged here and handed to whoever awaits the handle.
  fn spawn_refresh(&self, request: Request, partition: String) -> JoinHandle<Result<Response>> {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);

    tokio::spawn(async move {
      let response = match network.fetch(&request).await {
        Ok(response) => response,
        Err(e) => {
          warn!(url = %request.url, error = %e, "background refresh failed");
          return Err(e);
        }
      };

      if response.is_ok() {
        if let Err(e) = storage.put(&partition, request.cache_key(), &response) {
          warn!(url = %request.url, %partition, error = %e, "failed to update cache");
        }
      }

      Ok(response)
    })
  }

  /// Store a fresh response. 2xx only; a failed write never fails the request.
  fn store(&self, partition: Partition, request: &Request, response: &Response) {
    if !response.is_ok() {
      return;
    }

    let partition = self.names.name(partition);
    if let Err(e) = self.storage.put(partition, request.cache_key(), response) {
      warn!(url = %request.url, %partition, error = %e, "failed to cache response");
    }
  }

  /// Offline answer for a request that cache and network both failed.
  pub fn offline(&self, request: &Request) -> Result<CacheResult<Response>> {
    let kind = fallback::classify(request, &self.api_prefix);

    let cached_page = if kind == FallbackKind::Page {
      let url = request
        .url
        .join(OFFLINE_PAGE_PATH)
        .map_err(|e| eyre!("Failed to resolve offline page: {}", e))?;
      self.storage.match_any(url.as_str())?.map(|e| e.response)
    } else {
      None
    };

    debug!(url = %request.url, ?kind, "serving offline fallback");
    Ok(CacheResult::offline(fallback::render(kind, cached_page)))
  }
}
