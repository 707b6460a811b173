//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::net::Response;

/// The three partitions owned by the current worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
  /// Precached assets and cache-first responses
  Static,
  /// Network-first responses and explicitly cached URLs
  Dynamic,
  /// Stale-while-revalidate API responses
  Data,
}

impl Partition {
  pub const ALL: [Partition; 3] = [Partition::Static, Partition::Dynamic, Partition::Data];

  fn label(self) -> &'static str {
    match self {
      Partition::Static => "static",
      Partition::Dynamic => "dynamic",
      Partition::Data => "data",
    }
  }
}

/// Concrete partition names for one prefix and version, e.g. `bael-static-v1`.
#[derive(Debug, Clone)]
pub struct PartitionNames {
  prefix: String,
  names: [String; 3],
}

impl PartitionNames {
  pub fn new(prefix: &str, version: &str) -> Self {
    let names = Partition::ALL.map(|p| format!("{}{}-{}", prefix, p.label(), version));
    Self {
      prefix: prefix.to_string(),
      names,
    }
  }

  pub fn name(&self, partition: Partition) -> &str {
    let index = match partition {
      Partition::Static => 0,
      Partition::Dynamic => 1,
      Partition::Data => 2,
    };
    &self.names[index]
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  /// Whether the partition belongs to this application at any version.
  pub fn owns(&self, name: &str) -> bool {
    name.starts_with(&self.prefix)
  }

  /// Whether the name is one of the three partitions of the current version.
  pub fn is_current(&self, name: &str) -> bool {
    self.names.iter().any(|n| n == name)
  }

  /// Owned by this application but left over from another version.
  pub fn is_stale(&self, name: &str) -> bool {
    self.owns(name) && !self.is_current(name)
  }
}

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub url: String,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for a synthesized offline answer.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from a cache partition
  Cache,
  /// Neither cache nor network could answer; fallback response
  Offline,
}
