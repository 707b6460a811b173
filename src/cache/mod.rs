//! Cache partitions and the strategies that read and write them.
//!
//! This module provides:
//! - Named, versioned partitions (static, dynamic, data) persisted in SQLite
//! - A pure selector mapping a request path to a caching strategy
//! - Cache-first, network-first and stale-while-revalidate executors
//! - Offline fallback when both cache and network come up empty

mod layer;
mod storage;
mod strategy;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use strategy::Strategy;
pub use traits::{CacheResult, CacheSource, CachedEntry, Partition, PartitionNames};
