//! Offline cache controller for the Bael web app.
//!
//! The crate reproduces the behaviour of the app's service worker outside the
//! browser: requests are routed to a caching strategy, responses are kept in
//! named cache partitions, and every same-origin request resolves to some
//! response even when the origin is unreachable.
//!
//! All side effects go through injected capabilities ([`cache::CacheStorage`],
//! [`net::Network`], [`sync::PendingQueue`], [`clients::Clients`],
//! [`push::Notifier`]) owned by a [`worker::Worker`].

pub mod cache;
pub mod clients;
pub mod config;
pub mod db;
pub mod fallback;
pub mod logging;
pub mod net;
pub mod push;
pub mod server;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
