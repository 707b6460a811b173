use std::fmt;

use crate::net::path_extension;

/// Extensions served cache-first: immutable static assets.
const CACHE_FIRST_EXTENSIONS: &[&str] = &[
  "css", "js", "png", "jpg", "jpeg", "gif", "svg", "woff", "woff2",
];

/// Extensions served network-first: documents that change between deploys.
const NETWORK_FIRST_EXTENSIONS: &[&str] = &["html", "json"];

/// Caching strategy applied to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl Strategy {
  /// Pick the strategy for a request path.
  ///
  /// Priority: API prefix, then static asset extensions, then documents.
  /// Anything unrecognised is network-first.
  pub fn select(path: &str, api_prefix: &str) -> Self {
    if path.starts_with(api_prefix) {
      return Strategy::StaleWhileRevalidate;
    }

    let extension = path_extension(path);
    let extension = extension.as_deref().unwrap_or("");

    if CACHE_FIRST_EXTENSIONS.contains(&extension) {
      return Strategy::CacheFirst;
    }

    if NETWORK_FIRST_EXTENSIONS.contains(&extension) || path == "/" {
      return Strategy::NetworkFirst;
    }

    Strategy::NetworkFirst
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Strategy::CacheFirst => write!(f, "cache-first"),
      Strategy::NetworkFirst => write!(f, "network-first"),
      Strategy::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_api_prefix_wins_over_extension() {
    assert_eq!(
      Strategy::select("/api/avatar.png", "/api/"),
      Strategy::StaleWhileRevalidate
    );
    assert_eq!(Strategy::select("/api/chats", "/api/"), Strategy::StaleWhileRevalidate);
  }

  #[test]
  fn test_static_assets_are_cache_first() {
    for path in ["/css/style.css", "/js/app.js", "/img/logo.JPEG", "/fonts/a.woff2"] {
      assert_eq!(Strategy::select(path, "/api/"), Strategy::CacheFirst, "{}", path);
    }
  }

  #[test]
  fn test_documents_and_unknown_are_network_first() {
    for path in ["/", "/index.html", "/manifest.json", "/public/favicon.ico", "/settings"] {
      assert_eq!(Strategy::select(path, "/api/"), Strategy::NetworkFirst, "{}", path);
    }
  }

  #[test]
  fn test_display_names() {
    assert_eq!(Strategy::StaleWhileRevalidate.to_string(), "stale-while-revalidate");
    assert_eq!(Strategy::CacheFirst.to_string(), "cache-first");
  }
}
