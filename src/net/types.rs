use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use url::Url;

/// Header list in arrival order. Names are compared case-insensitively.
pub type Headers = Vec<(String, String)>;

/// Look up a header value by name, ignoring ASCII case.
pub fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// An outgoing or intercepted HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  /// Build a POST request carrying a JSON body.
  pub fn post_json(url: Url, body: &serde_json::Value) -> Result<Self> {
    let body = serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize body: {}", e))?;

    Ok(Self {
      method: Method::POST,
      url,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
    })
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Whether the `Accept` header mentions the given media type fragment.
  pub fn accepts(&self, fragment: &str) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains(fragment))
      .unwrap_or(false)
  }

  /// Cache entries are keyed by the full URL.
  pub fn cache_key(&self) -> &str {
    self.url.as_str()
  }

  /// Lowercased extension of the last path segment, if it has one.
  pub fn extension(&self) -> Option<String> {
    path_extension(self.url.path())
  }
}

pub(crate) fn path_extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (stem, ext) = segment.rsplit_once('.')?;
  if stem.is_empty() && ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

/// A response as returned by the network or stored in a cache partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: vec![("Content-Type".to_string(), content_type.to_string())],
      body: body.into(),
    }
  }

  /// Generic answer for requests whose handler failed outright.
  pub fn service_unavailable() -> Self {
    Self::new(503, "text/plain", "Service Unavailable")
  }

  /// True for 2xx statuses, the only responses that are ever cached.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}
