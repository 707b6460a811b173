//! Synthetic responses for requests that neither the cache nor the network
//! could answer.

use serde_json::json;

use crate::net::{Request, Response};

/// Path of an offline page the origin may ship and the worker may have cached.
pub const OFFLINE_PAGE_PATH: &str = "/offline.html";

const OFFLINE_MESSAGE: &str =
  "You are currently offline. This feature will be available when you reconnect.";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

/// Kind of offline answer a failed request receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
  /// Branded HTML page
  Page,
  /// Structured JSON error with status 503
  Api,
  /// SVG placeholder image
  Image,
  /// Plain text 503
  Plain,
}

/// Decide which fallback a request gets. Checked in order: HTML documents,
/// API calls, images, everything else.
pub fn classify(request: &Request, api_prefix: &str) -> FallbackKind {
  if request.accepts("text/html") {
    return FallbackKind::Page;
  }

  if request.url.path().starts_with(api_prefix) {
    return FallbackKind::Api;
  }

  let image_extension = request
    .extension()
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    .unwrap_or(false);
  if request.accepts("image") || image_extension {
    return FallbackKind::Image;
  }

  FallbackKind::Plain
}

/// Build the fallback response. `cached_page` is a previously cached copy of
/// [`OFFLINE_PAGE_PATH`] and only matters for [`FallbackKind::Page`].
pub fn render(kind: FallbackKind, cached_page: Option<Response>) -> Response {
  match kind {
    FallbackKind::Page => cached_page.unwrap_or_else(offline_page),
    FallbackKind::Api => offline_api(),
    FallbackKind::Image => offline_image(),
    FallbackKind::Plain => Response::new(503, "text/plain", "Offline"),
  }
}

fn offline_api() -> Response {
  let body = json!({
    "error": "offline",
    "message": OFFLINE_MESSAGE,
  });
  Response::new(503, "application/json", body.to_string())
}

fn offline_image() -> Response {
  Response::new(200, "image/svg+xml", OFFLINE_SVG)
}

fn offline_page() -> Response {
  Response::new(200, "text/html", OFFLINE_HTML)
}

const OFFLINE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100">
  <rect fill="#1a1a2e" width="100" height="100"/>
  <text x="50" y="55" text-anchor="middle" fill="#666" font-family="sans-serif">Offline</text>
</svg>"##;

const OFFLINE_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Bael - Offline</title>
  <style>
    :root { --bg: #0a0a0f; --text: #ffffff; --primary: #ff3366; }
    * { box-sizing: border-box; margin: 0; padding: 0; }
    body {
      min-height: 100vh;
      display: flex;
      flex-direction: column;
      align-items: center;
      justify-content: center;
      background: var(--bg);
      color: var(--text);
      font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
    }
    .container { text-align: center; padding: 40px; }
    h1 {
      font-size: 28px;
      margin-bottom: 16px;
      background: linear-gradient(135deg, var(--primary), #8b5cf6);
      -webkit-background-clip: text;
      -webkit-text-fill-color: transparent;
    }
    p { color: #888; font-size: 16px; max-width: 400px; line-height: 1.6; margin-bottom: 30px; }
    .retry-btn {
      padding: 12px 32px;
      background: var(--primary);
      color: white;
      border: none;
      border-radius: 8px;
      font-size: 16px;
      cursor: pointer;
    }
    .cached-data {
      margin-top: 40px;
      padding: 20px;
      background: rgba(255, 255, 255, 0.05);
      border-radius: 12px;
      max-width: 500px;
    }
    .cached-data h3 { font-size: 14px; color: #666; margin-bottom: 12px; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Bael - Lord Of All</h1>
    <p>You appear to be offline. Some features may be limited, but your previous conversations and data are still available.</p>
    <button class="retry-btn" onclick="location.reload()">Try Again</button>
    <div class="cached-data">
      <h3>Available Offline</h3>
      <p>Previous chat history<br>Saved prompts<br>Local settings<br>Cached knowledge</p>
    </div>
  </div>
  <script>
    window.addEventListener('online', () => {
      document.body.innerHTML = '<div class="container"><h1>Back Online!</h1><p>Reconnecting...</p></div>';
      setTimeout(() => location.reload(), 1000);
    });
  </script>
</body>
</html>
"##;
