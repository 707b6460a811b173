//! Caching proxy in front of the origin.
//!
//! Every request that is not a control endpoint goes through the worker's
//! fetch handler, so pages served by the proxy get the same offline behaviour
//! a browser service worker would give them.

use axum::{
  body::Body,
  extract::{Path, State},
  http::{header, HeaderMap, StatusCode},
  response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse,
  },
  routing::{get, post},
  Json, Router,
};
use color_eyre::{eyre::eyre, Result};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientId, ClientRegistry};
use crate::net::{Headers, Request, Response};
use crate::push::ClickOutcome;
use crate::sync::SyncTag;
use crate::worker::{ClientMessage, SyncOutcome, Worker, WorkerMessage};

/// Largest request body the proxy buffers.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[derive(Clone)]
struct AppState {
  worker: Worker,
  registry: Arc<ClientRegistry>,
}

/// Error wrapper so handlers can use `?` on eyre results.
struct AppError(color_eyre::Report);

impl<E: Into<color_eyre::Report>> From<E> for AppError {
  fn from(e: E) -> Self {
    Self(e.into())
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> axum::response::Response {
    warn!(error = %self.0, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
  }
}

/// Build the router. `registry` must be the client registry the worker uses.
pub fn router(worker: Worker, registry: Arc<ClientRegistry>) -> Router {
  Router::new()
    .route("/__bael/message", post(message))
    .route("/__bael/sync/{tag}", post(sync))
    .route("/__bael/push", post(push))
    .route("/__bael/queue", post(enqueue))
    .route("/__bael/events", get(events))
    .route("/__bael/notification-click", post(notification_click))
    .fallback(proxy)
    .with_state(AppState { worker, registry })
}

/// Serve until Ctrl+C.
pub async fn serve(worker: Worker, registry: Arc<ClientRegistry>, addr: SocketAddr) -> Result<()> {
  let origin = worker.settings().origin.to_string();
  let app = router(worker, registry);

  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;

  info!(%addr, %origin, "caching proxy listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

// ============================================================================
// Proxy
// ============================================================================

async fn proxy(
  State(state): State<AppState>,
  req: axum::extract::Request,
) -> axum::response::Response {
  let request = match into_worker_request(&state.worker.settings().origin, req).await {
    Ok(request) => request,
    Err(e) => {
      warn!(error = %e, "unreadable request");
      return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
  };

  if let Some(response) = state.worker.handle_fetch(&request).await {
    return into_http_response(response);
  }

  match state.worker.passthrough(&request).await {
    Ok(response) => into_http_response(response),
    Err(e) => {
      warn!(url = %request.url, error = %e, "upstream unreachable");
      (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
    }
  }
}

/// Rebase an incoming request onto the origin. Only path and query are taken
/// from the incoming URI so a request can never be steered to another host.
/// `Accept-Encoding` is dropped so the HTTP client negotiates and decodes
/// compression itself.
async fn into_worker_request(origin: &Url, req: axum::extract::Request) -> Result<Request> {
  let (parts, body) = req.into_parts();

  let mut url = origin.clone();
  url.set_path(parts.uri.path());
  url.set_query(parts.uri.query());

  let headers: Headers = parts
    .headers
    .iter()
    .filter(|(name, _)| {
      !is_hop_by_hop(name.as_str()) && name.as_str() != header::ACCEPT_ENCODING.as_str()
    })
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| eyre!("Failed to read request body: {}", e))?;

  Ok(Request {
    method: parts.method,
    url,
    headers,
    body: if bytes.is_empty() {
      None
    } else {
      Some(bytes.to_vec())
    },
  })
}

fn into_http_response(response: Response) -> axum::response::Response {
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

  let mut builder = axum::http::Response::builder().status(status);
  for (name, value) in &response.headers {
    if !is_hop_by_hop(name) {
      builder = builder.header(name.as_str(), value.as_str());
    }
  }

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|e| {
      warn!(error = %e, "invalid response headers");
      StatusCode::BAD_GATEWAY.into_response()
    })
}

// ============================================================================
// Control endpoints
// ============================================================================

async fn message(
  State(state): State<AppState>,
  Json(message): Json<ClientMessage>,
) -> Result<axum::response::Response, AppError> {
  match state.worker.handle_message(message).await? {
    Some(reply) => Ok(Json(reply).into_response()),
    None => Ok(StatusCode::NO_CONTENT.into_response()),
  }
}

async fn sync(
  State(state): State<AppState>,
  Path(tag): Path<String>,
) -> Result<Json<Value>, AppError> {
  let tag: SyncTag = tag.parse()?;

  let body = match state.worker.sync(&tag).await? {
    SyncOutcome::Replayed(report) => json!({
      "tag": tag.to_string(),
      "sent": report.sent,
      "retained": report.retained,
    }),
    SyncOutcome::Notified(clients) => json!({ "tag": tag.to_string(), "notified": clients }),
    SyncOutcome::Ignored => json!({ "tag": tag.to_string(), "ignored": true }),
  };

  Ok(Json(body))
}

async fn push(
  State(state): State<AppState>,
  body: axum::body::Bytes,
) -> Result<Json<Value>, AppError> {
  let raw = if body.is_empty() { None } else { Some(body.as_ref()) };
  let notification = state.worker.push(raw)?;
  Ok(Json(serde_json::to_value(notification)?))
}

async fn enqueue(
  State(state): State<AppState>,
  Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
  let message = state.worker.enqueue(body)?;
  Ok((StatusCode::ACCEPTED, Json(json!({ "id": message.id }))))
}

#[derive(Debug, Deserialize)]
struct ClickRequest {
  action: Option<String>,
  #[serde(default)]
  data: Value,
}

async fn notification_click(
  State(state): State<AppState>,
  Json(click): Json<ClickRequest>,
) -> Result<Json<Value>, AppError> {
  let outcome = state
    .worker
    .notification_click(click.action.as_deref(), click.data)?;

  let body = match outcome {
    ClickOutcome::Dismissed => json!({ "outcome": "dismissed" }),
    ClickOutcome::Focused(id) => json!({ "outcome": "focused", "client": id }),
    ClickOutcome::Opened(id) => json!({ "outcome": "opened", "client": id }),
  };
  Ok(Json(body))
}

/// Register the caller as a client and stream worker messages to it.
async fn events(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
  let url = headers
    .get(header::REFERER)
    .and_then(|v| v.to_str().ok())
    .map(String::from)
    .unwrap_or_else(|| state.worker.settings().origin.to_string());

  let (id, rx) = state.registry.register(&url)?;
  let subscription = Subscription {
    id,
    registry: state.registry,
    rx,
  };

  let stream = futures::stream::unfold(subscription, |mut sub| async move {
    let message = sub.rx.recv().await?;
    Some((Event::default().json_data(&message), sub))
  });

  Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// One SSE connection. The client is unregistered when the stream is dropped.
struct Subscription {
  id: ClientId,
  registry: Arc<ClientRegistry>,
  rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    match self.registry.unregister(self.id) {
      Ok(()) => debug!(id = self.id, "client disconnected"),
      Err(e) => warn!(id = self.id, error = %e, "failed to unregister client"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{harness, ORIGIN};
  use crate::clients::Clients;

  #[tokio::test]
  async fn test_request_is_rebased_onto_origin() {
    let origin = Url::parse(ORIGIN).unwrap();
    let req = axum::http::Request::builder()
      .uri("//evil.example/steal?x=1")
      .header("Host", "localhost:50080")
      .header("Accept", "text/html")
      .body(Body::empty())
      .unwrap();

    let request = into_worker_request(&origin, req).await.unwrap();

    assert_eq!(request.url.host_str(), Some("app.test"));
    assert_eq!(request.url.query(), Some("x=1"));
    assert_eq!(request.header("host"), None);
    assert_eq!(request.header("accept"), Some("text/html"));
    assert!(request.body.is_none());
  }

  #[test]
  fn test_response_drops_hop_by_hop_headers() {
    let mut response = Response::new(200, "text/css", "body{}");
    response
      .headers
      .push(("Transfer-Encoding".to_string(), "chunked".to_string()));

    let http = into_http_response(response);

    assert_eq!(http.status(), StatusCode::OK);
    assert_eq!(http.headers().get("content-type").unwrap(), "text/css");
    assert!(http.headers().get("transfer-encoding").is_none());
  }

  #[tokio::test]
  async fn test_proxy_serves_offline_api_fallback() {
    let h = harness();
    let app = router(h.worker.clone(), h.clients.clone());
    let req = axum::http::Request::builder()
      .uri("/api/chats")
      .body(Body::empty())
      .unwrap();

    let response = tower_service(app, req).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "offline");
  }

  #[tokio::test]
  async fn test_message_endpoint_replies_with_cache_size() {
    let h = harness();
    let app = router(h.worker.clone(), h.clients.clone());
    let req = axum::http::Request::builder()
      .method("POST")
      .uri("/__bael/message")
      .header("Content-Type", "application/json")
      .body(Body::from(r#"{"type":"GET_CACHE_SIZE"}"#))
      .unwrap();

    let response = tower_service(app, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"type": "CACHE_SIZE", "size": 0}));
  }

  #[tokio::test]
  async fn test_post_passes_through_to_origin() {
    let h = harness();
    h.network.respond("http://app.test/api/message", 201, "created");
    let app = router(h.worker.clone(), h.clients.clone());

    let response = tower_service(app, post_json("/api/message", r#"{"text":"hi"}"#)).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let requests = h.network.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, reqwest::Method::POST);
    assert_eq!(requests[0].body.as_deref(), Some(br#"{"text":"hi"}"#.as_slice()));
    assert!(h.worker.storage().match_any("http://app.test/api/message").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_queue_endpoint_generates_id() {
    let h = harness();
    let app = router(h.worker.clone(), h.clients.clone());

    let response = tower_service(app, post_json("/__bael/queue", r#"{"text":"hi"}"#)).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let id = body["id"].as_str().unwrap();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

    let queued = h.worker.queue().all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, id);
  }

  #[tokio::test]
  async fn test_sync_endpoint_replays_queue() {
    let h = harness();
    h.network.respond("http://app.test/api/message", 200, "{}");
    h.worker.enqueue(json!({"id": "m1", "text": "hi"})).unwrap();
    let app = router(h.worker.clone(), h.clients.clone());

    let response = tower_service(app.clone(), post_json("/__bael/sync/sync-messages", "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
      json_body(response).await,
      json!({"tag": "sync-messages", "sent": ["m1"], "retained": []})
    );
    assert!(h.worker.queue().all().unwrap().is_empty());

    let response = tower_service(app.clone(), post_json("/__bael/sync/sync-data", "")).await;
    assert_eq!(json_body(response).await, json!({"tag": "sync-data", "notified": 0}));

    let response = tower_service(app, post_json("/__bael/sync/unknown", "")).await;
    assert_eq!(json_body(response).await, json!({"tag": "unknown", "ignored": true}));
  }

  #[tokio::test]
  async fn test_push_endpoint_shows_notification() {
    let h = harness();
    let app = router(h.worker.clone(), h.clients.clone());

    let response = tower_service(
      app.clone(),
      post_json("/__bael/push", r#"{"title":"Hi","body":"there"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["title"], "Hi");
    assert_eq!(body["icon"], "/public/icon-192.png");

    let response = tower_service(app, post_json("/__bael/push", "")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let shown = h.notifier.shown();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].body, "there");
  }

  #[tokio::test]
  async fn test_notification_click_endpoint() {
    let h = harness();
    let app = router(h.worker.clone(), h.clients.clone());

    let response = tower_service(
      app.clone(),
      post_json("/__bael/notification-click", r#"{"action":"dismiss"}"#),
    )
    .await;
    assert_eq!(json_body(response).await, json!({"outcome": "dismissed"}));

    let response = tower_service(
      app,
      post_json("/__bael/notification-click", r#"{"data":{"chat":1}}"#),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "opened");

    let clients = h.clients.match_all().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(body["client"], clients[0].id);
  }

  #[tokio::test]
  async fn test_events_stream_registers_client() {
    use futures::StreamExt;
    use std::time::Duration;

    let h = harness();
    let app = router(h.worker.clone(), h.clients.clone());
    let req = axum::http::Request::builder()
      .uri("/__bael/events")
      .header("Referer", "http://app.test/chat")
      .body(Body::empty())
      .unwrap();

    let response = tower_service(app, req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
      response.headers().get("content-type").unwrap(),
      "text/event-stream"
    );
    let clients = h.clients.match_all().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].url, "http://app.test/chat");

    assert_eq!(
      h.worker.sync(&SyncTag::Data).await.unwrap(),
      SyncOutcome::Notified(1)
    );

    let mut stream = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
      .await
      .unwrap()
      .unwrap()
      .unwrap();
    let frame = String::from_utf8(frame.to_vec()).unwrap();
    assert!(frame.starts_with("data: "));
    assert!(frame.contains("SYNC_COMPLETE"));

    drop(stream);
    assert!(h.clients.match_all().unwrap().is_empty());
  }

  fn post_json(uri: &str, body: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
      .method("POST")
      .uri(uri)
      .header("Content-Type", "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
  }

  async fn tower_service(
    app: Router,
    req: axum::http::Request<Body>,
  ) -> axum::response::Response {
    use tower::ServiceExt;
    app.oneshot(req).await.unwrap()
  }
}
