//! Scripted capabilities for unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::net::{Network, Request, Response};
use crate::push::{Notification, Notifier};
use crate::worker::{Capabilities, Worker, WorkerSettings};

pub const ORIGIN: &str = "http://app.test";

#[derive(Clone)]
enum Route {
  Respond(Response),
  Delayed(Duration, Response),
  Fail,
}

/// Network whose answers are scripted per URL. Unknown URLs fail like a
/// refused connection.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Route>>,
  requests: Mutex<Vec<Request>>,
  calls: AtomicUsize,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  fn route(&self, url: &str, route: Route) {
    self.routes.lock().unwrap().insert(url.to_string(), route);
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.route(url, Route::Respond(Response::new(status, "text/plain", body)));
  }

  pub fn delay(&self, url: &str, delay: Duration, status: u16, body: &str) {
    self.route(
      url,
      Route::Delayed(delay, Response::new(status, "text/plain", body)),
    );
  }

  pub fn fail(&self, url: &str) {
    self.route(url, Route::Fail);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().unwrap().push(request.clone());

    let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    match route {
      Some(Route::Respond(response)) => Ok(response),
      Some(Route::Delayed(delay, response)) => {
        tokio::time::sleep(delay).await;
        Ok(response)
      }
      Some(Route::Fail) | None => Err(eyre!("connection refused: {}", request.url)),
    }
  }
}

/// Notifier that remembers what it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

pub struct Harness {
  pub worker: Worker,
  pub network: Arc<MockNetwork>,
  pub clients: Arc<ClientRegistry>,
  pub notifier: Arc<RecordingNotifier>,
}

/// Worker over an in-memory database and a scripted network.
pub fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
  let mut config = Config {
    origin: ORIGIN.to_string(),
    ..Config::default()
  };
  configure(&mut config);

  let db = Arc::new(Database::open_in_memory().unwrap());
  let network = Arc::new(MockNetwork::new());
  let clients = Arc::new(ClientRegistry::new());
  let notifier = Arc::new(RecordingNotifier::default());

  let settings = WorkerSettings::from_config(&config).unwrap();
  let worker = Worker::new(
    settings,
    Capabilities::sqlite(db, network.clone(), clients.clone(), notifier.clone()),
  );

  Harness {
    worker,
    network,
    clients,
    notifier,
  }
}

pub fn harness() -> Harness {
  harness_with(|_| {})
}
