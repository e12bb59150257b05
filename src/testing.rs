//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

#[derive(Clone)]
enum Reply {
  Respond(ApiResponse),
  Unreachable,
}

#[derive(Default)]
struct Script {
  routes: HashMap<(Method, String), Reply>,
  calls: Vec<ApiRequest>,
}

/// Transport that answers from a fixed script and records every request.
///
/// Unscripted requests get `200 {}`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
  script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Always answer `method path` with `status` and `body`.
  pub fn respond(&self, method: Method, path: &str, status: u16, body: &str) -> &Self {
    self.script.lock().unwrap().routes.insert(
      (method, path.to_string()),
      Reply::Respond(ApiResponse::new(status, body)),
    );
    self
  }

  /// Always fail `method path` without a response.
  pub fn unreachable(&self, method: Method, path: &str) -> &Self {
    self
      .script
      .lock()
      .unwrap()
      .routes
      .insert((method, path.to_string()), Reply::Unreachable);
    self
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.script.lock().unwrap().calls.clone()
  }

  pub fn call_count(&self) -> usize {
    self.script.lock().unwrap().calls.len()
  }

  /// Paths of recorded requests, in call order.
  pub fn paths(&self) -> Vec<String> {
    self.calls().into_iter().map(|c| c.path).collect()
  }
}

impl Transport for ScriptedTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
    let mut script = self.script.lock().unwrap();
    script.calls.push(request.clone());

    match script.routes.get(&(request.method, request.path.clone())) {
      Some(Reply::Respond(response)) => Ok(response.clone()),
      Some(Reply::Unreachable) => Err(Error::Transport(format!(
        "{} {}: connection refused",
        request.method, request.path
      ))),
      None => Ok(ApiResponse::new(200, "{}")),
    }
  }
}
