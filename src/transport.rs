//! HTTP boundary of the offline layer.
//!
//! Requests and responses are plain data. The cache, queue and sync engine
//! only ever talk to a [`Transport`], which keeps them testable without a
//! server; [`HttpTransport`] is the live implementation.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use reqwest::header::{ACCEPT, ETAG};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Patch,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Patch => "PATCH",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PATCH" => Ok(Method::Patch),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!("unsupported HTTP method: {}", other)),
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Patch => reqwest::Method::PATCH,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// An API request described as data. `path` is relative to the API base and
/// may carry a query string.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

impl ApiRequest {
  /// A JSON `null` body is treated as no body at all.
  pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method,
      path: path.into(),
      body: body.filter(|b| !b.is_null()),
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path, None)
  }
}

/// Status and raw body of an API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: String,
  /// Validator sent by the server, if any
  pub etag: Option<String>,
}

impl ApiResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
      etag: None,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Parse the body as JSON. An empty body (e.g. 204) reads as `null`.
  pub fn json(&self) -> Result<Value> {
    if self.body.trim().is_empty() {
      return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&self.body)?)
  }
}

/// Something that can execute an [`ApiRequest`].
///
/// Any HTTP response, including 4xx/5xx, is `Ok`; `Err` means no response
/// was obtained at all.
pub trait Transport: Send + Sync {
  fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse>> + Send;
}

/// Live transport over `reqwest`.
///
/// Cookies set by the server are kept and replayed on later requests, so
/// session credentials travel with every call (queued replays included).
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    Url::parse(base_url)
      .map_err(|e| Error::Transport(format!("Invalid base URL {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .cookie_store(true)
      .build()
      .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
    let url = self.url(&request.path);

    let mut builder = self
      .client
      .request(request.method.into(), &url)
      .header(ACCEPT, "application/json");
    if let Some(body) = &request.body {
      // Sets Content-Type: application/json
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| Error::Transport(format!("{} {}: {}", request.method, url, e)))?;

    let status = response.status().as_u16();
    let etag = response
      .headers()
      .get(ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .text()
      .await
      .map_err(|e| Error::Transport(format!("Failed to read response from {}: {}", url, e)))?;

    tracing::debug!(method = %request.method, %url, status, "api request");

    Ok(ApiResponse { status, body, etag })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_null_body_is_dropped() {
    let req = ApiRequest::new(Method::Post, "/tasks", Some(Value::Null));
    assert_eq!(req.body, None);

    let req = ApiRequest::new(Method::Post, "/tasks", Some(serde_json::json!({"a": 1})));
    assert!(req.body.is_some());
  }

  #[test]
  fn test_empty_body_reads_as_null() {
    let resp = ApiResponse::new(204, "");
    assert!(resp.is_success());
    assert_eq!(resp.json().unwrap(), Value::Null);
  }

  #[test]
  fn test_malformed_body_is_decode_error() {
    let resp = ApiResponse::new(200, "{not json");
    assert!(matches!(resp.json(), Err(Error::Decode(_))));
  }

  #[test]
  fn test_success_range() {
    assert!(ApiResponse::new(200, "").is_success());
    assert!(ApiResponse::new(299, "").is_success());
    assert!(!ApiResponse::new(304, "").is_success());
    assert!(!ApiResponse::new(404, "").is_success());
  }

  #[test]
  fn test_method_parse() {
    assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
    assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
    assert!("TRACE".parse::<Method>().is_err());
  }

  #[test]
  fn test_base_url_is_validated_and_trimmed() {
    assert!(HttpTransport::new("not a url").is_err());

    let transport = HttpTransport::new("https://field.example.com/api/").unwrap();
    assert_eq!(transport.base_url(), "https://field.example.com/api");
    assert_eq!(
      transport.url("/sites/current"),
      "https://field.example.com/api/sites/current"
    );
  }
}
