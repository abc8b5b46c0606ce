//! Request, response and lookup result types shared by the worker and storage.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Identifies the page (client) that issued a request.
pub type ClientId = u64;

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  /// Page that issued the request, if known
  pub client: Option<ClientId>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      client: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A document navigation (accepts HTML).
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_header("accept", "text/html,application/xhtml+xml")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_lowercase(), value.to_string()));
    self
  }

  pub fn with_client(mut self, client: ClientId) -> Self {
    self.client = Some(client);
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Normalized cache key: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A captured or synthesized response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_lowercase(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// 2xx status
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Minimal standalone document served when the network, the cache and the
  /// offline partition all come up empty.
  pub fn offline_document() -> Self {
    Self::new(
      503,
      "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
       <body><h1>You are offline</h1><p>Reconnect and try again.</p></body></html>",
    )
    .with_header("content-type", "text/html; charset=utf-8")
  }

  /// Plain 503 for static assets that are neither cached nor reachable.
  pub fn service_unavailable() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }
}

/// A response stored in a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was captured
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Entry from the current version partition
  Cache,
  /// Offline fallback document from the offline partition
  OfflineFallback,
  /// Built locally because nothing else was available
  Synthesized,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::OfflineFallback => write!(f, "offline-fallback"),
      ResponseSource::Synthesized => write!(f, "synthesized"),
    }
  }
}

/// Result of intercepting a request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if served from a partition)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Offline document, always reported as service unavailable.
  pub fn offline_fallback(cached: CachedResponse) -> Self {
    let mut response = cached.response;
    response.status = 503;
    Self {
      response,
      source: ResponseSource::OfflineFallback,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
      cached_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_ignores_fragment_and_method_case() {
    let a = RequestKey::new(
      &Method::GET,
      &Url::parse("https://a.example/app.js?v=1#top").unwrap(),
    );
    let b = RequestKey::new(
      &Method::GET,
      &Url::parse("https://a.example/app.js?v=1").unwrap(),
    );
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
    assert_eq!(a.to_string(), "GET https://a.example/app.js?v=1");
  }

  #[test]
  fn test_key_keeps_query() {
    let a = Request::get(Url::parse("https://a.example/app.js?v=1").unwrap()).key();
    let b = Request::get(Url::parse("https://a.example/app.js?v=2").unwrap()).key();
    assert_ne!(a.hash(), b.hash());
  }

  #[test]
  fn test_accepts_html() {
    let url = Url::parse("https://a.example/notes").unwrap();
    assert!(Request::navigate(url.clone()).accepts_html());
    assert!(!Request::get(url.clone()).accepts_html());
    assert!(!Request::get(url)
      .with_header("Accept", "application/json")
      .accepts_html());
  }

  #[test]
  fn test_offline_fallback_forces_503() {
    let cached = CachedResponse {
      response: Response::new(200, "<html>offline</html>"),
      cached_at: Utc::now(),
    };
    let served = Served::offline_fallback(cached);
    assert_eq!(served.response.status, 503);
    assert_eq!(served.response.body, b"<html>offline</html>");
    assert_eq!(served.source, ResponseSource::OfflineFallback);
  }
}
