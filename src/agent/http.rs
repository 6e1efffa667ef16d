//! Request and response values passed through the caching agent.

use reqwest::Method;
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

/// How a request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Full page load
  Navigate,
  /// Sub-resource load (manifest, scripts, API calls)
  Subresource,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn head(url: Url) -> Self {
    Self {
      method: Method::HEAD,
      ..Self::get(url)
    }
  }

  /// POST with `value` serialized as the JSON body.
  pub fn post_json<T: Serialize>(url: Url, value: &T) -> Result<Self, serde_json::Error> {
    let body = serde_json::to_vec(value)?;
    Ok(Self {
      method: Method::POST,
      url,
      mode: RequestMode::Subresource,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
    })
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Response type, following the fetch classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable contents
  Cors,
  /// Cross-origin response with hidden contents
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseKind::Basic),
      "cors" => Some(ResponseKind::Cors),
      "opaque" => Some(ResponseKind::Opaque),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after redirects
  pub url: Url,
  pub status: u16,
  pub kind: ResponseKind,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain successful same-origin responses are stored.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Hex-encoded SHA-256 of the body.
  pub fn digest(&self) -> String {
    body_digest(&self.body)
  }
}

pub fn body_digest(body: &[u8]) -> String {
  hex::encode(Sha256::digest(body))
}

/// Static list of same-origin paths eligible for caching.
#[derive(Debug, Clone)]
pub struct AllowList {
  origin: Url,
  paths: Vec<String>,
}

impl AllowList {
  pub fn new(origin: Url, paths: Vec<String>) -> Self {
    Self { origin, paths }
  }

  pub fn allows(&self, url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
      return false;
    }

    if url.origin() != self.origin.origin() {
      return false;
    }

    self.paths.iter().any(|p| p == url.path())
  }

  /// Absolute URLs of every allow-listed path.
  pub fn urls(&self) -> Result<Vec<Url>, url::ParseError> {
    self.paths.iter().map(|p| self.origin.join(p)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn allow_list() -> AllowList {
    AllowList::new(
      Url::parse("http://localhost:3000/").unwrap(),
      vec!["/".to_string(), "/manifest.json".to_string()],
    )
  }

  #[test]
  fn test_allows_listed_paths() {
    let list = allow_list();
    assert!(list.allows(&Url::parse("http://localhost:3000/").unwrap()));
    assert!(list.allows(&Url::parse("http://localhost:3000/manifest.json").unwrap()));
  }

  #[test]
  fn test_rejects_unlisted_path() {
    let list = allow_list();
    assert!(!list.allows(&Url::parse("http://localhost:3000/api/todos").unwrap()));
    assert!(!list.allows(&Url::parse("http://localhost:3000/manifest.json/x").unwrap()));
  }

  #[test]
  fn test_query_string_does_not_change_path_match() {
    let list = allow_list();
    assert!(list.allows(&Url::parse("http://localhost:3000/manifest.json?v=2").unwrap()));
  }

  #[test]
  fn test_rejects_cross_origin() {
    let list = allow_list();
    assert!(!list.allows(&Url::parse("http://localhost:4000/").unwrap()));
    assert!(!list.allows(&Url::parse("https://localhost:3000/").unwrap()));
    assert!(!list.allows(&Url::parse("http://cdn.example.com/manifest.json").unwrap()));
  }

  #[test]
  fn test_rejects_non_http_scheme() {
    let list = allow_list();
    assert!(!list.allows(&Url::parse("ftp://localhost:3000/").unwrap()));
    assert!(!list.allows(&Url::parse("data:text/plain,hello").unwrap()));
  }

  #[test]
  fn test_urls_resolve_against_origin() {
    let urls = allow_list().urls().unwrap();
    assert_eq!(urls[0].as_str(), "http://localhost:3000/");
    assert_eq!(urls[1].as_str(), "http://localhost:3000/manifest.json");
  }

  #[test]
  fn test_post_json_sets_content_type() {
    let url = Url::parse("http://localhost:3000/api/todos").unwrap();
    let request = Request::post_json(url, &serde_json::json!({"title": "x"})).unwrap();
    assert_eq!(request.method, Method::POST);
    assert_eq!(
      request.headers,
      vec![("Content-Type".to_string(), "application/json".to_string())]
    );
    assert_eq!(request.body.as_deref(), Some(br#"{"title":"x"}"#.as_slice()));
  }

  #[test]
  fn test_only_basic_200_is_cacheable() {
    let mut response = Response {
      url: Url::parse("http://localhost:3000/manifest.json").unwrap(),
      status: 200,
      kind: ResponseKind::Basic,
      headers: Vec::new(),
      body: b"{}".to_vec(),
    };
    assert!(response.is_cacheable());

    response.status = 206;
    assert!(!response.is_cacheable());

    response.status = 200;
    response.kind = ResponseKind::Opaque;
    assert!(!response.is_cacheable());
  }

  #[test]
  fn test_digest_is_sha256_hex() {
    assert_eq!(
      body_digest(b""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }
}
