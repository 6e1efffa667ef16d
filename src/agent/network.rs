//! Network access for the caching agent.

use async_trait::async_trait;
use url::Url;

use super::http::{Request, Response, ResponseKind};
use crate::error::AgentError;

/// Something that can perform an HTTP exchange.
#[async_trait]
pub trait Network: Send + Sync {
  /// Perform the request. Only transport failures are errors; any HTTP status is a response.
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError>;
}

/// reqwest-backed network.
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url) -> Result<Self, AgentError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("otodo/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| AgentError::network(&origin, e))?;

    Ok(Self {
      client,
      origin,
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| AgentError::network(&request.url, e))?;

    let url = response.url().clone();
    let status = response.status().as_u16();
    let kind = if url.origin() == self.origin.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| AgentError::network(&request.url, e))?
      .to_vec();

    Ok(Response {
      url,
      status,
      kind,
      headers,
      body,
    })
  }
}

#[cfg(test)]
pub mod fake {
  //! In-process network for tests.

  use super::*;
  use reqwest::Method;
  use std::collections::{HashMap, HashSet};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashSet<String>>,
    failing_bodies: Mutex<Vec<String>>,
    offline: AtomicBool,
    log: Mutex<Vec<Request>>,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    /// Serve a same-origin response with `status` and `body` for `url`.
    pub fn route(&self, url: &str, status: u16, body: &[u8]) {
      let parsed = Url::parse(url).unwrap();
      self.route_response(Response {
        url: parsed,
        status,
        kind: ResponseKind::Basic,
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body: body.to_vec(),
      });
    }

    pub fn route_response(&self, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(response.url.to_string(), response);
    }

    /// Make requests to `url` fail at the transport level.
    pub fn fail(&self, url: &str) {
      self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Make requests whose body contains `needle` fail at the transport level.
    pub fn fail_bodies_containing(&self, needle: &str) {
      self.failing_bodies.lock().unwrap().push(needle.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
      self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
      self
        .log
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.url.as_str() == url)
        .count()
    }

    pub fn posts(&self) -> Vec<Request> {
      self
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::POST)
        .collect()
    }
  }

  #[async_trait]
  impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, AgentError> {
      self.log.lock().unwrap().push(request.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(AgentError::network(&request.url, "network unreachable"));
      }
      if self.failing.lock().unwrap().contains(request.url.as_str()) {
        return Err(AgentError::network(&request.url, "connection reset"));
      }

      if let Some(body) = &request.body {
        let body = String::from_utf8_lossy(body);
        if self
          .failing_bodies
          .lock()
          .unwrap()
          .iter()
          .any(|needle| body.contains(needle.as_str()))
        {
          return Err(AgentError::network(&request.url, "connection reset"));
        }
      }

      let found = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
      Ok(found.unwrap_or_else(|| Response {
        url: request.url.clone(),
        status: 404,
        kind: ResponseKind::Basic,
        headers: Vec::new(),
        body: b"not found".to_vec(),
      }))
    }
  }
}
