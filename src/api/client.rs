use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::sync::params::QueryParams;

use super::service::{DataService, Page};

/// REST API client shared by every resource.
#[derive(Clone)]
pub struct RestClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl RestClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut base_url = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;
    // Url::join drops the last path segment unless it ends in '/'
    if !base_url.path().ends_with('/') {
      base_url.set_path(&format!("{}/", base_url.path()));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Config::get_api_token(),
    })
  }

  /// Client scoped to one resource endpoint.
  pub fn resource<T>(&self, endpoint: &str) -> ResourceClient<T> {
    ResourceClient {
      client: self.clone(),
      endpoint: endpoint.trim_matches('/').to_string(),
      _marker: PhantomData,
    }
  }

  fn request(&self, method: Method, path: &str) -> SyncResult<RequestBuilder> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| SyncError::Transport(format!("Invalid request path {}: {}", path, e)))?;

    let builder = self.http.request(method, url);
    Ok(match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  async fn send(&self, builder: RequestBuilder) -> SyncResult<Response> {
    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        SyncError::Transport("Request timed out".to_string())
      } else {
        SyncError::Transport(e.to_string())
      }
    })?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Request failed");
    Err(SyncError::from_response(status.as_u16(), &body, retry_after))
  }

  async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<T> {
    self
      .send(builder)
      .await?
      .json()
      .await
      .map_err(|e| SyncError::Decode(e.to_string()))
  }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
  headers
    .get(RETRY_AFTER)?
    .to_str()
    .ok()?
    .trim()
    .parse()
    .ok()
    .map(Duration::from_secs)
}

/// List endpoints answer either with a bare array or a `{ data: [...] }` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
  Page(Page<T>),
  Envelope { data: Vec<T> },
  Bare(Vec<T>),
}

/// Typed [`DataService`] over one REST endpoint.
pub struct ResourceClient<T> {
  client: RestClient,
  endpoint: String,
  _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceClient<T> {
  fn item_path(&self, id: &str) -> String {
    format!("{}/{}", self.endpoint, id)
  }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> DataService<T> for ResourceClient<T> {
  async fn list_paged(&self, params: &QueryParams) -> SyncResult<Page<T>> {
    let builder = self
      .client
      .request(Method::GET, &self.endpoint)?
      .query(&params.to_pairs());

    match self.client.json::<ListBody<T>>(builder).await? {
      ListBody::Page(page) => Ok(page),
      // Server ignored pagination; present everything as a single page
      ListBody::Envelope { data } | ListBody::Bare(data) => {
        let total = data.len() as u64;
        Ok(Page {
          page: params.page().unwrap_or(1),
          limit: params.limit().unwrap_or(data.len().max(1) as u32),
          total,
          total_pages: None,
          has_next_page: None,
          has_previous_page: None,
          data,
        })
      }
    }
  }

  async fn list_all(&self, params: &QueryParams) -> SyncResult<Vec<T>> {
    let builder = self
      .client
      .request(Method::GET, &self.endpoint)?
      .query(&params.to_pairs());

    match self.client.json::<ListBody<T>>(builder).await? {
      ListBody::Page(Page { data, .. }) | ListBody::Envelope { data } | ListBody::Bare(data) => {
        Ok(data)
      }
    }
  }

  async fn create(&self, payload: &Value) -> SyncResult<T> {
    let builder = self
      .client
      .request(Method::POST, &self.endpoint)?
      .json(payload);
    self.client.json(builder).await
  }

  async fn update(&self, id: &str, payload: &Value) -> SyncResult<T> {
    let builder = self
      .client
      .request(Method::PUT, &self.item_path(id))?
      .json(payload);
    self.client.json(builder).await
  }

  async fn delete(&self, id: &str) -> SyncResult<bool> {
    let builder = self.client.request(Method::DELETE, &self.item_path(id))?;
    self.client.send(builder).await?;
    Ok(true)
  }

  async fn get_by_id(&self, id: &str) -> SyncResult<T> {
    let builder = self.client.request(Method::GET, &self.item_path(id))?;
    self.client.json(builder).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::Record;
  use reqwest::header::HeaderValue;
  use serde_json::json;

  #[test]
  fn test_retry_after_seconds() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));
    assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

    headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
    assert_eq!(retry_after(&headers), None);
  }

  #[test]
  fn test_list_body_shapes() {
    let page: ListBody<Record> = serde_json::from_value(json!({
      "data": [{ "id": 1 }], "page": 2, "limit": 1, "total": 5
    }))
    .unwrap();
    assert!(matches!(page, ListBody::Page(Page { page: 2, .. })));

    let envelope: ListBody<Record> = serde_json::from_value(json!({ "data": [{ "id": 1 }] })).unwrap();
    assert!(matches!(envelope, ListBody::Envelope { .. }));

    let bare: ListBody<Record> = serde_json::from_value(json!([{ "id": 1 }, { "id": 2 }])).unwrap();
    assert!(matches!(bare, ListBody::Bare(ref rows) if rows.len() == 2));
  }
}
