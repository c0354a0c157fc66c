//! Thin HTTP adapter for the backend REST API.
//!
//! Issues bearer-authenticated JSON requests and normalizes failures into
//! the [`ApiError`] taxonomy. Retry and caching live above this layer.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config::Config;

use super::error::ApiError;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Backend API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;

    let base_url = Self::parse_base_url(&config.api.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  /// Build a client against an explicit base URL and token, for tests.
  #[cfg(test)]
  pub fn with_base_url(base_url: &str, token: &str) -> Result<Self> {
    Ok(Self {
      http: reqwest::Client::new(),
      base_url: Self::parse_base_url(base_url).map_err(|e| eyre!("Invalid url: {}", e))?,
      token: token.to_string(),
    })
  }

  /// Parse the base URL, ensuring a trailing slash so `Url::join` appends
  /// instead of replacing the last path segment.
  fn parse_base_url(raw: &str) -> std::result::Result<Url, url::ParseError> {
    if raw.ends_with('/') {
      Url::parse(raw)
    } else {
      Url::parse(&format!("{}/", raw))
    }
  }

  /// Issue a request and decode the JSON response body.
  pub async fn request<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> std::result::Result<T, ApiError> {
    let response = self.send(method, path, body).await?;
    response
      .json::<T>()
      .await
      .map_err(|e| ApiError::Decode(e.to_string()))
  }

  /// Issue a request, ignoring any response body.
  pub async fn request_empty(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> std::result::Result<(), ApiError> {
    self.send(method, path, body).await.map(|_| ())
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, ApiError> {
    self.request(Method::GET, path, None).await
  }

  pub async fn post<T: DeserializeOwned>(
    &self,
    path: &str,
    body: &Value,
  ) -> std::result::Result<T, ApiError> {
    self.request(Method::POST, path, Some(body)).await
  }

  pub async fn put<T: DeserializeOwned>(
    &self,
    path: &str,
    body: &Value,
  ) -> std::result::Result<T, ApiError> {
    self.request(Method::PUT, path, Some(body)).await
  }

  pub async fn delete(&self, path: &str) -> std::result::Result<(), ApiError> {
    self.request_empty(Method::DELETE, path, None).await
  }

  async fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> std::result::Result<reqwest::Response, ApiError> {
    let url = self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Validation(format!("invalid request path {}: {}", path, e)))?;

    let mut request = self.http.request(method, url).bearer_auth(&self.token);
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await.map_err(ApiError::from_reqwest)?;

    let status = response.status();
    if status.is_success() {
      Ok(response)
    } else {
      // Server responded with a failure; keep the body for the caller.
      let body = response.text().await.unwrap_or_default();
      Err(Self::http_error(status, body))
    }
  }

  fn http_error(status: StatusCode, body: String) -> ApiError {
    ApiError::Http {
      status: status.as_u16(),
      body,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{bearer_token, body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_get_decodes_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/bills"))
      .and(bearer_token("secret"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
      .mount(&server)
      .await;

    let client = ApiClient::with_base_url(&server.uri(), "secret").unwrap();
    let bills: Value = client.get("/bills").await.unwrap();
    assert_eq!(bills, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn test_error_status_surfaces_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/accounts"))
      .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
      .mount(&server)
      .await;

    let client = ApiClient::with_base_url(&server.uri(), "secret").unwrap();
    let err = client.get::<Value>("/accounts").await.unwrap_err();
    assert_eq!(
      err,
      ApiError::Http {
        status: 500,
        body: "db down".to_string(),
      }
    );
  }

  #[tokio::test]
  async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/categories"))
      .and(body_json(json!({"name": "Travel"})))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 5, "name": "Travel"})))
      .mount(&server)
      .await;

    let client = ApiClient::with_base_url(&server.uri(), "secret").unwrap();
    let created: Value = client
      .post("/categories", &json!({"name": "Travel"}))
      .await
      .unwrap();
    assert_eq!(created["id"], json!(5));
  }

  #[tokio::test]
  async fn test_unreachable_server_is_network_error() {
    // Port 1 on localhost refuses connections
    let client = ApiClient::with_base_url("http://127.0.0.1:1", "secret").unwrap();
    let err = client.get::<Value>("/bills").await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
  }

  #[tokio::test]
  async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/bills"))
      .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
      .mount(&server)
      .await;

    let client = ApiClient::with_base_url(&server.uri(), "secret").unwrap();
    let err = client.get::<Value>("/bills").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
  }
}
