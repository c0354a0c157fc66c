//! Error taxonomy for the data-fetching layer.
//!
//! Errors are `Clone` because the cache records the most recent failure on
//! each entry and replays it to current and future subscribers until the
//! next successful fetch. Fetch errors are never thrown across the rendering
//! boundary; they travel inside snapshots and `Result`s.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// No response received (DNS, connect, timeout, ...)
  #[error("network error: {0}")]
  Network(String),

  /// Server responded with a failure status
  #[error("server returned {status}: {body}")]
  Http { status: u16, body: String },

  /// Client-side input rejected before anything was sent
  #[error("invalid request: {0}")]
  Validation(String),

  /// Response body did not match the expected shape
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// No cached entry and fetching is not permitted for this query
  #[error("no cached value and fetching is disabled")]
  CacheMiss,
}

impl ApiError {
  /// Whether a retry can plausibly succeed.
  ///
  /// Transport failures and server-side errors are retried; client errors
  /// and local failures are not.
  pub fn is_retryable(&self) -> bool {
    match self {
      ApiError::Network(_) => true,
      ApiError::Http { status, .. } => *status >= 500 || *status == 429,
      ApiError::Validation(_) | ApiError::Decode(_) | ApiError::CacheMiss => false,
    }
  }

  /// Normalize a reqwest error into the taxonomy.
  pub fn from_reqwest(err: reqwest::Error) -> Self {
    if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_server_errors_are_retryable() {
    let err = ApiError::Http {
      status: 503,
      body: String::new(),
    };
    assert!(err.is_retryable());
    assert!(ApiError::Network("connection reset".into()).is_retryable());
  }

  #[test]
  fn test_client_errors_are_not_retryable() {
    let err = ApiError::Http {
      status: 404,
      body: String::new(),
    };
    assert!(!err.is_retryable());
    assert!(!ApiError::Validation("empty name".into()).is_retryable());
    assert!(!ApiError::Decode("missing field".into()).is_retryable());
  }

  #[test]
  fn test_rate_limit_is_retryable() {
    let err = ApiError::Http {
      status: 429,
      body: "slow down".into(),
    };
    assert!(err.is_retryable());
  }
}
