//! HTTP client for a remote blob store: get/head/put/delete, connection
//! pooling via a shared `reqwest::Client`, and retry-with-backoff through a
//! circuit breaker from `kiln-resilience` so a degraded remote does not stall
//! every caller indefinitely.

use kiln_hash::Digest;
use kiln_resilience::{execute_with_retry, CircuitBreaker, ResilienceError, RetryPolicy, RetryableError};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("blob not found: {0}")]
    NotFound(Digest),
    #[error("server error: {status}: {body}")]
    Server { status: StatusCode, body: String },
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl RetryableError for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Server { status, .. } => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            ClientError::NotFound(_) | ClientError::InvalidUrl(_) => false,
        }
    }
}

/// Client for the remote CAS HTTP surface.
pub struct CasClient {
    base_url: String,
    http: Client,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    bearer_token: Option<String>,
}

impl CasClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(base_url));
        }
        Ok(Self {
            base_url,
            http: Client::new(),
            retry_policy: RetryPolicy::default(),
            breaker: Arc::new(CircuitBreaker::new(5, Duration::from_secs(30), 2)),
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get(&self, digest: &Digest) -> Result<Vec<u8>, ResilienceError<ClientError>> {
        let url = format!("{}/artifacts/{}", self.base_url, digest);
        execute_with_retry(&self.retry_policy, &self.breaker, "cas-get", || async {
            let response = self.authed(self.http.get(&url)).send().await?;
            match response.status() {
                StatusCode::OK => Ok(response.bytes().await?.to_vec()),
                StatusCode::NOT_FOUND => Err(ClientError::NotFound(*digest)),
                status => Err(ClientError::Server { status, body: response.text().await.unwrap_or_default() }),
            }
        })
        .await
    }

    pub async fn head(&self, digest: &Digest) -> Result<bool, ResilienceError<ClientError>> {
        let url = format!("{}/artifacts/{}", self.base_url, digest);
        execute_with_retry(&self.retry_policy, &self.breaker, "cas-head", || async {
            let response = self.authed(self.http.head(&url)).send().await?;
            Ok(response.status() == StatusCode::OK)
        })
        .await
    }

    pub async fn put(&self, digest: &Digest, content: Vec<u8>) -> Result<(), ResilienceError<ClientError>> {
        let url = format!("{}/artifacts/{}", self.base_url, digest);
        execute_with_retry(&self.retry_policy, &self.breaker, "cas-put", || {
            let content = content.clone();
            let url = url.clone();
            async move {
                let response = self.authed(self.http.put(&url).body(content)).send().await?;
                match response.status() {
                    StatusCode::CREATED | StatusCode::OK => Ok(()),
                    status => Err(ClientError::Server { status, body: response.text().await.unwrap_or_default() }),
                }
            }
        })
        .await
    }

    pub async fn delete(&self, digest: &Digest) -> Result<(), ResilienceError<ClientError>> {
        let url = format!("{}/artifacts/{}", self.base_url, digest);
        execute_with_retry(&self.retry_policy, &self.breaker, "cas-delete", || async {
            let response = self.authed(self.http.delete(&url)).send().await?;
            match response.status() {
                StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
                status => Err(ClientError::Server { status, body: response.text().await.unwrap_or_default() }),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_urls_without_a_scheme() {
        assert!(CasClient::new("localhost:9090").is_err());
        assert!(CasClient::new("http://localhost:9090").is_ok());
    }

    #[test]
    fn server_errors_are_retryable_but_not_found_is_not() {
        let not_found = ClientError::NotFound(Digest::default());
        assert!(!not_found.is_retryable());
        let server_err = ClientError::Server { status: StatusCode::SERVICE_UNAVAILABLE, body: String::new() };
        assert!(server_err.is_retryable());
    }
}
