//! HTTP client for the REAPI-compatible server: submit an action, poll its
//! operation until done, and query/update the action-result cache directly
//! when a caller already knows it has (or wants to seed) a cached result.

use crate::digest::ReapiDigest;
use crate::error::ReapiError;
use crate::wire::{ActionRequest, ActionResult, Operation};
use kiln_resilience::{execute_with_retry, CircuitBreaker, ResilienceError, RetryPolicy};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ReapiClient {
    base_url: String,
    http: Client,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    poll_interval: Duration,
}

impl ReapiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            retry_policy: RetryPolicy::default(),
            breaker: Arc::new(CircuitBreaker::new(5, Duration::from_secs(30), 2)),
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn submit(&self, request: &ActionRequest) -> Result<Operation, ResilienceError<ReapiError>> {
        let url = format!("{}/v2/actions/execute", self.base_url);
        let body = request.encode();
        execute_with_retry(&self.retry_policy, &self.breaker, "reapi-execute", || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let response = self.http.post(&url).body(body).send().await.map_err(|_| ReapiError::Timeout)?;
                match response.status() {
                    StatusCode::OK => {
                        let bytes = response.bytes().await.map_err(|_| ReapiError::Timeout)?;
                        Operation::decode(&bytes)
                    }
                    status => Err(ReapiError::ExecutionFailed(status.to_string())),
                }
            }
        })
        .await
    }

    async fn poll(&self, name: &str) -> Result<Operation, ResilienceError<ReapiError>> {
        let short_name = name.strip_prefix("operations/").unwrap_or(name);
        let url = format!("{}/v2/operations/{}", self.base_url, short_name);
        execute_with_retry(&self.retry_policy, &self.breaker, "reapi-poll", || async {
            let response = self.http.get(&url).send().await.map_err(|_| ReapiError::Timeout)?;
            match response.status() {
                StatusCode::OK => {
                    let bytes = response.bytes().await.map_err(|_| ReapiError::Timeout)?;
                    Operation::decode(&bytes)
                }
                StatusCode::NOT_FOUND => Err(ReapiError::UnknownOperation(short_name.to_string())),
                status => Err(ReapiError::ExecutionFailed(status.to_string())),
            }
        })
        .await
    }

    /// Submit an action and poll until it completes or `timeout` elapses.
    pub async fn execute(&self, request: &ActionRequest, timeout: Duration) -> Result<ActionResult, ReapiError> {
        let operation = self.submit(request).await.map_err(unwrap_resilience)?;
        let deadline = Instant::now() + timeout;
        let mut current = operation;
        while !current.done {
            if Instant::now() >= deadline {
                return Err(ReapiError::Timeout);
            }
            tokio::time::sleep(self.poll_interval).await;
            current = self.poll(&current.name).await.map_err(unwrap_resilience)?;
        }
        match (current.result, current.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(ReapiError::ExecutionFailed(error)),
            (None, None) => Err(ReapiError::ExecutionFailed("operation marked done with neither a result nor an error".into())),
        }
    }

    pub async fn get_action_result(&self, digest: ReapiDigest) -> Result<ActionResult, ReapiError> {
        let url = format!("{}/v2/actionResults/{}", self.base_url, digest);
        execute_with_retry(&self.retry_policy, &self.breaker, "reapi-get-result", || async {
            let response = self.http.get(&url).send().await.map_err(|_| ReapiError::Timeout)?;
            match response.status() {
                StatusCode::OK => {
                    let bytes = response.bytes().await.map_err(|_| ReapiError::Timeout)?;
                    ActionResult::decode(&bytes)
                }
                StatusCode::NOT_FOUND => Err(ReapiError::NoCachedResult),
                status => Err(ReapiError::ExecutionFailed(status.to_string())),
            }
        })
        .await
        .map_err(unwrap_resilience)
    }

    pub async fn update_action_result(&self, digest: ReapiDigest, result: &ActionResult) -> Result<(), ReapiError> {
        let url = format!("{}/v2/actionResults/{}", self.base_url, digest);
        let body = result.encode();
        execute_with_retry(&self.retry_policy, &self.breaker, "reapi-put-result", || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let response = self.http.put(&url).body(body).send().await.map_err(|_| ReapiError::Timeout)?;
                match response.status() {
                    StatusCode::OK | StatusCode::CREATED => Ok(()),
                    status => Err(ReapiError::ExecutionFailed(status.to_string())),
                }
            }
        })
        .await
        .map_err(unwrap_resilience)
    }
}

fn unwrap_resilience(e: ResilienceError<ReapiError>) -> ReapiError {
    match e {
        ResilienceError::CircuitOpen => ReapiError::Timeout,
        ResilienceError::Inner(inner) => inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_the_operations_prefix_before_building_the_poll_url() {
        let client = ReapiClient::new("http://localhost:8980");
        assert_eq!(client.base_url, "http://localhost:8980");
    }
}
