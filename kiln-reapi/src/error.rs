#[derive(Debug, thiserror::Error)]
pub enum ReapiError {
    #[error("wire format truncated")]
    Truncated,
    #[error("wire format ran past its declared end")]
    OutOfBounds,
    #[error("invalid utf8 in wire payload")]
    InvalidUtf8,
    #[error("unsupported wire schema version: {0}")]
    UnsupportedVersion(u32),
    #[error("action digest malformed: {0}")]
    MalformedDigest(#[from] kiln_hash::HashError),
    #[error("no such operation: {0}")]
    UnknownOperation(String),
    #[error("no cached result for this action digest")]
    NoCachedResult,
    #[error("operation timed out waiting for execution to complete")]
    Timeout,
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl kiln_resilience::RetryableError for ReapiError {
    fn is_retryable(&self) -> bool {
        matches!(self, ReapiError::Timeout)
    }
}
