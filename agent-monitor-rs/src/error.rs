// agent-monitor-rs/src/error.rs
// Error taxonomy for the monitoring layer.
//
// The response-serving path is isolated from monitoring failures: only
// `Inference` errors ever leave `generate_response`. Everything else is
// caught at the monitoring boundary and surfaced through tracing/metrics.

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Top-level error type for the monitoring layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MonitorError {
    /// Network failure or 5xx from the backend. Transient.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid or rejected API credential (401/403).
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed configuration or a 400 response from the backend.
    #[error("validation error: {0}")]
    Validation(String),

    /// 429 from the backend. Retried with aggressive backoff, then dropped.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Heal attempted without a valid server-side flag.
    #[error("invalid healing state: {0}")]
    InvalidHealingState(String),

    /// Backend payload could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure of the injected inference capability. The only kind that
    /// propagates to the wrapped caller.
    #[error("inference error: {0}")]
    Inference(String),
}

impl MonitorError {
    /// Whether a retry might succeed. Rate limits are transient but are
    /// backed off harder by the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, MonitorError::Transport(_) | MonitorError::RateLimit(_))
    }

    /// Whether this error came from backend throttling.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, MonitorError::RateLimit(_))
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Serialization(err.to_string())
    }
}
