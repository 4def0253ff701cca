use thiserror::Error;

/// Error taxonomy for `InferenceClient` implementations, matching the
/// transient/fatal-per-turn/fatal-per-request classification the scheduler
/// relies on to decide whether to retry, abort the turn, or tear down.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider error: {payload}")]
    ProviderError { payload: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("malformed response: {0}")]
    Malformed(String),
}
