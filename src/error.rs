//! Error handling for the propagation engine
//!
//! Every external call returns an explicit result whose error variant encodes
//! the transient vs. permanent distinction, so retry policy is decided by the
//! variant rather than inferred at the call site.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the propagation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed contract, missing snapshot, empty service map. Aborts the
    /// run before any dispatch.
    #[error("input error: {0}")]
    Input(String),

    /// Network failures, rate limits, 5xx responses. Retried with backoff.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// 4xx responses other than rate limit. Fails the owning job.
    #[error("permanent external error: {0}")]
    PermanentExternal(String),

    /// A fail-closed safety check fired. Never retried.
    #[error("guardrail trip [{rule}]: {detail}")]
    GuardrailTrip { rule: String, detail: String },

    /// Attempted illegal job state transition. Bug class; aborts the run.
    #[error("illegal job state transition: {from} -> {to}")]
    StateMachine { from: String, to: String },

    /// Storage layer failure (journal append, audit write, load).
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        EngineError::Input(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        EngineError::TransientExternal(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        EngineError::PermanentExternal(message.into())
    }

    pub fn guardrail(rule: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::GuardrailTrip {
            rule: rule.into(),
            detail: detail.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        EngineError::Persistence(message.into())
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientExternal(_))
    }

    /// Classify an HTTP status code the way the agent and git providers do:
    /// 429 and 5xx are transient, everything else in 4xx is permanent.
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            429 | 502 | 503 | 504 => {
                EngineError::TransientExternal(format!("HTTP {status} from {context}"))
            }
            401 | 403 => EngineError::PermanentExternal(format!(
                "authentication failed (HTTP {status}) for {context}; check the configured API credentials"
            )),
            s if s >= 500 => EngineError::TransientExternal(format!("HTTP {s} from {context}")),
            s => EngineError::PermanentExternal(format!("HTTP {s} from {context}")),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(format!("io error: {err}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(format!("serialization error: {err}"))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::TransientExternal(format!("request timed out: {err}"))
        } else if err.is_connect() {
            EngineError::TransientExternal(format!("connection error: {err}"))
        } else if err.is_decode() {
            EngineError::PermanentExternal(format!("response decode error: {err}"))
        } else if let Some(status) = err.status() {
            EngineError::from_status(status.as_u16(), "http client")
        } else {
            EngineError::TransientExternal(format!("http client error: {err}"))
        }
    }
}
