//! Defines the [`RouterError`] surfaced while dispatching an inbound
//! envelope, and how it is translated to the wire error taxonomy.

use chat_protocol::{ErrorCode, ErrorInfo};
use tracing::instrument;

use crate::services::session_manager::SessionManagerError;

/// All errors that may occur while dispatching one inbound envelope.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RouterError {
    /// Decoding or per-type validation of the inbound envelope failed.
    #[error(transparent)]
    Envelope(#[from] chat_protocol::EnvelopeError),
    /// The caller does not own the session it addressed.
    #[error("unauthorized")]
    Unauthorized,
    /// The addressed session does not exist.
    #[error("session not found")]
    SessionNotFound,
    /// The caller already has an active session; no new one was created.
    #[error("an active session already exists")]
    ActiveSessionExists,
    /// The rate limiter rejected a `user_message`.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds until the caller's window resets.
        retry_after_ms: u64,
    },
    /// The LLM backend could not be reached to open a stream.
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),
    /// The LLM stream or transcription call exceeded its deadline.
    #[error("llm timed out")]
    LlmTimeout,
    /// `model_select` named a model the LLM backend does not recognize.
    #[error("invalid model: {0}")]
    InvalidModel(String),
    /// An admin tried to take over a session already overlaid by another.
    #[error("session already overlaid by another admin")]
    AlreadyOverlaid,
    /// An admin tried to leave a session it is not currently overlaying.
    #[error("admin is not overlaying this session")]
    NotOverlaying,
}

impl From<SessionManagerError> for RouterError {
    fn from(value: SessionManagerError) -> Self {
        match value {
            SessionManagerError::NotFound => RouterError::SessionNotFound,
            SessionManagerError::Unauthorized => RouterError::Unauthorized,
            SessionManagerError::ActiveSessionExists => RouterError::ActiveSessionExists,
        }
    }
}

impl RouterError {
    /// Translates this error into the wire [`ErrorInfo`] delivered to the
    /// peer (spec §4.3). Internal cause chains are logged by the caller but
    /// never leak into `message`.
    #[instrument(level = "debug", skip_all)]
    pub(crate) fn into_error_info(self) -> ErrorInfo {
        tracing::debug!("{self:?}");
        let retry_after_ms = match &self {
            RouterError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => 0,
        };
        let (code, message) = match self {
            RouterError::Envelope(err) => (err.code(), "invalid message".to_owned()),
            RouterError::Unauthorized => (ErrorCode::Unauthorized, "unauthorized".to_owned()),
            RouterError::SessionNotFound => (ErrorCode::NotFound, "session not found".to_owned()),
            RouterError::ActiveSessionExists => (
                ErrorCode::ServiceError,
                "an active session already exists; reuse its session_id".to_owned(),
            ),
            RouterError::RateLimited { .. } => {
                (ErrorCode::TooManyRequests, "too many requests".to_owned())
            }
            RouterError::LlmUnavailable(_) => {
                (ErrorCode::LlmUnavailable, "assistant is unavailable".to_owned())
            }
            RouterError::LlmTimeout => (ErrorCode::LlmTimeout, "assistant timed out".to_owned()),
            RouterError::InvalidModel(_) => {
                (ErrorCode::ServiceError, "requested model is unavailable".to_owned())
            }
            RouterError::AlreadyOverlaid => {
                (ErrorCode::InvalidFormat, "session already has an admin".to_owned())
            }
            RouterError::NotOverlaying => {
                (ErrorCode::InvalidFormat, "not overlaying this session".to_owned())
            }
        };
        ErrorInfo {
            code,
            message,
            recoverable: code.category().recoverable(),
            retry_after_ms,
        }
    }
}
