//! The collaborator traits a hosting application implements to connect the
//! router to a real LLM backend, a session-persistence layer, and a
//! notification side-channel (spec §6).
//!
//! None of these traits are implemented in this crate — `chat-router-example`
//! supplies trivial concrete implementations for local use.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::session::{Session, StoredMessage};

/// One turn handed to the LLM collaborator, independent of the wire
/// [`crate::Envelope`] shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user`, `ai`, or `admin`, matching [`crate::session::StoredSender`].
    pub role: String,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// Builds a `ChatMessage` from a role string and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The result of a unary [`LlmClient::send`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmReply {
    /// The full reply text.
    pub content: String,
    /// Tokens consumed, as reported by the backend.
    pub tokens_used: u64,
    /// Wall-clock time the backend took to produce this reply.
    pub duration: Duration,
}

/// One chunk of a streamed [`LlmClient::stream`] reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmChunk {
    /// This chunk's text. May be empty.
    pub content: String,
    /// `true` exactly on the final chunk of the stream.
    pub done: bool,
}

/// A failure surfaced by the LLM collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The model id is not recognized or not available.
    #[error("unknown or unavailable model: {0}")]
    UnknownModel(String),
    /// The backend is unreachable or refused the request.
    #[error("LLM backend unavailable: {0}")]
    Unavailable(String),
    /// The backend did not respond within the caller's deadline.
    #[error("LLM backend timed out")]
    Timeout,
}

/// The LLM backend, as seen by the router (spec §6).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A single unary request/response round-trip.
    async fn send(&self, model_id: &str, messages: &[ChatMessage]) -> Result<LlmReply, LlmError>;

    /// Opens a streamed reply. `done` is `true` exactly on the final chunk.
    fn stream<'a>(
        &'a self,
        model_id: &'a str,
        messages: &'a [ChatMessage],
    ) -> BoxStream<'a, Result<LlmChunk, LlmError>>;

    /// Confirms `model_id` is recognized and currently available.
    async fn validate_model(&self, model_id: &str) -> Result<(), LlmError>;
}

/// The session-persistence backend, as seen by the router (spec §6).
///
/// The in-memory [`Session`] held by the session manager is always the
/// source of truth: failures here are non-fatal except on `create_session`,
/// where a failure must roll back the in-memory session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a newly created session.
    async fn create_session(&self, session: &Session) -> eyre::Result<()>;

    /// Appends one message to the durable log of `session_id`.
    async fn add_message(&self, session_id: &str, message: &StoredMessage) -> eyre::Result<()>;
}

/// The notification side-channel, as seen by the router (spec §6).
///
/// Calls are fire-and-forget: failures are logged by the caller, never
/// propagated to the peer.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Alerts human operators that `user_id` requested help in `session_id`.
    async fn send_help_request_alert(&self, user_id: &str, session_id: &str) -> eyre::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn send(&self, _model_id: &str, messages: &[ChatMessage]) -> Result<LlmReply, LlmError> {
            let content = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LlmReply {
                content,
                tokens_used: 1,
                duration: Duration::from_millis(1),
            })
        }

        fn stream<'a>(
            &'a self,
            _model_id: &'a str,
            messages: &'a [ChatMessage],
        ) -> BoxStream<'a, Result<LlmChunk, LlmError>> {
            let content = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Box::pin(stream::iter([Ok(LlmChunk { content, done: true })]))
        }

        async fn validate_model(&self, model_id: &str) -> Result<(), LlmError> {
            if model_id.is_empty() {
                Err(LlmError::UnknownModel(model_id.to_owned()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn echo_client_round_trips_content_through_send() {
        let client = EchoLlm;
        let reply = client
            .send("m1", &[ChatMessage::new("user", "hi")])
            .await
            .unwrap();
        assert_eq!(reply.content, "hi");
    }

    #[tokio::test]
    async fn echo_client_rejects_empty_model_id() {
        let client = EchoLlm;
        assert!(client.validate_model("").await.is_err());
    }
}
