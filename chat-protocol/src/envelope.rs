//! The wire message envelope (spec §3/§4.2): a typed, validated, sanitized
//! record with a stable JSON wire representation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, EnvelopeError};

/// Bound on `content` length.
pub const MAX_CONTENT_LENGTH_DEFAULT: usize = 10_000;
/// Bound on `session_id` length.
pub const MAX_SESSION_ID_LENGTH: usize = 128;
/// Bound on `file_id` length.
pub const MAX_FILE_ID_LENGTH: usize = 255;
/// Bound on `file_url` length.
pub const MAX_FILE_URL_LENGTH: usize = 2048;
/// Bound on `model_id` length.
pub const MAX_MODEL_ID_LENGTH: usize = 100;
/// Bound on each metadata value's length.
pub const MAX_METADATA_VALUE_LENGTH: usize = 1000;
/// How far into the future a `timestamp` may be before it's rejected.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// The envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A chat message authored by the end-user.
    UserMessage,
    /// A chat message authored by the LLM.
    AiResponse,
    /// A file attachment.
    FileUpload,
    /// A voice-message attachment.
    VoiceMessage,
    /// An error report.
    Error,
    /// A connection lifecycle notice.
    ConnectionStatus,
    /// A typing indicator.
    TypingIndicator,
    /// A user request for human assistance.
    HelpRequest,
    /// An admin joining a session.
    AdminJoin,
    /// An admin leaving a session.
    AdminLeave,
    /// A model selection.
    ModelSelect,
    /// A loading indicator (sent while the LLM reply streams in).
    Loading,
    /// An out-of-band notification.
    Notification,
}

/// The envelope's `sender` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    /// The end-user.
    User,
    /// The LLM.
    Ai,
    /// An overlaying admin.
    Admin,
    /// The system itself (e.g. `loading`, `connection_status`).
    System,
}

/// The `error` sub-object of an envelope (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// The machine-readable error code.
    pub code: ErrorCode,
    /// A user-facing message. Never embeds internals (spec §7).
    pub message: String,
    /// `true` iff the connection survives this error.
    pub recoverable: bool,
    /// Milliseconds to wait before retrying. Wire name is `retry_after`;
    /// omitted on the wire when zero.
    #[serde(rename = "retry_after", default, skip_serializing_if = "is_zero")]
    pub retry_after_ms: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// A single wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The message type, dispatched on by the router.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// The session this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Free-form text content (chat messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// The id of an attached file/voice blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// The signed URL of an attached file/voice blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// The selected LLM model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// When this envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Who produced this envelope.
    pub sender: SenderKind,
    /// Free-form string metadata (unique keys, order irrelevant).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Present iff `message_type == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Envelope {
    /// Parses an envelope from its JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidFormat`] if `bytes` is not a valid
    /// JSON encoding of an [`Envelope`].
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes this envelope to its JSON wire representation.
    ///
    /// Deterministic: optional fields are omitted when empty,
    /// `retry_after_ms` is omitted when zero, `timestamp` is RFC3339.
    pub fn encode(&self) -> Vec<u8> {
        // `Envelope` only ever holds values that already round-trip through
        // serde_json, so this cannot fail.
        serde_json::to_vec(self).expect("Envelope always serializes")
    }

    /// Strips NUL bytes and trims outer whitespace on every string field,
    /// recursively over `metadata` and `error.code`/`error.message`.
    ///
    /// Does **not** HTML-escape: rendering is the caller's responsibility,
    /// and escaping on ingress would corrupt LLM input (spec §9).
    pub fn sanitize(&mut self) {
        if let Some(session_id) = &mut self.session_id {
            *session_id = sanitize_str(session_id);
        }
        if let Some(content) = &mut self.content {
            *content = sanitize_str(content);
        }
        if let Some(file_id) = &mut self.file_id {
            *file_id = sanitize_str(file_id);
        }
        if let Some(file_url) = &mut self.file_url {
            *file_url = sanitize_str(file_url);
        }
        if let Some(model_id) = &mut self.model_id {
            *model_id = sanitize_str(model_id);
        }
        self.metadata = std::mem::take(&mut self.metadata)
            .into_iter()
            .map(|(k, v)| (sanitize_str(&k), sanitize_str(&v)))
            .collect();
        if let Some(error) = &mut self.error {
            error.message = sanitize_str(&error.message);
        }
    }

    /// Validates this envelope against the per-type required-field table
    /// and the universal invariants (spec §3).
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Validation`] naming the first offending
    /// field.
    pub fn validate(&self, max_content_length: usize) -> Result<(), EnvelopeError> {
        self.validate_universal(max_content_length)?;
        self.validate_type_specific()
    }

    fn validate_universal(&self, max_content_length: usize) -> Result<(), EnvelopeError> {
        if self.timestamp == DateTime::<Utc>::default() || self.timestamp.timestamp() == 0 {
            return Err(EnvelopeError::validation("timestamp", "must not be zero"));
        }
        let skew = self.timestamp.signed_duration_since(Utc::now());
        if skew.num_seconds() > MAX_CLOCK_SKEW_SECS {
            return Err(EnvelopeError::validation(
                "timestamp",
                "must not be more than 60s in the future",
            ));
        }
        if let Some(content) = &self.content
            && content.chars().count() > max_content_length
        {
            return Err(EnvelopeError::validation("content", "too long"));
        }
        check_len("session_id", self.session_id.as_deref(), MAX_SESSION_ID_LENGTH)?;
        check_len("file_id", self.file_id.as_deref(), MAX_FILE_ID_LENGTH)?;
        check_len("file_url", self.file_url.as_deref(), MAX_FILE_URL_LENGTH)?;
        check_len("model_id", self.model_id.as_deref(), MAX_MODEL_ID_LENGTH)?;
        for value in self.metadata.values() {
            if value.chars().count() > MAX_METADATA_VALUE_LENGTH {
                return Err(EnvelopeError::validation("metadata", "value too long"));
            }
        }
        Ok(())
    }

    fn validate_type_specific(&self) -> Result<(), EnvelopeError> {
        use MessageType::*;
        match self.message_type {
            UserMessage | AiResponse => require_present("content", self.content.as_deref())?,
            FileUpload | VoiceMessage => {
                require_present("file_id", self.file_id.as_deref())?;
                require_present("file_url", self.file_url.as_deref())?;
            }
            Error => {
                let error = self
                    .error
                    .as_ref()
                    .ok_or_else(|| EnvelopeError::validation("error", "required for type error"))?;
                if error.message.is_empty() {
                    return Err(EnvelopeError::validation("error.message", "must not be empty"));
                }
            }
            ModelSelect => require_present("model_id", self.model_id.as_deref())?,
            AdminJoin | AdminLeave => {
                if self.sender != SenderKind::Admin {
                    return Err(EnvelopeError::validation("sender", "must be admin"));
                }
            }
            HelpRequest => {
                if self.sender != SenderKind::User {
                    return Err(EnvelopeError::validation("sender", "must be user"));
                }
            }
            ConnectionStatus | TypingIndicator | Loading | Notification => {}
        }
        Ok(())
    }
}

fn require_present(field: &'static str, value: Option<&str>) -> Result<(), EnvelopeError> {
    match value {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(EnvelopeError::validation(field, "required")),
    }
}

fn check_len(field: &'static str, value: Option<&str>, max: usize) -> Result<(), EnvelopeError> {
    if let Some(v) = value
        && v.chars().count() > max
    {
        return Err(EnvelopeError::validation(field, "too long"));
    }
    Ok(())
}

fn sanitize_str(s: &str) -> String {
    s.chars().filter(|c| *c != '\0').collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(message_type: MessageType, sender: SenderKind) -> Envelope {
        Envelope {
            message_type,
            session_id: None,
            content: None,
            file_id: None,
            file_url: None,
            model_id: None,
            timestamp: Utc::now(),
            sender,
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    #[test]
    fn sanitize_strips_nul_and_trims_whitespace() {
        let mut env = base(MessageType::UserMessage, SenderKind::User);
        env.content = Some("  hi\0 there \0".to_owned());
        env.metadata.insert(" k\0ey ".to_owned(), " v\0al ".to_owned());
        env.sanitize();
        assert_eq!(env.content.as_deref(), Some("hi there"));
        let (k, v) = env.metadata.iter().next().unwrap();
        assert_eq!(k, "key");
        assert_eq!(v, "val");
    }

    #[test]
    fn round_trip_decode_of_encode_is_identity() {
        let mut env = base(MessageType::UserMessage, SenderKind::User);
        env.content = Some("hi".to_owned());
        env.session_id = Some("s1".to_owned());
        let bytes = env.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn user_message_requires_content() {
        let env = base(MessageType::UserMessage, SenderKind::User);
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
    }

    #[test]
    fn file_upload_requires_file_fields() {
        let mut env = base(MessageType::FileUpload, SenderKind::User);
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
        env.file_id = Some("f1".to_owned());
        env.file_url = Some("https://example.invalid/f1".to_owned());
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_ok());
    }

    #[test]
    fn admin_join_requires_admin_sender() {
        let mut env = base(MessageType::AdminJoin, SenderKind::User);
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
        env.sender = SenderKind::Admin;
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_ok());
    }

    #[test]
    fn help_request_requires_user_sender() {
        let mut env = base(MessageType::HelpRequest, SenderKind::Admin);
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
        env.sender = SenderKind::User;
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_ok());
    }

    #[test]
    fn rejects_timestamp_too_far_in_future() {
        let mut env = base(MessageType::Loading, SenderKind::System);
        env.timestamp = Utc::now() + chrono::Duration::seconds(120);
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
    }

    #[test]
    fn rejects_content_over_length_bound() {
        let mut env = base(MessageType::UserMessage, SenderKind::User);
        env.content = Some("x".repeat(MAX_CONTENT_LENGTH_DEFAULT + 1));
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
    }

    #[test]
    fn error_type_requires_code_and_message() {
        let mut env = base(MessageType::Error, SenderKind::Ai);
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_err());
        env.error = Some(ErrorInfo {
            code: ErrorCode::ServiceError,
            message: "oops".to_owned(),
            recoverable: true,
            retry_after_ms: 0,
        });
        assert!(env.validate(MAX_CONTENT_LENGTH_DEFAULT).is_ok());
    }

    #[test]
    fn retry_after_ms_omitted_when_zero() {
        let mut env = base(MessageType::Error, SenderKind::Ai);
        env.error = Some(ErrorInfo {
            code: ErrorCode::TooManyRequests,
            message: "slow down".to_owned(),
            recoverable: true,
            retry_after_ms: 0,
        });
        let json = String::from_utf8(env.encode()).unwrap();
        assert!(!json.contains("retry_after"));
    }
}
