//! The error taxonomy (spec §4.3): four categories, each fixing the
//! recoverability and connection-closing behavior of every error code.

use serde::{Deserialize, Serialize};

/// The four error categories. Each fixes whether the error is
/// `recoverable` and whether the owning connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Non-recoverable; the connection is closed after a grace period.
    Auth,
    /// Recoverable; the connection survives.
    Validation,
    /// Recoverable; the connection survives.
    Service,
    /// Recoverable; carries `retry_after_ms`.
    RateLimit,
}

impl ErrorCategory {
    /// `true` iff an error of this category is reported to the peer as
    /// recoverable.
    pub fn recoverable(self) -> bool {
        !matches!(self, ErrorCategory::Auth)
    }

    /// `true` iff an error of this category schedules connection closure.
    pub fn closes_connection(self) -> bool {
        matches!(self, ErrorCategory::Auth)
    }
}

/// One error code per wire-visible failure mode (spec §4.3's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// `auth`
    InvalidToken,
    /// `auth`
    ExpiredToken,
    /// `auth`
    InsufficientPermissions,
    /// `auth`
    Unauthorized,
    /// `validation`
    InvalidFormat,
    /// `validation`
    MissingField,
    /// `validation`
    InvalidFileType,
    /// `validation`
    InvalidFileSize,
    /// `validation`
    NotFound,
    /// `service`
    LlmUnavailable,
    /// `service`
    LlmTimeout,
    /// `service`
    DatabaseError,
    /// `service`
    StorageError,
    /// `service`
    ServiceError,
    /// `rate_limit`
    TooManyRequests,
    /// `rate_limit`
    ConnectionLimitExceeded,
}

impl ErrorCode {
    /// The category that fixes this code's recoverability and connection
    /// behavior.
    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            InvalidToken | ExpiredToken | InsufficientPermissions | Unauthorized => {
                ErrorCategory::Auth
            }
            InvalidFormat | MissingField | InvalidFileType | InvalidFileSize | NotFound => {
                ErrorCategory::Validation
            }
            LlmUnavailable | LlmTimeout | DatabaseError | StorageError | ServiceError => {
                ErrorCategory::Service
            }
            TooManyRequests | ConnectionLimitExceeded => ErrorCategory::RateLimit,
        }
    }

    /// The wire representation: `SCREAMING_SNAKE_CASE`.
    pub fn as_wire_str(self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidToken => "INVALID_TOKEN",
            ExpiredToken => "EXPIRED_TOKEN",
            InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Unauthorized => "UNAUTHORIZED",
            InvalidFormat => "INVALID_FORMAT",
            MissingField => "MISSING_FIELD",
            InvalidFileType => "INVALID_FILE_TYPE",
            InvalidFileSize => "INVALID_FILE_SIZE",
            NotFound => "NOT_FOUND",
            LlmUnavailable => "LLM_UNAVAILABLE",
            LlmTimeout => "LLM_TIMEOUT",
            DatabaseError => "DATABASE_ERROR",
            StorageError => "STORAGE_ERROR",
            ServiceError => "SERVICE_ERROR",
            TooManyRequests => "TOO_MANY_REQUESTS",
            ConnectionLimitExceeded => "CONNECTION_LIMIT_EXCEEDED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// Errors raised while decoding or validating a wire [`crate::Envelope`].
///
/// One variant per failure mode, each carrying just enough context for a
/// `debug!` log line, never exposing internals on the wire.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The bytes could not be parsed as an envelope at all.
    #[error("invalid envelope format: {0}")]
    InvalidFormat(#[from] serde_json::Error),
    /// A single-field validation failure (spec §4.2's `Validation(field, reason)`).
    #[error("validation failed for field `{field}`: {reason}")]
    Validation {
        /// The offending field name.
        field: &'static str,
        /// A short, non-sensitive human-readable reason.
        reason: String,
    },
}

impl EnvelopeError {
    /// Convenience constructor for [`EnvelopeError::Validation`].
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// The [`ErrorCode`] this decode/validation failure maps to on the wire.
    pub fn code(&self) -> ErrorCode {
        match self {
            EnvelopeError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            EnvelopeError::Validation { .. } => ErrorCode::MissingField,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_category_is_not_recoverable_and_closes() {
        assert!(!ErrorCategory::Auth.recoverable());
        assert!(ErrorCategory::Auth.closes_connection());
    }

    #[test]
    fn validation_category_is_recoverable_and_stays_open() {
        assert!(ErrorCategory::Validation.recoverable());
        assert!(!ErrorCategory::Validation.closes_connection());
    }

    #[test]
    fn error_code_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::TooManyRequests).unwrap();
        assert_eq!(json, "\"TOO_MANY_REQUESTS\"");
        assert_eq!(ErrorCode::TooManyRequests.as_wire_str(), "TOO_MANY_REQUESTS");
    }

    #[test]
    fn error_code_category_mapping_matches_table() {
        assert_eq!(ErrorCode::InvalidToken.category(), ErrorCategory::Auth);
        assert_eq!(ErrorCode::InvalidFormat.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::LlmTimeout.category(), ErrorCategory::Service);
        assert_eq!(
            ErrorCode::TooManyRequests.category(),
            ErrorCategory::RateLimit
        );
    }
}
