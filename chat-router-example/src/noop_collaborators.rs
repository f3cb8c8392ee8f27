use async_trait::async_trait;
use chat_protocol::{NotificationService, Session, SessionStore, StoredMessage};

/// A [`SessionStore`] that only logs; persistence is out of scope for this
/// example binary.
pub(crate) struct LoggingSessionStore;

#[async_trait]
impl SessionStore for LoggingSessionStore {
    async fn create_session(&self, session: &Session) -> eyre::Result<()> {
        tracing::debug!(session_id = %session.id, user_id = %session.user_id, "session created");
        Ok(())
    }

    async fn add_message(&self, session_id: &str, message: &StoredMessage) -> eyre::Result<()> {
        tracing::debug!(session_id, sender = ?message.sender, "message stored");
        Ok(())
    }
}

/// A [`NotificationService`] that only logs; paging a human is out of scope
/// for this example binary.
pub(crate) struct LoggingNotifications;

#[async_trait]
impl NotificationService for LoggingNotifications {
    async fn send_help_request_alert(&self, user_id: &str, session_id: &str) -> eyre::Result<()> {
        tracing::info!(user_id, session_id, "help requested, alerting on-call");
        Ok(())
    }
}
