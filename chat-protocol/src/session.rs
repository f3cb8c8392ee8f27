//! The in-memory conversation record (spec §3) that the session manager
//! owns and the session store collaborator mirrors to durable storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a [`StoredMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredSender {
    /// The end-user.
    User,
    /// The LLM.
    Ai,
    /// An overlaying admin.
    Admin,
}

/// One persisted turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The message body.
    pub content: String,
    /// When this message was recorded.
    pub timestamp: DateTime<Utc>,
    /// Who authored it.
    pub sender: StoredSender,
    /// The id of an attached file/voice blob, if any.
    pub file_id: Option<String>,
    /// The signed URL of an attached file/voice blob, if any.
    pub file_url: Option<String>,
    /// Free-form string metadata.
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl StoredMessage {
    /// Builds a plain text message with no attachment and no metadata.
    pub fn text(sender: StoredSender, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: Utc::now(),
            sender,
            file_id: None,
            file_url: None,
            metadata: std::collections::BTreeMap::new(),
        }
    }
}

/// The durable unit of conversation (spec §3).
///
/// A `Session` is owned by exactly one [`crate::Principal`] for its whole
/// lifetime; ownership never transfers. Everything here lives in the
/// session manager's in-memory map — the [`crate::SessionStore`]
/// collaborator mirrors it to durable storage but is never the source of
/// truth while the process is up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique id, generated at creation.
    pub id: String,
    /// The owning principal's user id. Set at creation, never changes.
    pub user_id: String,
    /// `true` until `end_time` is set.
    pub is_active: bool,
    /// When the session was created.
    pub start_time: DateTime<Utc>,
    /// Last time any mutating operation touched this session.
    pub last_activity: DateTime<Utc>,
    /// Set exactly once, by `end_session`.
    pub end_time: Option<DateTime<Utc>>,
    /// The selected LLM model, if any.
    pub model_id: Option<String>,
    /// Append-only while `is_active`.
    pub messages: Vec<StoredMessage>,
    /// Cumulative token usage reported by the LLM client.
    pub total_tokens: u64,
    /// Observed LLM response latencies, one entry per completed reply.
    pub response_times: Vec<std::time::Duration>,
    /// `true` iff an admin has ever joined. Sticky: never cleared.
    pub admin_assisted: bool,
    /// Non-empty exactly while an admin is currently overlaid.
    pub assisting_admin_id: String,
    /// Non-empty exactly while an admin is currently overlaid.
    pub assisting_admin_name: String,
    /// Sticky flag, set once the user ever requested human help.
    pub help_requested: bool,
}

impl Session {
    /// Creates a fresh, active session owned by `user_id` with a newly
    /// generated id.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            is_active: true,
            start_time: now,
            last_activity: now,
            end_time: None,
            model_id: None,
            messages: Vec::new(),
            total_tokens: 0,
            response_times: Vec::new(),
            admin_assisted: false,
            assisting_admin_id: String::new(),
            assisting_admin_name: String::new(),
            help_requested: false,
        }
    }

    /// Appends `message` and bumps `last_activity`.
    pub fn add_message(&mut self, message: StoredMessage) {
        self.messages.push(message);
        self.touch();
    }

    /// Sets `model_id` and bumps `last_activity`.
    pub fn set_model_id(&mut self, model_id: impl Into<String>) {
        self.model_id = Some(model_id.into());
        self.touch();
    }

    /// Adds to `total_tokens` and bumps `last_activity`.
    pub fn update_token_usage(&mut self, tokens: u64) {
        self.total_tokens += tokens;
        self.touch();
    }

    /// Records one LLM reply latency and bumps `last_activity`.
    pub fn record_response_time(&mut self, elapsed: std::time::Duration) {
        self.response_times.push(elapsed);
        self.touch();
    }

    /// Sets the sticky `help_requested` flag and bumps `last_activity`.
    pub fn mark_help_requested(&mut self) {
        self.help_requested = true;
        self.touch();
    }

    /// Marks this session as admin-assisted by `admin_id`/`admin_name`.
    ///
    /// Idempotent when called repeatedly with the same `admin_id`.
    pub fn mark_admin_assisted(&mut self, admin_id: impl Into<String>, admin_name: impl Into<String>) {
        self.admin_assisted = true;
        self.assisting_admin_id = admin_id.into();
        self.assisting_admin_name = admin_name.into();
        self.touch();
    }

    /// Clears the currently-assisting admin fields. `admin_assisted` stays
    /// `true` as a historical flag.
    pub fn clear_admin_assistance(&mut self) {
        self.assisting_admin_id.clear();
        self.assisting_admin_name.clear();
        self.touch();
    }

    /// Ends the session: `is_active = false`, `end_time = now`.
    pub fn end_session(&mut self) {
        self.is_active = false;
        self.end_time = Some(Utc::now());
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_active_and_owned() {
        let s = Session::new("u1");
        assert!(s.is_active);
        assert_eq!(s.user_id, "u1");
        assert!(s.end_time.is_none());
        assert!(!s.id.is_empty());
    }

    #[test]
    fn end_session_sets_inactive_and_end_time() {
        let mut s = Session::new("u1");
        s.end_session();
        assert!(!s.is_active);
        assert!(s.end_time.is_some());
    }

    #[test]
    fn mark_admin_assisted_is_sticky_after_clear() {
        let mut s = Session::new("u1");
        s.mark_admin_assisted("a1", "Alice");
        assert!(s.admin_assisted);
        assert_eq!(s.assisting_admin_id, "a1");
        s.clear_admin_assistance();
        assert!(s.admin_assisted, "admin_assisted must stay sticky");
        assert!(s.assisting_admin_id.is_empty());
    }

    #[test]
    fn mark_admin_assisted_is_idempotent_for_same_admin() {
        let mut s = Session::new("u1");
        s.mark_admin_assisted("a1", "Alice");
        s.mark_admin_assisted("a1", "Alice");
        assert_eq!(s.assisting_admin_id, "a1");
    }

    #[test]
    fn add_message_appends_and_touches_last_activity() {
        let mut s = Session::new("u1");
        let before = s.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(2));
        s.add_message(StoredMessage::text(StoredSender::User, "hi"));
        assert_eq!(s.messages.len(), 1);
        assert!(s.last_activity >= before);
    }
}
