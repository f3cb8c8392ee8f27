//! Ownership, CRUD and expiry of in-memory sessions (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{Session, StoredMessage};
use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::metrics::{METRICS_ID_SESSIONS_EXPIRED, METRICS_ID_SESSIONS_OPEN};

/// A session-manager failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionManagerError {
    /// No session exists with the given id.
    #[error("session not found")]
    NotFound,
    /// The session exists but is owned by a different principal.
    #[error("session owned by another principal")]
    Unauthorized,
    /// The principal already has an active session; no new one is created.
    #[error("principal already has an active session")]
    ActiveSessionExists,
}

/// Owns the in-memory map of `session_id -> Session`.
///
/// A principal has at most one active session at a time; [`SessionManager::get_or_create`]
/// enforces this itself by scanning for an existing active session owned by
/// the principal before it creates a new one. All mutating operations run
/// under an exclusive lock; reads of an existing session run under a shared
/// lock.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Creates an empty session manager.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns a clone of the session, or [`SessionManagerError::NotFound`].
    pub fn get(&self, session_id: &str) -> Result<Session, SessionManagerError> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or(SessionManagerError::NotFound)
    }

    /// Resolves a session for `user_id`/`session_id`:
    ///
    /// - if `session_id` is `Some` and the session exists and is owned by
    ///   `user_id`, returns it;
    /// - if `session_id` is `Some` and the session exists but is owned by a
    ///   different principal, fails with [`SessionManagerError::Unauthorized`];
    /// - otherwise (no id, or an id naming no session), creates a fresh
    ///   session owned by `user_id` unless one is already active, in which
    ///   case fails with [`SessionManagerError::ActiveSessionExists`].
    pub fn get_or_create(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session, SessionManagerError> {
        if let Some(session_id) = session_id
            && let Some(existing) = self.sessions.read().get(session_id).cloned()
        {
            return if existing.user_id == user_id {
                Ok(existing)
            } else {
                Err(SessionManagerError::Unauthorized)
            };
        }
        let mut sessions = self.sessions.write();
        if let Some(session_id) = session_id
            && let Some(existing) = sessions.get(session_id).cloned()
        {
            return if existing.user_id == user_id {
                Ok(existing)
            } else {
                Err(SessionManagerError::Unauthorized)
            };
        }
        if sessions.values().any(|s| s.is_active && s.user_id == user_id) {
            return Err(SessionManagerError::ActiveSessionExists);
        }
        let session = Session::new(user_id);
        sessions.insert(session.id.clone(), session.clone());
        metrics::counter!(crate::metrics::METRICS_ID_SESSIONS_CREATED).increment(1);
        metrics::gauge!(METRICS_ID_SESSIONS_OPEN).set(sessions.len() as f64);
        Ok(session)
    }

    /// Rolls back a just-created session: used when a [`chat_protocol::SessionStore`]
    /// `create_session` call fails after the in-memory insert.
    pub fn rollback_create(&self, session_id: &str) {
        let mut sessions = self.sessions.write();
        sessions.remove(session_id);
        metrics::gauge!(METRICS_ID_SESSIONS_OPEN).set(sessions.len() as f64);
    }

    /// Applies `mutate` to the session named `session_id` under the
    /// exclusive lock, returning its updated value.
    fn mutate<R>(
        &self,
        session_id: &str,
        mutate: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionManagerError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or(SessionManagerError::NotFound)?;
        Ok(mutate(session))
    }

    /// Appends `message` to `session_id`'s log and bumps `last_activity`.
    pub fn add_message(
        &self,
        session_id: &str,
        message: StoredMessage,
    ) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.add_message(message))
    }

    /// Sets the selected model on `session_id`.
    pub fn set_model_id(
        &self,
        session_id: &str,
        model_id: impl Into<String>,
    ) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.set_model_id(model_id))
    }

    /// Adds to `session_id`'s cumulative token usage.
    pub fn update_token_usage(
        &self,
        session_id: &str,
        tokens: u64,
    ) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.update_token_usage(tokens))
    }

    /// Records one LLM reply latency on `session_id`.
    pub fn record_response_time(
        &self,
        session_id: &str,
        elapsed: Duration,
    ) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.record_response_time(elapsed))
    }

    /// Sets the sticky `help_requested` flag on `session_id`.
    pub fn mark_help_requested(&self, session_id: &str) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.mark_help_requested())
    }

    /// Marks `session_id` as admin-assisted by `admin_id`/`admin_name`.
    /// Idempotent when called repeatedly with the same `admin_id`.
    pub fn mark_admin_assisted(
        &self,
        session_id: &str,
        admin_id: impl Into<String>,
        admin_name: impl Into<String>,
    ) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.mark_admin_assisted(admin_id, admin_name))
    }

    /// Clears `session_id`'s currently-assisting admin fields.
    /// `admin_assisted` stays `true` as a historical flag.
    pub fn clear_admin_assistance(&self, session_id: &str) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.clear_admin_assistance())
    }

    /// Ends `session_id`: `is_active = false`, `end_time = now`.
    pub fn end_session(&self, session_id: &str) -> Result<(), SessionManagerError> {
        self.mutate(session_id, |s| s.end_session())
    }

    /// Drops every inactive session whose `end_time` is older than `ttl`.
    /// Active sessions are never swept, regardless of `last_activity`.
    pub fn sweep_expired(&self, ttl: Duration) {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| {
            if session.is_active {
                return true;
            }
            match session.end_time {
                Some(end_time) => {
                    now.signed_duration_since(end_time).num_milliseconds()
                        < ttl.as_millis() as i64
                }
                None => true,
            }
        });
        let dropped = before - sessions.len();
        if dropped > 0 {
            metrics::counter!(METRICS_ID_SESSIONS_EXPIRED).increment(dropped as u64);
        }
        metrics::gauge!(METRICS_ID_SESSIONS_OPEN).set(sessions.len() as f64);
    }

    /// Spawns the periodic expiry sweeper, parented to `cancellation_token`.
    /// Stopping is idempotent and safe under concurrent cancellation.
    pub fn spawn_sweeper(
        &self,
        cleanup_interval: Duration,
        session_ttl: Duration,
        cancellation_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => manager.sweep_expired(session_ttl),
                }
            }
        })
    }

    /// The number of sessions currently held in memory, for diagnostics.
    pub fn get_memory_stats(&self) -> SessionMemoryStats {
        let sessions = self.sessions.read();
        let active = sessions.values().filter(|s| s.is_active).count();
        SessionMemoryStats {
            total: sessions.len(),
            active,
            inactive: sessions.len() - active,
        }
    }
}

/// A snapshot of the session manager's in-memory footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMemoryStats {
    /// Total sessions held, active or ended-but-unswept.
    pub total: usize,
    /// Sessions with `is_active == true`.
    pub active: usize,
    /// Sessions with `is_active == false`, still resident pending the sweeper.
    pub inactive: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_protocol::StoredSender;

    #[test]
    fn get_or_create_creates_when_absent() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("u1", None).unwrap();
        assert_eq!(session.user_id, "u1");
        assert!(session.is_active);
    }

    #[test]
    fn get_or_create_returns_existing_for_owner() {
        let manager = SessionManager::new();
        let created = manager.get_or_create("u1", None).unwrap();
        let fetched = manager.get_or_create("u1", Some(&created.id)).unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[test]
    fn get_or_create_rejects_other_principal() {
        let manager = SessionManager::new();
        let created = manager.get_or_create("u1", None).unwrap();
        let err = manager.get_or_create("u2", Some(&created.id)).unwrap_err();
        assert_eq!(err, SessionManagerError::Unauthorized);
    }

    #[test]
    fn get_or_create_rejects_second_active_session_for_same_principal() {
        let manager = SessionManager::new();
        let first = manager.get_or_create("u1", None).unwrap();
        let err = manager.get_or_create("u1", None).unwrap_err();
        assert_eq!(err, SessionManagerError::ActiveSessionExists);
        assert!(manager.get(&first.id).is_ok());
    }

    #[test]
    fn get_or_create_allows_new_session_once_prior_one_ended() {
        let manager = SessionManager::new();
        let first = manager.get_or_create("u1", None).unwrap();
        manager.end_session(&first.id).unwrap();
        let second = manager.get_or_create("u1", None).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn rollback_create_removes_session() {
        let manager = SessionManager::new();
        let created = manager.get_or_create("u1", None).unwrap();
        manager.rollback_create(&created.id);
        assert_eq!(manager.get(&created.id).unwrap_err(), SessionManagerError::NotFound);
    }

    #[test]
    fn add_message_appends_and_touches_activity() {
        let manager = SessionManager::new();
        let created = manager.get_or_create("u1", None).unwrap();
        manager
            .add_message(&created.id, StoredMessage::text(StoredSender::User, "hi"))
            .unwrap();
        assert_eq!(manager.get(&created.id).unwrap().messages.len(), 1);
    }

    #[test]
    fn mark_admin_assisted_is_sticky_through_clear() {
        let manager = SessionManager::new();
        let created = manager.get_or_create("u1", None).unwrap();
        manager.mark_admin_assisted(&created.id, "a1", "Alice").unwrap();
        manager.clear_admin_assistance(&created.id).unwrap();
        let session = manager.get(&created.id).unwrap();
        assert!(session.admin_assisted);
        assert!(session.assisting_admin_id.is_empty());
    }

    #[test]
    fn sweep_drops_only_inactive_expired_sessions() {
        let manager = SessionManager::new();
        let active = manager.get_or_create("u1", None).unwrap();
        let ended = manager.get_or_create("u2", None).unwrap();
        manager.end_session(&ended.id).unwrap();
        manager.sweep_expired(Duration::from_millis(0));
        assert!(manager.get(&active.id).is_ok());
        assert_eq!(manager.get(&ended.id).unwrap_err(), SessionManagerError::NotFound);
    }

    #[test]
    fn sweep_never_drops_active_sessions() {
        let manager = SessionManager::new();
        let active = manager.get_or_create("u1", None).unwrap();
        manager.sweep_expired(Duration::from_millis(0));
        assert!(manager.get(&active.id).is_ok());
    }
}
