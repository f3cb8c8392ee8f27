//! Binds connections to sessions, dispatches inbound envelopes by type,
//! drives streaming LLM calls, broadcasts to session participants, enforces
//! ownership, and translates errors to wire form (spec §4.6).

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_protocol::{
    ChatMessage, Envelope, ErrorInfo, LlmClient, MessageType, NotificationService, SenderKind,
    Session, SessionStore, StoredMessage, StoredSender,
};
use futures::StreamExt as _;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::api::errors::RouterError;
use crate::config::RouterConfig;
use crate::connection::Connection;
use crate::metrics::{
    METRICS_ID_ADMIN_CONNECTIONS_OPEN, METRICS_ID_ADMIN_TAKEOVERS, METRICS_ID_CONNECTIONS_OPEN,
    METRICS_ID_ENVELOPES_DISPATCHED, METRICS_ID_ENVELOPES_REJECTED, METRICS_ID_LLM_ROUND_TRIP_DURATION,
    METRICS_ID_LLM_TIMEOUTS, METRICS_ID_LLM_UNAVAILABLE, METRICS_ID_RATE_LIMITED,
    METRICS_ID_SEND_DROPPED,
};
use crate::services::rate_limiter::RateLimiter;
use crate::services::session_manager::SessionManager;

const FATAL_ERROR_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Key for the admin connection registry: one admin may overlay multiple
/// sessions, so the key is `(admin_id, session_id)`.
type AdminKey = (String, String);

/// Owns the connection registries and drives envelope dispatch.
///
/// Built via [`RouterBuilder`]. Cheaply cloneable: every field is an `Arc`
/// or a clone-cheap handle, so every connection task holds its own `Router`.
#[derive(Clone)]
pub struct Router {
    config: Arc<RouterConfig>,
    session_manager: SessionManager,
    rate_limiter: RateLimiter,
    llm: Arc<dyn LlmClient>,
    session_store: Arc<dyn SessionStore>,
    notifications: Arc<dyn NotificationService>,
    user_connections: Arc<RwLock<HashMap<String, Connection>>>,
    admin_connections: Arc<RwLock<HashMap<AdminKey, Connection>>>,
    fatal_error_tasks: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Router {
    /// The session registry backing this router, for read-only reporting
    /// endpoints (`/stats`).
    pub(crate) fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    /// Registers `conn` as the sole connection for `session_id`.
    ///
    /// Rejects with [`RouterError::Unauthorized`] if the session exists and
    /// is owned by a different principal. The ownership check and the
    /// install happen under the same exclusive lock hold.
    #[instrument(level = "debug", skip_all, fields(session_id))]
    pub(crate) fn register_user_connection(
        &self,
        session_id: &str,
        conn: Connection,
    ) -> Result<(), RouterError> {
        if let Ok(session) = self.session_manager.get(session_id)
            && session.user_id != conn.principal().user_id()
        {
            return Err(RouterError::Unauthorized);
        }
        let mut connections = self.user_connections.write();
        if let Some(existing) = connections.get(session_id)
            && existing.principal().user_id() != conn.principal().user_id()
        {
            return Err(RouterError::Unauthorized);
        }
        connections.insert(session_id.to_owned(), conn);
        metrics::gauge!(METRICS_ID_CONNECTIONS_OPEN).set(connections.len() as f64);
        Ok(())
    }

    /// Idempotent.
    pub(crate) fn unregister_user_connection(&self, session_id: &str) {
        let mut connections = self.user_connections.write();
        connections.remove(session_id);
        metrics::gauge!(METRICS_ID_CONNECTIONS_OPEN).set(connections.len() as f64);
    }

    fn register_admin_connection(&self, admin_id: &str, session_id: &str, conn: Connection) {
        let mut connections = self.admin_connections.write();
        connections.insert((admin_id.to_owned(), session_id.to_owned()), conn);
        metrics::gauge!(METRICS_ID_ADMIN_CONNECTIONS_OPEN).set(connections.len() as f64);
    }

    /// Idempotent.
    pub(crate) fn unregister_admin_connection(&self, admin_id: &str, session_id: &str) {
        let mut connections = self.admin_connections.write();
        connections.remove(&(admin_id.to_owned(), session_id.to_owned()));
        metrics::gauge!(METRICS_ID_ADMIN_CONNECTIONS_OPEN).set(connections.len() as f64);
    }

    /// Dispatches one inbound envelope from `principal_id` on `session_id`'s
    /// connection. `session_id` is `None` only before a session is bound.
    ///
    /// On error, the caller is responsible for delivering the translated
    /// [`ErrorInfo`] and, if the category closes the connection, invoking
    /// [`Router::handle_fatal_error`].
    #[instrument(level = "debug", skip_all, fields(principal_id, message_type = ?envelope.message_type))]
    pub(crate) async fn dispatch(
        &self,
        principal_id: &str,
        conn: &Connection,
        mut envelope: Envelope,
    ) -> Result<(), RouterError> {
        envelope.sanitize();
        envelope.validate(self.config.max_content_length)?;

        if envelope.message_type == MessageType::UserMessage && !self.rate_limiter.allow(principal_id) {
            metrics::counter!(METRICS_ID_RATE_LIMITED).increment(1);
            return Err(RouterError::RateLimited {
                retry_after_ms: self.rate_limiter.retry_after_ms(principal_id),
            });
        }

        metrics::counter!(METRICS_ID_ENVELOPES_DISPATCHED, "type" => message_type_label(envelope.message_type))
            .increment(1);

        let result = match envelope.message_type {
            MessageType::UserMessage => self.handle_user_message(principal_id, conn, envelope).await,
            MessageType::HelpRequest => self.handle_help_request(principal_id, envelope).await,
            MessageType::ModelSelect => self.handle_model_select(principal_id, envelope).await,
            MessageType::FileUpload | MessageType::VoiceMessage => {
                self.handle_attachment(principal_id, envelope).await
            }
            MessageType::AdminJoin => match envelope.session_id.as_deref() {
                Some(session_id) => self.handle_admin_takeover(conn, session_id).await,
                None => Err(RouterError::Envelope(chat_protocol::EnvelopeError::validation(
                    "session_id",
                    "required",
                ))),
            },
            MessageType::AdminLeave => match envelope.session_id.as_deref() {
                Some(session_id) => self.handle_admin_leave(principal_id, session_id).await,
                None => Err(RouterError::Envelope(chat_protocol::EnvelopeError::validation(
                    "session_id",
                    "required",
                ))),
            },
            _ => Err(RouterError::Envelope(chat_protocol::EnvelopeError::validation(
                "type",
                "unsupported for dispatch",
            ))),
        };

        if result.is_err() {
            metrics::counter!(METRICS_ID_ENVELOPES_REJECTED).increment(1);
        }
        result
    }

    async fn handle_user_message(
        &self,
        principal_id: &str,
        conn: &Connection,
        envelope: Envelope,
    ) -> Result<(), RouterError> {
        let content = envelope.content.clone().unwrap_or_default();
        let session = self
            .get_or_create_session(principal_id, envelope.session_id.as_deref())
            .await?;
        // Binds `conn` to the resolved session id even when the inbound
        // envelope carried none yet (the first message of a new session).
        self.register_user_connection(&session.id, conn.clone())?;

        self.session_manager
            .add_message(&session.id, StoredMessage::text(StoredSender::User, content.clone()))?;
        let _ = self
            .session_store
            .add_message(&session.id, &StoredMessage::text(StoredSender::User, content.clone()))
            .await;

        conn.safe_send(
            Envelope {
                message_type: MessageType::Loading,
                session_id: Some(session.id.clone()),
                content: None,
                file_id: None,
                file_url: None,
                model_id: None,
                timestamp: chrono::Utc::now(),
                sender: SenderKind::System,
                metadata: BTreeMap::new(),
                error: None,
            }
            .encode(),
        );

        self.run_llm_stream(&session, conn, content).await
    }

    async fn run_llm_stream(&self, session: &Session, conn: &Connection, content: String) -> Result<(), RouterError> {
        let model_id = session.model_id.clone().unwrap_or_default();
        let messages = [ChatMessage::new("user", content)];
        let deadline = Instant::now() + self.config.llm_stream_timeout;
        if self.cancellation_token.is_cancelled() {
            return Err(RouterError::LlmUnavailable("shutting down".to_owned()));
        }
        let mut stream = self.llm.stream(&model_id, &messages);

        let started = Instant::now();
        let mut full_text = String::new();
        loop {
            let chunk = tokio::select! {
                _ = tokio::time::sleep_until(deadline.into()) => {
                    metrics::counter!(METRICS_ID_LLM_TIMEOUTS).increment(1);
                    return Err(RouterError::LlmTimeout);
                }
                _ = self.cancellation_token.cancelled() => {
                    return Err(RouterError::LlmUnavailable("shutting down".to_owned()));
                }
                next = stream.next() => next,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|err| {
                metrics::counter!(METRICS_ID_LLM_UNAVAILABLE).increment(1);
                RouterError::LlmUnavailable(err.to_string())
            })?;

            if !chunk.content.is_empty() {
                full_text.push_str(&chunk.content);
                let mut metadata = BTreeMap::new();
                metadata.insert("streaming".to_owned(), "true".to_owned());
                metadata.insert("done".to_owned(), chunk.done.to_string());
                let envelope = Envelope {
                    message_type: MessageType::AiResponse,
                    session_id: Some(session.id.clone()),
                    content: Some(chunk.content),
                    file_id: None,
                    file_url: None,
                    model_id: None,
                    timestamp: chrono::Utc::now(),
                    sender: SenderKind::Ai,
                    metadata,
                    error: None,
                };
                // Sent to `conn` directly since it is the connection that
                // opened this stream; `broadcast_to_session` only needs to
                // additionally reach an overlaying admin, if any.
                conn.safe_send(envelope.clone().encode());
                self.broadcast_to_session(&session.id, envelope, Some(conn));
            }
            if chunk.done {
                break;
            }
        }

        let elapsed = started.elapsed();
        metrics::histogram!(METRICS_ID_LLM_ROUND_TRIP_DURATION).record(elapsed.as_millis() as f64);
        let _ = self.session_manager.record_response_time(&session.id, elapsed);
        let estimated_tokens = full_text.len().div_ceil(4) as u64;
        let _ = self.session_manager.update_token_usage(&session.id, estimated_tokens);
        Ok(())
    }

    async fn handle_help_request(&self, principal_id: &str, envelope: Envelope) -> Result<(), RouterError> {
        let session_id = envelope
            .session_id
            .ok_or_else(|| chat_protocol::EnvelopeError::validation("session_id", "required"))?;
        let session = self.session_manager.get(&session_id)?;
        if session.user_id != principal_id {
            return Err(RouterError::Unauthorized);
        }
        self.session_manager.mark_help_requested(&session_id)?;

        let notifications = Arc::clone(&self.notifications);
        let session_id_for_task = session_id.clone();
        let principal_id = principal_id.to_owned();
        self.fatal_error_tasks.spawn(async move {
            if let Err(err) = notifications
                .send_help_request_alert(&principal_id, &session_id_for_task)
                .await
            {
                tracing::warn!(%err, "failed to send help-request alert");
            }
        });

        self.broadcast_to_session(
            &session_id,
            Envelope {
                message_type: MessageType::Notification,
                session_id: Some(session_id),
                content: Some("a human has been notified".to_owned()),
                file_id: None,
                file_url: None,
                model_id: None,
                timestamp: chrono::Utc::now(),
                sender: SenderKind::System,
                metadata: BTreeMap::new(),
                error: None,
            },
            None,
        );
        Ok(())
    }

    async fn handle_model_select(&self, principal_id: &str, envelope: Envelope) -> Result<(), RouterError> {
        let model_id = envelope.model_id.clone().unwrap_or_default();
        let session_id = envelope
            .session_id
            .ok_or_else(|| chat_protocol::EnvelopeError::validation("session_id", "required"))?;
        let session = self.session_manager.get(&session_id)?;
        if session.user_id != principal_id {
            return Err(RouterError::Unauthorized);
        }
        self.llm
            .validate_model(&model_id)
            .await
            .map_err(|err| RouterError::InvalidModel(err.to_string()))?;
        self.session_manager.set_model_id(&session_id, model_id.clone())?;

        self.broadcast_to_session(
            &session_id,
            Envelope {
                message_type: MessageType::ModelSelect,
                session_id: Some(session_id),
                content: None,
                file_id: None,
                file_url: None,
                model_id: Some(model_id),
                timestamp: chrono::Utc::now(),
                sender: SenderKind::System,
                metadata: BTreeMap::new(),
                error: None,
            },
            None,
        );
        Ok(())
    }

    async fn handle_attachment(&self, principal_id: &str, envelope: Envelope) -> Result<(), RouterError> {
        let session_id = envelope
            .session_id
            .clone()
            .ok_or_else(|| chat_protocol::EnvelopeError::validation("session_id", "required"))?;
        let session = self.session_manager.get(&session_id)?;
        if session.user_id != principal_id {
            return Err(RouterError::Unauthorized);
        }
        let file_url = envelope.file_url.clone().unwrap_or_default();
        if !(file_url.starts_with("https://") || file_url.starts_with("http://")) {
            return Err(RouterError::Envelope(chat_protocol::EnvelopeError::validation(
                "file_url",
                "must be an absolute http(s) URL",
            )));
        }

        let sender = match envelope.sender {
            SenderKind::Admin => StoredSender::Admin,
            _ => StoredSender::User,
        };
        let message = StoredMessage {
            content: envelope.content.clone().unwrap_or_default(),
            timestamp: envelope.timestamp,
            sender,
            file_id: envelope.file_id.clone(),
            file_url: envelope.file_url.clone(),
            metadata: envelope.metadata.clone(),
        };
        self.session_manager.add_message(&session_id, message.clone())?;
        let _ = self.session_store.add_message(&session_id, &message).await;

        self.broadcast_to_session(&session_id, envelope.clone(), None);

        if envelope.message_type == MessageType::VoiceMessage {
            self.spawn_voice_transcription(session_id, file_url);
        }
        Ok(())
    }

    fn spawn_voice_transcription(&self, session_id: String, file_url: String) {
        let llm = Arc::clone(&self.llm);
        let deadline = self.config.voice_process_timeout;
        self.fatal_error_tasks.spawn(async move {
            let outcome = tokio::time::timeout(
                deadline,
                llm.send("transcribe", &[ChatMessage::new("user", file_url)]),
            )
            .await;
            match outcome {
                Ok(Ok(_reply)) => {}
                Ok(Err(err)) => tracing::warn!(%err, session_id, "voice transcription failed"),
                Err(_) => tracing::warn!(session_id, "voice transcription timed out"),
            }
        });
    }

    /// Resolves a session for `user_id`/`session_id` per spec §4.6.3 step 1,
    /// rolling back the in-memory session if the persistence layer's
    /// `create_session` call fails.
    async fn get_or_create_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session, RouterError> {
        let session = self.session_manager.get_or_create(user_id, session_id)?;
        let is_new = session_id != Some(session.id.as_str());
        if is_new && let Err(err) = self.session_store.create_session(&session).await {
            tracing::warn!(%err, session_id = %session.id, "session store create_session failed, rolling back");
            self.session_manager.rollback_create(&session.id);
            return Err(RouterError::Envelope(chat_protocol::EnvelopeError::validation(
                "session_id",
                "could not persist session",
            )));
        }
        Ok(session)
    }

    /// Encodes `envelope` once and delivers it to the user connection on
    /// `session_id`, and to the overlaying admin connection if one exists.
    /// Best-effort: a failed admin send never fails the call.
    ///
    /// `skip` lets the caller avoid re-encoding when it already holds the
    /// user connection it just sent to directly.
    pub(crate) fn broadcast_to_session(&self, session_id: &str, envelope: Envelope, skip: Option<&Connection>) {
        let bytes = envelope.encode();
        if skip.is_none()
            && let Some(conn) = self.user_connections.read().get(session_id)
        {
            conn.safe_send(bytes.clone());
        }
        let Ok(session) = self.session_manager.get(session_id) else {
            return;
        };
        if session.assisting_admin_id.is_empty() {
            return;
        }
        let admin_key = (session.assisting_admin_id.clone(), session_id.to_owned());
        if let Some(admin_conn) = self.admin_connections.read().get(&admin_key)
            && !admin_conn.safe_send(bytes)
        {
            metrics::counter!(METRICS_ID_SEND_DROPPED).increment(1);
            tracing::warn!(session_id, admin_id = %session.assisting_admin_id, "dropped broadcast to admin connection");
        }
    }

    /// Handles an admin joining `session_id`. Idempotent when called
    /// repeatedly by the same admin.
    pub(crate) async fn handle_admin_takeover(
        &self,
        admin_conn: &Connection,
        session_id: &str,
    ) -> Result<(), RouterError> {
        let admin_id = admin_conn.principal().user_id().to_owned();
        let admin_name = admin_conn.principal().display_name_or_id().to_owned();

        let session = self.session_manager.get(session_id)?;
        if !session.assisting_admin_id.is_empty() && session.assisting_admin_id != admin_id {
            return Err(RouterError::AlreadyOverlaid);
        }

        self.session_manager
            .mark_admin_assisted(session_id, admin_id.clone(), admin_name.clone())?;
        self.register_admin_connection(&admin_id, session_id, admin_conn.clone());
        metrics::counter!(METRICS_ID_ADMIN_TAKEOVERS).increment(1);

        let mut metadata = BTreeMap::new();
        metadata.insert("admin_id".to_owned(), admin_id.clone());
        metadata.insert("admin_name".to_owned(), admin_name.clone());
        self.broadcast_to_session(
            session_id,
            Envelope {
                message_type: MessageType::AdminJoin,
                session_id: Some(session_id.to_owned()),
                content: Some(format!("Administrator {admin_name} has joined the session")),
                file_id: None,
                file_url: None,
                model_id: None,
                timestamp: chrono::Utc::now(),
                sender: SenderKind::Admin,
                metadata,
                error: None,
            },
            None,
        );
        Ok(())
    }

    /// Handles an admin leaving `session_id`.
    pub(crate) async fn handle_admin_leave(&self, admin_id: &str, session_id: &str) -> Result<(), RouterError> {
        let session = self.session_manager.get(session_id)?;
        if session.assisting_admin_id != admin_id {
            return Err(RouterError::NotOverlaying);
        }
        let admin_name = session.assisting_admin_name.clone();
        self.session_manager.clear_admin_assistance(session_id)?;
        self.unregister_admin_connection(admin_id, session_id);

        let mut metadata = BTreeMap::new();
        metadata.insert("admin_id".to_owned(), admin_id.to_owned());
        metadata.insert("admin_name".to_owned(), admin_name);
        self.broadcast_to_session(
            session_id,
            Envelope {
                message_type: MessageType::AdminLeave,
                session_id: Some(session_id.to_owned()),
                content: Some("Administrator has left the session".to_owned()),
                file_id: None,
                file_url: None,
                model_id: None,
                timestamp: chrono::Utc::now(),
                sender: SenderKind::Admin,
                metadata,
                error: None,
            },
            None,
        );
        Ok(())
    }

    /// Translates `error` to wire form, delivers it on `conn`, and — if the
    /// category closes the connection — schedules an asynchronous close
    /// after a short grace period. The caller never blocks on the close.
    #[instrument(level = "debug", skip_all)]
    pub(crate) fn handle_error(&self, session_id: Option<&str>, conn: &Connection, error: RouterError) {
        let info = error.into_error_info();
        let closes_connection = info.code.category().closes_connection();
        conn.safe_send(
            Envelope {
                message_type: MessageType::Error,
                session_id: session_id.map(str::to_owned),
                content: None,
                file_id: None,
                file_url: None,
                model_id: None,
                timestamp: chrono::Utc::now(),
                sender: SenderKind::Ai,
                metadata: BTreeMap::new(),
                error: Some(info),
            }
            .encode(),
        );
        if closes_connection {
            self.schedule_fatal_close(session_id.map(str::to_owned), conn.clone());
        }
    }

    fn schedule_fatal_close(&self, session_id: Option<String>, conn: Connection) {
        conn.set_closing();
        let router = self.clone();
        self.fatal_error_tasks.spawn(async move {
            tokio::time::sleep(FATAL_ERROR_GRACE_PERIOD).await;
            conn.close();
            if let Some(session_id) = session_id {
                router.unregister_user_connection(&session_id);
            }
        });
    }

    /// Cancels the router's lifecycle context, stops the rate-limiter and
    /// session-expiry sweepers, and waits for every tracked background task
    /// (fatal-error closes, voice transcription, help-request alerts) to
    /// finish. Only after this returns may the caller proceed to transport
    /// teardown.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.fatal_error_tasks.close();
        self.fatal_error_tasks.wait().await;
    }
}

fn message_type_label(message_type: MessageType) -> &'static str {
    use MessageType::*;
    match message_type {
        UserMessage => "user_message",
        AiResponse => "ai_response",
        FileUpload => "file_upload",
        VoiceMessage => "voice_message",
        Error => "error",
        ConnectionStatus => "connection_status",
        TypingIndicator => "typing_indicator",
        HelpRequest => "help_request",
        AdminJoin => "admin_join",
        AdminLeave => "admin_leave",
        ModelSelect => "model_select",
        Loading => "loading",
        Notification => "notification",
    }
}

/// Builds a [`Router`] and spawns its background sweepers.
pub struct RouterBuilder;

impl RouterBuilder {
    /// Builds a [`Router`] and spawns its rate-limiter and session-expiry
    /// sweepers, parented to `cancellation_token`.
    pub fn build(
        config: RouterConfig,
        session_manager: SessionManager,
        rate_limiter: RateLimiter,
        llm: Arc<dyn LlmClient>,
        session_store: Arc<dyn SessionStore>,
        notifications: Arc<dyn NotificationService>,
        cancellation_token: CancellationToken,
    ) -> Router {
        rate_limiter.spawn_sweeper(cancellation_token.clone());
        session_manager.spawn_sweeper(config.cleanup_interval, config.session_ttl, cancellation_token.clone());
        Router {
            config: Arc::new(config),
            session_manager,
            rate_limiter,
            llm,
            session_store,
            notifications,
            user_connections: Arc::new(RwLock::new(HashMap::new())),
            admin_connections: Arc::new(RwLock::new(HashMap::new())),
            fatal_error_tasks: TaskTracker::new(),
            cancellation_token,
        }
    }
}
