//! A `axum` WebSocket adapter over the transport-agnostic [`Router`] API.
//!
//! This module is the concrete instantiation of the "transport
//! collaborator" interface: the dispatch logic in [`crate::router`] never
//! references `axum` types directly.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router as AxumRouter,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::any,
};
use chat_protocol::{Envelope, Principal};
use tracing::instrument;

use crate::Router;
use crate::api::errors::RouterError;

/// Produces the [`Principal`] bound to an incoming connection from its
/// upgrade request headers.
///
/// Authentication/JWT validation happens upstream of this crate; a hosting
/// application supplies the concrete extractor (for example, one that
/// reads and verifies a bearer token).
#[async_trait]
pub trait PrincipalExtractor: Send + Sync {
    /// Extracts the authenticated principal, or rejects the upgrade.
    async fn extract(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// A principal-extraction failure. Always rejects the upgrade with `401`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AuthError(pub String);

#[derive(Clone)]
struct WsState {
    router: Router,
    extractor: Arc<dyn PrincipalExtractor>,
}

/// Builds a router serving `/ws` as the chat WebSocket endpoint.
pub fn routes(router: Router, extractor: Arc<dyn PrincipalExtractor>) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", any(upgrade))
        .with_state(WsState { router, extractor })
}

/// Builds the full application: the WebSocket endpoint plus the health and
/// info endpoints, all bound to `router`.
pub fn app(router: Router, extractor: Arc<dyn PrincipalExtractor>) -> AxumRouter {
    let session_manager = router.session_manager().clone();
    routes(router, extractor)
        .merge(crate::api::health::routes())
        .merge(crate::api::info::routes(session_manager))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[instrument(level = "debug", skip_all)]
async fn upgrade(
    State(state): State<WsState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let principal = match state.extractor.extract(&headers).await {
        Ok(principal) => principal,
        Err(err) => {
            tracing::debug!(%err, "rejecting websocket upgrade");
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };
    ws.on_upgrade(move |socket| connection_loop(socket, state.router, principal))
}

#[instrument(level = "debug", skip_all, fields(user_id = %principal.user_id()))]
async fn connection_loop(socket: WebSocket, router: Router, principal: Principal) {
    let queue_depth = 256;
    let (conn, mut outbound_rx) = crate::connection::Connection::new(principal, queue_depth);
    let (mut ws_sink, mut ws_stream) = futures::StreamExt::split(socket);
    let mut bound_session_id: Option<String> = None;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(bytes) = outbound else { break };
                if futures::SinkExt::send(&mut ws_sink, Message::Text(
                    String::from_utf8_lossy(&bytes).into_owned().into(),
                )).await.is_err() {
                    break;
                }
            }
            inbound = futures::StreamExt::next(&mut ws_stream) => {
                let Some(inbound) = inbound else { break };
                let Ok(message) = inbound else { break };
                let bytes = match message {
                    Message::Text(text) => text.as_bytes().to_vec(),
                    Message::Binary(bytes) => bytes.to_vec(),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                handle_inbound(&router, &conn, &mut bound_session_id, &bytes).await;
            }
        }
    }

    if let Some(session_id) = bound_session_id {
        router.unregister_user_connection(&session_id);
    }
}

async fn handle_inbound(
    router: &Router,
    conn: &crate::connection::Connection,
    bound_session_id: &mut Option<String>,
    bytes: &[u8],
) {
    let envelope = match Envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(err) => {
            router.handle_error(bound_session_id.as_deref(), conn, RouterError::Envelope(err));
            return;
        }
    };

    // Only the owning user's connection is installed in the user registry;
    // an admin's connection is registered separately, inside
    // `handle_admin_takeover`, under the `(admin_id, session_id)` key.
    if envelope.sender == chat_protocol::SenderKind::User
        && let Some(session_id) = &envelope.session_id
        && bound_session_id.is_none()
    {
        if let Err(err) = router.register_user_connection(session_id, conn.clone()) {
            router.handle_error(Some(session_id), conn, err);
            return;
        }
        *bound_session_id = Some(session_id.clone());
    }

    let principal_id = conn.principal().user_id().to_owned();
    if let Err(err) = router.dispatch(&principal_id, conn, envelope.clone()).await {
        router.handle_error(envelope.session_id.as_deref(), conn, err);
    }
}
