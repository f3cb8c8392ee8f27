#![deny(missing_docs)]
//! The message router and session lifecycle core of a real-time chat
//! service.
//!
//! This crate owns the set of live connections, per-session state,
//! ownership enforcement, admin-takeover semantics, streaming LLM fan-out,
//! rate limiting, and error classification for every inbound
//! [`chat_protocol::Envelope`]. Hosting applications provide the three
//! collaborator traits from `chat-protocol` (`LlmClient`, `SessionStore`,
//! `NotificationService`) and wire up a concrete transport — the
//! [`transport::axum_ws`] module supplies one built on `axum` WebSockets.
//!
//! The main entry point is [`router::RouterBuilder`], which assembles a
//! [`router::Router`] and spawns its background sweepers (rate-limiter
//! cleanup, session expiry). If the router encounters a condition that
//! should stop the whole service, cancel the `CancellationToken` passed to
//! the builder; to shut the router down cleanly, call
//! [`router::Router::shutdown`] and await it before tearing down the
//! transport.

pub mod api;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod router;
pub mod services;
pub mod transport;

pub use connection::Connection;
pub use router::{Router, RouterBuilder};
