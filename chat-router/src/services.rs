//! Core services that make up the chat router core.
//!
//! Each service encapsulates a specific responsibility and is used by the
//! [`crate::router::Router`].
//!
//! # Services overview
//!
//! - [`rate_limiter`] – fixed-window per-principal rate limiting.
//! - [`session_manager`] – ownership, CRUD and expiry of in-memory sessions.

pub mod rate_limiter;
pub mod session_manager;
