//! Concrete transport adapters over the transport-agnostic [`crate::Router`]
//! API (spec §6's "transport collaborator").
//!
//! - [`axum_ws`] – a WebSocket adapter built on `axum`.

pub mod axum_ws;
