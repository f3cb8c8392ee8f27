//! HTTP API surface for the chat router core.
//!
//! - [`errors`] – Internal error type and its translation to the wire error taxonomy.
//! - [`health`] – Health endpoint (`/health`).
//! - [`info`] – Info about the service (`/version`, `/stats`).

pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod info;
