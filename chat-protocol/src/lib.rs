#![deny(missing_docs)]
//! Core type definitions for the chat router core.
//!
//! This crate groups together the strongly-typed values shared between the
//! router/session-manager subsystem (`chat-router`) and anything that embeds
//! it: the wire [`envelope`] and its [`error`] taxonomy, the in-memory
//! [`principal`] and [`session`] data model, and the collaborator traits
//! (`LlmClient`, `SessionStore`, `NotificationService`) a hosting
//! application must implement to connect the router to a real LLM backend,
//! a persistence layer, and a notification side-channel.
//!
//! None of the types here know how to read or write bytes off a socket —
//! that is the transport layer's job, kept on the other side of the
//! `chat-router` crate boundary.

pub mod collaborators;
pub mod envelope;
pub mod error;
pub mod principal;
pub mod session;

pub use collaborators::{
    ChatMessage, LlmChunk, LlmClient, LlmError, LlmReply, NotificationService, SessionStore,
};
pub use envelope::{Envelope, ErrorInfo, MessageType, SenderKind};
pub use error::{ErrorCategory, ErrorCode, EnvelopeError};
pub use principal::Principal;
pub use session::{Session, StoredMessage, StoredSender};
