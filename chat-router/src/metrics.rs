//! Metrics definitions for the chat router core.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for counting currently open sessions.
pub const METRICS_ID_SESSIONS_OPEN: &str = "chat.router.sessions.open";
/// Metrics key for sessions created.
pub const METRICS_ID_SESSIONS_CREATED: &str = "chat.router.sessions.created";
/// Metrics key for sessions dropped by the expiry sweeper.
pub const METRICS_ID_SESSIONS_EXPIRED: &str = "chat.router.sessions.expired";
/// Metrics key for currently registered user connections.
pub const METRICS_ID_CONNECTIONS_OPEN: &str = "chat.router.connections.open";
/// Metrics key for currently registered admin overlay connections.
pub const METRICS_ID_ADMIN_CONNECTIONS_OPEN: &str = "chat.router.connections.admin.open";
/// Metrics key for admin takeovers.
pub const METRICS_ID_ADMIN_TAKEOVERS: &str = "chat.router.admin.takeovers";
/// Metrics key for envelopes dispatched, by type.
pub const METRICS_ID_ENVELOPES_DISPATCHED: &str = "chat.router.envelopes.dispatched";
/// Metrics key for envelopes rejected by validation.
pub const METRICS_ID_ENVELOPES_REJECTED: &str = "chat.router.envelopes.rejected";
/// Metrics key for rate-limited user messages.
pub const METRICS_ID_RATE_LIMITED: &str = "chat.router.rate_limited";
/// Metrics key for outbound sends dropped by a full connection queue.
pub const METRICS_ID_SEND_DROPPED: &str = "chat.router.send.dropped";
/// Metrics key for LLM stream timeouts.
pub const METRICS_ID_LLM_TIMEOUTS: &str = "chat.router.llm.timeouts";
/// Metrics key for LLM stream open/connect failures.
pub const METRICS_ID_LLM_UNAVAILABLE: &str = "chat.router.llm.unavailable";
/// Metrics key for the duration of a full user-message LLM round trip.
pub const METRICS_ID_LLM_ROUND_TRIP_DURATION: &str = "chat.router.llm.round_trip.duration";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_SESSIONS_OPEN,
        metrics::Unit::Count,
        "Number of sessions currently held in memory"
    );

    metrics::describe_counter!(
        METRICS_ID_SESSIONS_CREATED,
        metrics::Unit::Count,
        "Number of sessions created"
    );

    metrics::describe_counter!(
        METRICS_ID_SESSIONS_EXPIRED,
        metrics::Unit::Count,
        "Number of ended sessions dropped by the expiry sweeper"
    );

    metrics::describe_gauge!(
        METRICS_ID_CONNECTIONS_OPEN,
        metrics::Unit::Count,
        "Number of currently registered user connections"
    );

    metrics::describe_gauge!(
        METRICS_ID_ADMIN_CONNECTIONS_OPEN,
        metrics::Unit::Count,
        "Number of currently registered admin overlay connections"
    );

    metrics::describe_counter!(
        METRICS_ID_ADMIN_TAKEOVERS,
        metrics::Unit::Count,
        "Number of admin takeovers handled"
    );

    metrics::describe_counter!(
        METRICS_ID_ENVELOPES_DISPATCHED,
        metrics::Unit::Count,
        "Number of inbound envelopes dispatched by type"
    );

    metrics::describe_counter!(
        METRICS_ID_ENVELOPES_REJECTED,
        metrics::Unit::Count,
        "Number of inbound envelopes rejected by validation"
    );

    metrics::describe_counter!(
        METRICS_ID_RATE_LIMITED,
        metrics::Unit::Count,
        "Number of user messages rejected by the rate limiter"
    );

    metrics::describe_counter!(
        METRICS_ID_SEND_DROPPED,
        metrics::Unit::Count,
        "Number of outbound sends dropped because a connection's queue was full or closing"
    );

    metrics::describe_counter!(
        METRICS_ID_LLM_TIMEOUTS,
        metrics::Unit::Count,
        "Number of user-message LLM streams that exceeded their deadline"
    );

    metrics::describe_counter!(
        METRICS_ID_LLM_UNAVAILABLE,
        metrics::Unit::Count,
        "Number of user-message LLM streams that failed to open"
    );

    metrics::describe_histogram!(
        METRICS_ID_LLM_ROUND_TRIP_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of a full user-message LLM round trip"
    );
}
