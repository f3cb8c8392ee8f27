//! Configuration types and CLI/environment parsing for the chat router core.
//!
//! Concrete implementations may have a more detailed config and can use the
//! exposed [`RouterConfig`] and flatten it with `#[clap(flatten)]`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// The environment the service is running in.
///
/// Main usage for `Environment` is to call [`Environment::assert_is_dev`].
/// Services that are intended for `dev` only (like a canned in-memory LLM
/// client) shall assert that they are called from the `dev` environment.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
}

impl Environment {
    /// Asserts that `Environment` is `dev`. Panics if not the case.
    pub fn assert_is_dev(&self) {
        assert!(matches!(self, Environment::Dev), "Is not dev environment")
    }
}

/// The configuration for the chat router core.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug, Clone)]
pub struct RouterConfig {
    /// The environment of the chat router (either `prod` or `dev`).
    #[clap(long, env = "CHAT_ROUTER_ENVIRONMENT", default_value = "prod")]
    pub environment: Environment,

    /// Max message size the websocket connection accepts.
    #[clap(long, env = "CHAT_ROUTER_WS_MAX_MESSAGE_SIZE", default_value = "65536")]
    pub ws_max_message_size: usize,

    /// Max content length, in characters, of a single envelope's `content`.
    #[clap(long, env = "CHAT_ROUTER_MAX_CONTENT_LENGTH", default_value = "10000")]
    pub max_content_length: usize,

    /// Max size, in bytes, of a file or voice attachment.
    #[clap(
        long,
        env = "CHAT_ROUTER_MAX_FILE_SIZE",
        default_value = "26214400"
    )]
    pub max_file_size: u64,

    /// How long an inactive, ended session is kept in memory before the
    /// expiry sweeper drops it.
    #[clap(
        long,
        env = "CHAT_ROUTER_SESSION_TTL",
        default_value = "15min",
        value_parser = humantime::parse_duration
    )]
    pub session_ttl: Duration,

    /// How often the session expiry sweeper wakes up.
    #[clap(
        long,
        env = "CHAT_ROUTER_CLEANUP_INTERVAL",
        default_value = "5min",
        value_parser = humantime::parse_duration
    )]
    pub cleanup_interval: Duration,

    /// The rate limiter's fixed window length.
    #[clap(
        long,
        env = "CHAT_ROUTER_RATE_WINDOW",
        default_value = "1min",
        value_parser = humantime::parse_duration
    )]
    pub rate_window: Duration,

    /// The rate limiter's per-window request budget.
    #[clap(long, env = "CHAT_ROUTER_RATE_LIMIT", default_value = "100")]
    pub rate_limit: u32,

    /// Deadline for a single user-message LLM stream, start to finish.
    #[clap(
        long,
        env = "CHAT_ROUTER_LLM_STREAM_TIMEOUT",
        default_value = "120s",
        value_parser = humantime::parse_duration
    )]
    pub llm_stream_timeout: Duration,

    /// Deadline for a single voice-message transcription task.
    #[clap(
        long,
        env = "CHAT_ROUTER_VOICE_PROCESS_TIMEOUT",
        default_value = "60s",
        value_parser = humantime::parse_duration
    )]
    pub voice_process_timeout: Duration,

    /// Depth of each connection's bounded outbound queue.
    #[clap(long, env = "CHAT_ROUTER_OUTBOUND_QUEUE_DEPTH", default_value = "256")]
    pub outbound_queue_depth: usize,

    /// The region this instance is deployed in.
    #[clap(long, env = "CHAT_ROUTER_REGION", default_value = "unknown")]
    pub region: String,
}
