//! A runnable chat router binary wiring the router core to a canned LLM
//! backend, header-based principal extraction, and log-only persistence
//! and notifications. Intended as a starting point for a real deployment,
//! not as one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_router::config::RouterConfig;
use chat_router::services::rate_limiter::RateLimiter;
use chat_router::services::session_manager::SessionManager;
use chat_router::RouterBuilder;
use chat_router::transport::axum_ws;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

mod canned_llm;
mod header_auth;
mod noop_collaborators;

use canned_llm::CannedLlm;
use header_auth::HeaderPrincipalExtractor;
use noop_collaborators::{LoggingNotifications, LoggingSessionStore};

/// Command-line configuration for the example binary: the router core's
/// config, flattened, plus the bind address.
#[derive(Parser, Debug)]
struct ExampleConfig {
    /// The bind addr of the axum server.
    #[clap(long, env = "CHAT_ROUTER_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Max wait time the service waits for outstanding tasks during shutdown.
    #[clap(
        long,
        env = "CHAT_ROUTER_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    max_wait_time_shutdown: Duration,

    /// Comma-separated list of model ids the canned LLM accepts. Empty
    /// accepts any model id.
    #[clap(long, env = "CHAT_ROUTER_KNOWN_MODELS", value_delimiter = ',')]
    known_models: Vec<String>,

    #[clap(flatten)]
    router_config: RouterConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "chat_router_example=debug,chat_router=debug,info".into()))
        .init();
    chat_router::metrics::describe_metrics();

    let config = ExampleConfig::parse();
    config.router_config.environment.assert_is_dev();
    tracing::info!(?config, "starting chat-router-example");

    let cancellation_token = CancellationToken::new();
    let shutdown_tasks = TaskTracker::new();
    shutdown_tasks.spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            cancellation_token.cancel();
        }
    });
    shutdown_tasks.close();

    let router = RouterBuilder::build(
        config.router_config.clone(),
        SessionManager::new(),
        RateLimiter::new(config.router_config.rate_window, config.router_config.rate_limit),
        Arc::new(CannedLlm::new(config.known_models.clone())),
        Arc::new(LoggingSessionStore),
        Arc::new(LoggingNotifications),
        cancellation_token.clone(),
    );

    let app = axum_ws::app(router.clone(), Arc::new(HeaderPrincipalExtractor));
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let axum_cancellation = cancellation_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { axum_cancellation.cancelled().await })
        .await?;

    tracing::info!("waiting for router shutdown");
    match tokio::time::timeout(config.max_wait_time_shutdown, router.shutdown()).await {
        Ok(()) => tracing::info!("shut down cleanly"),
        Err(_) => tracing::warn!("shutdown did not finish within the deadline"),
    }
    shutdown_tasks.wait().await;
    Ok(())
}
