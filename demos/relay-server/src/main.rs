//! Agent relay server.
//!
//! Run with: cargo run -p agent-relay-server
//!
//! Requires `API_BASE_URL`, `AUTH_TOKEN` and `DEFAULT_MODEL` in the environment.
//! Agents live under `AGENTS_DIR` (default `agents/`), one directory each with an `agent.py`.

use std::{net::SocketAddr, sync::Arc};

use agent_relay_core::RelayConfig;
use agent_relay_executor::AgentLauncher;
use agent_relay_session::{ReapSweeper, SessionManager, SessionRegistry};
use agent_relay_transport::{AppState, Credentials, TokenStore, create_router};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agent-relay-server", about = "Stream agent script output over SSE")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: std::net::IpAddr,

    #[arg(long, env = "PORT", default_value_t = 5001)]
    port: u16,

    /// Lifetime of issued login tokens.
    #[arg(long, env = "TOKEN_TTL_HOURS", default_value_t = 24)]
    token_ttl_hours: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = RelayConfig::from_env().context("Failed to load relay configuration")?;

    tokio::fs::create_dir_all(&config.agents_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.agents_dir.display()))?;
    tracing::info!(
        agents_dir = %config.agents_dir.display(),
        work_dir = %config.work_dir.display(),
        model = %config.default_model,
        "Relay configured"
    );

    let registry = Arc::new(SessionRegistry::new());
    let launcher = Arc::new(AgentLauncher::from_config(&config));
    let manager = Arc::new(SessionManager::with_registry(
        &config,
        launcher,
        Arc::clone(&registry),
    ));
    let sweeper = ReapSweeper::from_config(registry, &config).spawn();

    let tokens = Arc::new(TokenStore::new(chrono::Duration::hours(args.token_ttl_hours)));
    let app = create_router(AppState::new(manager, tokens, Credentials::default()));

    // Start server
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
            tracing::info!("Shutting down");
        })
        .await;
    sweeper.abort();
    served.context("Server error")
}
