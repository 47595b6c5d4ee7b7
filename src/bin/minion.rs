//! Minion server binary.
//!
//! Serves the built-in modules over HTTP so a `modcall` master can run
//! them on this host.
//!
//! # Environment Variables
//!
//! - `MODCALL_CONFIG` — YAML config file (optional)
//! - `MODCALL_MINION_ID`, `MODCALL_BIND`, `MODCALL_TOKEN` — override the file
//! - `RUST_LOG` — Tracing filter (default: "info,modcall=debug")
//!
//! # Usage
//!
//! ```bash
//! MODCALL_MINION_ID=mac01 cargo run --bin minion
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use modcall::config::ModcallConfig;
use modcall::dispatch::{Dispatcher, MinionId};
use modcall::modules::builtin_registry;
use modcall::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,modcall=debug".into()),
        )
        .init();

    let config_path = std::env::var_os("MODCALL_CONFIG").map(PathBuf::from);
    let config = ModcallConfig::load(config_path.as_deref()).context("Failed to load config")?;

    let registry = builtin_registry(&config.keychain.default_keychain)
        .context("Failed to register built-in modules")?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry)));

    let state = AppState::new(Arc::clone(&dispatcher), MinionId::new(config.minion_id.as_str()))
        .with_token(config.token.clone());
    let app = app_router(state);

    tracing::info!("minion {} starting on {}", config.minion_id, config.bind);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health    — liveness check");
    tracing::info!("  GET  /functions — {} registered functions", dispatcher.registry().len());
    tracing::info!("  POST /run       — execute a function");
    if config.token.is_none() {
        tracing::warn!("no token configured; /run accepts unauthenticated requests");
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
