//! ctxbench gateway: HTTP binding of the protocol execution engine.

mod routes;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ctxbench_engine::config::EngineConfig;
use ctxbench_engine::orchestrator::Orchestrator;

use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "ctxbench-gateway", about = "Compare context-feeding protocols over HTTP")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8420")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::default();
    info!(
        model = %config.model.model,
        base_url = %config.model.base_url,
        cache_ttl_secs = config.cache_ttl_secs,
        "ctxbench gateway starting"
    );

    let orchestrator =
        Orchestrator::from_config(&config).context("failed to build protocol engine")?;
    let state = Arc::new(AppState::new(orchestrator));

    let app = Router::new()
        .merge(routes::protocol_routes())
        .merge(routes::metrics_routes())
        .merge(routes::service_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("listening on http://{}", args.listen);

    axum::serve(listener, app).await?;
    Ok(())
}
