//! API routes for the ctxbench gateway.
//!
//! Validation failures return 400 with the full list of violated
//! constraints; executor failures never fail the request — they arrive as
//! degraded entries inside a 200 batch response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use ctxbench_engine::error::EngineError;
use ctxbench_engine::metrics::{HistoryEntry, MetricsSummary};
use ctxbench_engine::orchestrator::{BatchRequest, BatchResult};
use ctxbench_engine::protocol::{protocol_catalog, Protocol, ProtocolInfo};

use crate::state::AppState;

type AppStateArc = Arc<AppState>;

/// Error body returned on 400/500 responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub errors: Vec<String>,
}

fn bad_request(errors: Vec<String>) -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { errors }))
}

// ============================================================================
// Protocol routes
// ============================================================================

pub fn protocol_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/protocols/run", post(run_protocols))
        .route("/protocols/info", get(protocol_info))
}

/// Wire format of a run request.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    pub document: String,
    #[serde(default)]
    pub source: Option<String>,
    pub protocols: Vec<String>,
    #[serde(default)]
    pub config: Option<HashMap<String, Map<String, Value>>>,
}

/// Parse the wire request into a typed batch request, collecting every
/// violation instead of stopping at the first.
pub fn build_batch_request(request: RunRequest) -> Result<BatchRequest, Vec<String>> {
    let mut violations = Vec::new();

    let mut protocols = Vec::with_capacity(request.protocols.len());
    for name in &request.protocols {
        match name.parse::<Protocol>() {
            Ok(protocol) => protocols.push(protocol),
            Err(_) => violations.push(format!(
                "unknown protocol '{name}' (expected one of raw, chain, tree, rag)"
            )),
        }
    }

    let mut batch = BatchRequest::new(request.prompt, request.document)
        .with_protocols(protocols);
    if let Some(source) = request.source {
        batch.source = Some(source);
    }
    for (name, options) in request.config.unwrap_or_default() {
        match name.parse::<Protocol>() {
            Ok(protocol) => {
                batch = batch.with_config(protocol, options);
            }
            Err(_) => violations.push(format!("config references unknown protocol '{name}'")),
        }
    }

    violations.extend(batch.violations());
    if violations.is_empty() {
        Ok(batch)
    } else {
        Err(violations)
    }
}

async fn run_protocols(
    State(state): State<AppStateArc>,
    Json(request): Json<RunRequest>,
) -> Result<Json<BatchResult>, (StatusCode, Json<ErrorBody>)> {
    let batch_request = build_batch_request(request).map_err(bad_request)?;

    match state.orchestrator.run_batch(&batch_request).await {
        Ok(batch) => Ok(Json(batch)),
        Err(EngineError::Validation(violations)) => Err(bad_request(violations)),
        Err(e @ EngineError::Configuration(_)) => Err(bad_request(vec![e.to_string()])),
        Err(e) => {
            error!(error = %e, "batch execution failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    errors: vec![e.to_string()],
                }),
            ))
        }
    }
}

async fn protocol_info() -> Json<Vec<ProtocolInfo>> {
    Json(protocol_catalog())
}

// ============================================================================
// Metrics routes
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/protocols/{protocol}", get(protocol_history))
}

async fn metrics_summary(State(state): State<AppStateArc>) -> Json<MetricsSummary> {
    Json(state.metrics.summary())
}

#[derive(Debug, Serialize)]
pub struct ProtocolHistoryResponse {
    pub protocol: Protocol,
    pub records: Vec<HistoryEntry>,
}

async fn protocol_history(
    State(state): State<AppStateArc>,
    Path(protocol): Path<String>,
) -> Result<Json<ProtocolHistoryResponse>, (StatusCode, Json<ErrorBody>)> {
    let protocol = protocol
        .parse::<Protocol>()
        .map_err(|e| bad_request(vec![e.to_string()]))?;

    Ok(Json(ProtocolHistoryResponse {
        protocol,
        records: state.metrics.history(protocol),
    }))
}

// ============================================================================
// Service routes
// ============================================================================

pub fn service_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct Banner {
    service: &'static str,
    version: &'static str,
    protocols: Vec<&'static str>,
}

async fn banner() -> Json<Banner> {
    Json(Banner {
        service: "ctxbench",
        version: env!("CARGO_PKG_VERSION"),
        protocols: Protocol::ALL.iter().map(|p| p.as_str()).collect(),
    })
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    uptime_secs: u64,
    version: &'static str,
}

async fn health(State(state): State<AppStateArc>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        timestamp: chrono::Utc::now(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
