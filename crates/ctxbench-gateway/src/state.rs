//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use ctxbench_engine::metrics::MetricsCollector;
use ctxbench_engine::orchestrator::Orchestrator;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub metrics: Arc<MetricsCollector>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let metrics = orchestrator.metrics();
        Self {
            orchestrator,
            metrics,
            start_time: Instant::now(),
        }
    }
}
