//! Metrics collection: one record per completed run, aggregate and
//! per-protocol summaries.
//!
//! Records are appended for successes and failures alike and never updated.
//! Retention is a bounded ring (oldest evicted first) so long-running
//! deployments don't grow without bound; summaries are computed over the
//! retained window.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::Protocol;

/// Default number of records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Performance metrics of one protocol run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub tokens: u64,
    pub latency_ms: u64,
    /// Quality score in [1, 10]; 0.0 on degraded (failed) runs.
    pub quality: f64,
}

/// One appended record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub protocol: Protocol,
    pub timestamp: DateTime<Utc>,
    pub metrics: RunMetrics,
}

/// One entry of a per-protocol history query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub metrics: RunMetrics,
}

/// Averages over a set of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSummary {
    pub runs: u64,
    pub avg_latency_ms: f64,
    pub avg_tokens: f64,
    pub avg_quality: f64,
}

/// Aggregate summary over every retained run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_runs: u64,
    pub avg_latency_ms: f64,
    pub avg_tokens: f64,
    pub avg_quality: f64,
    /// One entry per distinct protocol observed, keyed by protocol name.
    pub per_protocol: BTreeMap<String, ProtocolSummary>,
}

/// Append-only collector of run metrics with bounded retention.
pub struct MetricsCollector {
    records: RwLock<VecDeque<MetricRecord>>,
    capacity: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a record stamped with the current time.
    ///
    /// Appends must never be lost, so a poisoned lock is recovered rather
    /// than propagated.
    pub fn record(&self, protocol: Protocol, metrics: RunMetrics) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        records.push_back(MetricRecord {
            protocol,
            timestamp: Utc::now(),
            metrics,
        });
        while records.len() > self.capacity {
            records.pop_front();
            debug!(capacity = self.capacity, "evicted oldest metric record");
        }
    }

    /// Aggregate summary: pooled averages plus a per-protocol breakdown.
    ///
    /// With zero records every average is 0 and the breakdown is empty.
    pub fn summary(&self) -> MetricsSummary {
        let records = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut summary = MetricsSummary::default();
        if records.is_empty() {
            return summary;
        }

        let mut totals = Totals::default();
        let mut per_protocol: BTreeMap<String, Totals> = BTreeMap::new();
        for record in records.iter() {
            totals.add(&record.metrics);
            per_protocol
                .entry(record.protocol.as_str().to_string())
                .or_default()
                .add(&record.metrics);
        }

        summary.total_runs = totals.runs;
        summary.avg_latency_ms = totals.avg_latency_ms();
        summary.avg_tokens = totals.avg_tokens();
        summary.avg_quality = totals.avg_quality();
        summary.per_protocol = per_protocol
            .into_iter()
            .map(|(name, totals)| (name, totals.into_summary()))
            .collect();
        summary
    }

    /// Time-ordered history for one protocol, in recording order.
    pub fn history(&self, protocol: Protocol) -> Vec<HistoryEntry> {
        let records = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|record| record.protocol == protocol)
            .map(|record| HistoryEntry {
                timestamp: record.timestamp,
                metrics: record.metrics.clone(),
            })
            .collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Totals {
    runs: u64,
    latency_ms: u64,
    tokens: u64,
    quality: f64,
}

impl Totals {
    fn add(&mut self, metrics: &RunMetrics) {
        self.runs += 1;
        self.latency_ms += metrics.latency_ms;
        self.tokens += metrics.tokens;
        self.quality += metrics.quality;
    }

    fn avg_latency_ms(&self) -> f64 {
        self.latency_ms as f64 / self.runs as f64
    }

    fn avg_tokens(&self) -> f64 {
        self.tokens as f64 / self.runs as f64
    }

    fn avg_quality(&self) -> f64 {
        self.quality / self.runs as f64
    }

    fn into_summary(self) -> ProtocolSummary {
        ProtocolSummary {
            runs: self.runs,
            avg_latency_ms: self.avg_latency_ms(),
            avg_tokens: self.avg_tokens(),
            avg_quality: self.avg_quality(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(tokens: u64, latency_ms: u64, quality: f64) -> RunMetrics {
        RunMetrics {
            tokens,
            latency_ms,
            quality,
        }
    }

    #[test]
    fn empty_collector_summarizes_to_zeros() {
        let collector = MetricsCollector::new();
        let summary = collector.summary();
        assert_eq!(summary.total_runs, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert_eq!(summary.avg_tokens, 0.0);
        assert_eq!(summary.avg_quality, 0.0);
        assert!(summary.per_protocol.is_empty());
    }

    #[test]
    fn per_protocol_average_matches_recorded_latencies() {
        let collector = MetricsCollector::new();
        collector.record(Protocol::Raw, metrics(10, 100, 6.0));
        collector.record(Protocol::Raw, metrics(20, 200, 7.0));
        collector.record(Protocol::Raw, metrics(30, 300, 8.0));

        let summary = collector.summary();
        assert_eq!(summary.total_runs, 3);
        let raw = &summary.per_protocol["raw"];
        assert_eq!(raw.runs, 3);
        assert_eq!(raw.avg_latency_ms, 200.0);
        assert_eq!(raw.avg_tokens, 20.0);
        assert_eq!(raw.avg_quality, 7.0);
    }

    #[test]
    fn pooled_averages_cover_every_protocol() {
        let collector = MetricsCollector::new();
        collector.record(Protocol::Raw, metrics(100, 50, 8.0));
        collector.record(Protocol::Chain, metrics(300, 150, 6.0));

        let summary = collector.summary();
        assert_eq!(summary.total_runs, 2);
        assert_eq!(summary.avg_latency_ms, 100.0);
        assert_eq!(summary.avg_tokens, 200.0);
        assert_eq!(summary.avg_quality, 7.0);
        assert_eq!(summary.per_protocol.len(), 2);
    }

    #[test]
    fn history_filters_and_preserves_order() {
        let collector = MetricsCollector::new();
        collector.record(Protocol::Raw, metrics(1, 10, 5.0));
        collector.record(Protocol::Chain, metrics(2, 20, 5.0));
        collector.record(Protocol::Raw, metrics(3, 30, 5.0));

        let history = collector.history(Protocol::Raw);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].metrics.tokens, 1);
        assert_eq!(history[1].metrics.tokens, 3);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[test]
    fn capacity_evicts_oldest_records_first() {
        let collector = MetricsCollector::with_capacity(2);
        collector.record(Protocol::Raw, metrics(1, 10, 5.0));
        collector.record(Protocol::Raw, metrics(2, 20, 5.0));
        collector.record(Protocol::Raw, metrics(3, 30, 5.0));

        assert_eq!(collector.len(), 2);
        let history = collector.history(Protocol::Raw);
        assert_eq!(history[0].metrics.tokens, 2);
        assert_eq!(history[1].metrics.tokens, 3);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        use std::sync::Arc;

        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        collector.record(Protocol::Tree, metrics(1, 1, 5.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.summary().total_runs, 400);
    }
}
