//! Per-query performance metrics and their Prometheus export.

use anyhow::Result;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Running statistics for one query id. Entries live for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub min_execution_ms: Option<f64>,
    pub avg_execution_ms: f64,
    pub max_execution_ms: f64,
    pub timeout_count: u64,
    pub error_count: u64,
    pub last_executed: Option<DateTime<Utc>>,
}

impl PerformanceMetrics {
    fn record_duration(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.total_executions += 1;
        let n = self.total_executions as f64;
        self.avg_execution_ms += (ms - self.avg_execution_ms) / n;
        self.min_execution_ms = Some(self.min_execution_ms.map_or(ms, |m| m.min(ms)));
        self.max_execution_ms = self.max_execution_ms.max(ms);
        self.last_executed = Some(Utc::now());
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Totals across every query id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverallStats {
    pub total_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub timeout_count: u64,
    pub error_count: u64,
    pub avg_execution_ms: f64,
    pub queries_tracked: usize,
}

pub struct QueryMetrics {
    per_query: RwLock<HashMap<String, PerformanceMetrics>>,
    registry: Registry,
    executions: IntCounterVec,
    failures: IntCounterVec,
    cache_hits: IntCounterVec,
    duration: HistogramVec,
}

impl std::fmt::Debug for QueryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMetrics").finish_non_exhaustive()
    }
}

impl QueryMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let executions = IntCounterVec::new(
            Opts::new("query_executions_total", "Query attempts that reached the store"),
            &["query_id"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("query_failures_total", "Failed query attempts by error kind"),
            &["query_id", "kind"],
        )?;
        let cache_hits = IntCounterVec::new(
            Opts::new("query_cache_hits_total", "Queries answered from the result cache"),
            &["query_id"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("query_duration_seconds", "Duration of query attempts")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["query_id"],
        )?;

        registry.register(Box::new(executions.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            per_query: RwLock::new(HashMap::new()),
            registry,
            executions,
            failures,
            cache_hits,
            duration,
        })
    }

    pub async fn record_cache_hit(&self, query_id: &str) {
        self.cache_hits.with_label_values(&[query_id]).inc();
        let mut metrics = self.per_query.write().await;
        metrics.entry(query_id.to_string()).or_default().cache_hits += 1;
    }

    pub async fn record_cache_miss(&self, query_id: &str) {
        let mut metrics = self.per_query.write().await;
        metrics.entry(query_id.to_string()).or_default().cache_misses += 1;
    }

    pub async fn record_success(&self, query_id: &str, elapsed: Duration) {
        self.executions.with_label_values(&[query_id]).inc();
        self.duration
            .with_label_values(&[query_id])
            .observe(elapsed.as_secs_f64());
        let mut metrics = self.per_query.write().await;
        metrics
            .entry(query_id.to_string())
            .or_default()
            .record_duration(elapsed);
    }

    pub async fn record_timeout(&self, query_id: &str, elapsed: Duration) {
        self.executions.with_label_values(&[query_id]).inc();
        self.failures
            .with_label_values(&[query_id, "TimeoutError"])
            .inc();
        let mut metrics = self.per_query.write().await;
        let entry = metrics.entry(query_id.to_string()).or_default();
        entry.record_duration(elapsed);
        entry.timeout_count += 1;
    }

    pub async fn record_error(&self, query_id: &str, kind: &str, elapsed: Duration) {
        self.executions.with_label_values(&[query_id]).inc();
        self.failures.with_label_values(&[query_id, kind]).inc();
        let mut metrics = self.per_query.write().await;
        let entry = metrics.entry(query_id.to_string()).or_default();
        entry.record_duration(elapsed);
        entry.error_count += 1;
    }

    /// A result that came back but was refused. Its duration is already
    /// recorded as a success of the store round trip.
    pub async fn record_rejected(&self, query_id: &str, kind: &str) {
        self.failures.with_label_values(&[query_id, kind]).inc();
        let mut metrics = self.per_query.write().await;
        metrics.entry(query_id.to_string()).or_default().error_count += 1;
    }

    pub async fn get(&self, query_id: &str) -> Option<PerformanceMetrics> {
        self.per_query.read().await.get(query_id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, PerformanceMetrics> {
        self.per_query.read().await.clone()
    }

    pub async fn overall(&self) -> OverallStats {
        let metrics = self.per_query.read().await;
        let mut overall = OverallStats {
            queries_tracked: metrics.len(),
            ..Default::default()
        };
        let mut weighted_ms = 0.0;
        for m in metrics.values() {
            overall.total_executions += m.total_executions;
            overall.cache_hits += m.cache_hits;
            overall.cache_misses += m.cache_misses;
            overall.timeout_count += m.timeout_count;
            overall.error_count += m.error_count;
            weighted_ms += m.avg_execution_ms * m.total_executions as f64;
        }
        if overall.total_executions > 0 {
            overall.avg_execution_ms = weighted_ms / overall.total_executions as f64;
        }
        let lookups = overall.cache_hits + overall.cache_misses;
        if lookups > 0 {
            overall.cache_hit_ratio = overall.cache_hits as f64 / lookups as f64;
        }
        overall
    }

    /// Prometheus text exposition of the registered collectors.
    pub fn render_prometheus(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
