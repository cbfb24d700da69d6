//! Shared test infrastructure: a scripted in-memory query backend and
//! builders for executors and diagnostic pipelines wired to it.

#![allow(dead_code)]

use async_trait::async_trait;
use query_diagnostics::config::{BulkConfig, CacheConfig, DiagnosticsConfig, ExecutorConfig};
use query_diagnostics::diagnostics::{BulkAnalyzer, DiagnosticReportBuilder};
use query_diagnostics::query::{
    NamedQuery, QueryBackend, QueryCatalog, QueryError, QueryExecutor, ResultRow,
};
use query_diagnostics::validation::ResultValidator;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SUMMARY: &str = "image_preference_summary";
pub const CATEGORIES: &str = "category_preferences";
pub const TIMELINE: &str = "preference_timeline";

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Step {
    Rows(Vec<ResultRow>),
    Fail(QueryError),
    /// Never completes; only a deadline ends it.
    Hang,
}

type Responder = dyn Fn(&str, i64) -> Step + Send + Sync;

/// In-memory backend. Queued steps for a query text are consumed first;
/// afterwards the responder decides. Query text doubles as the query id in
/// catalogs built by `test_catalog`.
pub struct ScriptedBackend {
    queued: Mutex<HashMap<String, VecDeque<Step>>>,
    responder: Box<Responder>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<HashMap<String, Duration>>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, i64) -> Step + Send + Sync + 'static,
    {
        Self {
            queued: Mutex::new(HashMap::new()),
            responder: Box::new(responder),
            calls: Mutex::new(HashMap::new()),
            latency: Mutex::new(HashMap::new()),
        }
    }

    /// Every query answers with healthy canonical data.
    pub fn healthy() -> Self {
        Self::new(|text, _| healthy_step(text))
    }

    pub fn push(&self, query_text: &str, step: Step) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(query_text.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn set_latency(&self, query_text: &str, latency: Duration) {
        self.latency
            .lock()
            .unwrap()
            .insert(query_text.to_string(), latency);
    }

    pub fn calls(&self, query_text: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(query_text)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn fetch_rows(
        &self,
        query_text: &str,
        subject_id: i64,
    ) -> Result<Vec<ResultRow>, QueryError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(query_text.to_string())
            .or_insert(0) += 1;

        let latency = self.latency.lock().unwrap().get(query_text).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(query_text)
            .and_then(|steps| steps.pop_front());
        let step = queued.unwrap_or_else(|| (self.responder)(query_text, subject_id));

        match step {
            Step::Rows(rows) => Ok(rows),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn row(value: Value) -> ResultRow {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn summary_rows(total: i64, responses: i64, rate: f64) -> Vec<ResultRow> {
    vec![row(json!({
        "total_image_count": total,
        "response_count": responses,
        "response_rate": rate,
    }))]
}

pub fn category_rows() -> Vec<ResultRow> {
    vec![
        row(json!({"category": "landscape", "selection_count": 6, "total_count": 10, "preference_rate": 60.0})),
        row(json!({"category": "portrait", "selection_count": 2, "total_count": 8, "preference_rate": 25.0})),
    ]
}

pub fn timeline_rows() -> Vec<ResultRow> {
    vec![
        row(json!({"period": "2024-01-01", "response_count": 12})),
        row(json!({"period": "2024-01-08", "response_count": 9})),
    ]
}

pub fn healthy_step(query_text: &str) -> Step {
    match query_text {
        SUMMARY => Step::Rows(summary_rows(100, 85, 85.0)),
        CATEGORIES => Step::Rows(category_rows()),
        TIMELINE => Step::Rows(timeline_rows()),
        _ => Step::Rows(vec![row(json!({"value": 1}))]),
    }
}

/// The three canonical queries, each using its id as query text.
pub fn test_catalog() -> QueryCatalog {
    QueryCatalog::new(vec![
        NamedQuery::new(SUMMARY, SUMMARY),
        NamedQuery::new(CATEGORIES, CATEGORIES),
        NamedQuery::new(TIMELINE, TIMELINE),
    ])
    .unwrap()
}

/// Short backoff and timeouts so paused-clock tests stay readable.
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        query_timeout_seconds: 2,
        timeout_buffer_seconds: 5,
        max_retries: 3,
        priority_extra_attempts: 2,
        backoff_base_ms: 10,
        max_backoff_ms: 200,
        max_concurrent_queries: 20,
    }
}

pub fn cache_config(enabled: bool) -> CacheConfig {
    CacheConfig {
        enabled,
        ..CacheConfig::default()
    }
}

pub fn executor_with(
    backend: Arc<ScriptedBackend>,
    config: ExecutorConfig,
    cache_enabled: bool,
) -> Arc<QueryExecutor> {
    Arc::new(
        QueryExecutor::new(
            backend,
            config,
            cache_config(cache_enabled),
            ResultValidator::default(),
        )
        .unwrap(),
    )
}

pub fn report_builder(backend: Arc<ScriptedBackend>, cache_enabled: bool) -> DiagnosticReportBuilder {
    DiagnosticReportBuilder::new(
        executor_with(backend, fast_executor_config(), cache_enabled),
        Arc::new(test_catalog()),
        DiagnosticsConfig::default(),
    )
}

pub fn bulk_analyzer(backend: Arc<ScriptedBackend>, bulk: BulkConfig) -> BulkAnalyzer {
    BulkAnalyzer::new(report_builder(backend, false), bulk)
}
