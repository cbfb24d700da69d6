//! Cached, bounded, deadline-enforced query execution with typed retries.

use super::backend::QueryBackend;
use super::cache::{CacheStats, ResultCache};
use super::connection::ConnectionPoolMetrics;
use super::error::{ExecutionError, QueryError, RetryClass};
use super::metrics::{OverallStats, PerformanceMetrics, QueryMetrics};
use super::models::{NamedQuery, ResultRow, SubjectId};
use super::retry::BackoffPolicy;
use crate::config::{CacheConfig, ExecutorConfig};
use crate::validation::{ResultValidator, ValidationResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Successful result of one `execute` call.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub rows: Vec<ResultRow>,
    /// `None` when the rows came from the cache; cached results are trusted.
    pub validation: Option<ValidationResult>,
    pub from_cache: bool,
    pub attempts: u32,
    pub execution_time: Duration,
}

/// Snapshot for operational inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub overall_stats: OverallStats,
    pub per_query_metrics: HashMap<String, PerformanceMetrics>,
    pub pool_metrics: Option<ConnectionPoolMetrics>,
    pub cache_stats: CacheStats,
}

/// Process-wide execution handle. Construct once and share via `Arc`.
pub struct QueryExecutor {
    backend: Arc<dyn QueryBackend>,
    cache: ResultCache,
    metrics: QueryMetrics,
    validator: ResultValidator,
    backoff: BackoffPolicy,
    workers: Arc<Semaphore>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryExecutor {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        config: ExecutorConfig,
        cache_config: CacheConfig,
        validator: ResultValidator,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            cache: ResultCache::new(cache_config),
            metrics: QueryMetrics::new()?,
            validator,
            backoff: BackoffPolicy::new(config.backoff_config()),
            workers: Arc::new(Semaphore::new(config.max_concurrent_queries)),
            config,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    pub fn validator(&self) -> &ResultValidator {
        &self.validator
    }

    /// Total attempts allowed for `query` with `max_retries` retries.
    pub fn attempt_budget(&self, query: &NamedQuery, max_retries: u32) -> u32 {
        let extra = if query.priority {
            self.config.priority_extra_attempts
        } else {
            0
        };
        max_retries.saturating_add(1).saturating_add(extra)
    }

    /// Run an ad hoc query given as id and text, returning only the rows.
    pub async fn execute(
        &self,
        query_id: &str,
        subject_id: i64,
        query_text: &str,
        max_retries: u32,
    ) -> std::result::Result<Vec<ResultRow>, ExecutionError> {
        let query = NamedQuery::new(query_id, query_text);
        self.execute_with_retries(&query, subject_id, max_retries)
            .await
            .map(|outcome| outcome.rows)
    }

    /// Run a named query with the configured retry count.
    pub async fn execute_query(
        &self,
        query: &NamedQuery,
        subject_id: i64,
    ) -> std::result::Result<QueryOutcome, ExecutionError> {
        self.execute_with_retries(query, subject_id, self.config.max_retries)
            .await
    }

    pub async fn execute_with_retries(
        &self,
        query: &NamedQuery,
        subject_id: i64,
        max_retries: u32,
    ) -> std::result::Result<QueryOutcome, ExecutionError> {
        let fail = |attempts: u32, error: QueryError| ExecutionError {
            query_id: query.id.clone(),
            subject_id,
            attempts,
            error,
        };

        if let Err(e) = SubjectId::new(subject_id) {
            warn!(subject_id, query_id = %query.id, "Rejected invalid subject id");
            return Err(fail(0, e));
        }

        let fingerprint = query.fingerprint(subject_id);
        if self.cache.is_enabled() {
            if let Some(rows) = self.cache.get(&fingerprint).await {
                self.metrics.record_cache_hit(&query.id).await;
                debug!(subject_id, query_id = %query.id, rows = rows.len(), "Cache hit");
                return Ok(QueryOutcome {
                    rows,
                    validation: None,
                    from_cache: true,
                    attempts: 0,
                    execution_time: Duration::ZERO,
                });
            }
            self.metrics.record_cache_miss(&query.id).await;
        }

        let budget = self.attempt_budget(query, max_retries);
        let run_started = Instant::now();
        let mut attempt: u32 = 0;
        let mut connection_retries = 0u32;
        let mut timeout_retries = 0u32;
        let mut unexpected_retries = 0u32;

        loop {
            let started = Instant::now();
            let result = self.run_attempt(query, subject_id).await;
            let elapsed = started.elapsed();
            attempt += 1;

            let error = match result {
                Ok(rows) => {
                    self.metrics.record_success(&query.id, elapsed).await;
                    let validation = self.validator.validate(query, &rows);

                    if validation.error_count > 0 {
                        self.metrics
                            .record_rejected(&query.id, "DataQualityError")
                            .await;
                        error!(
                            subject_id,
                            query_id = %query.id,
                            attempts = attempt,
                            elapsed_ms = run_started.elapsed().as_millis() as u64,
                            errors = validation.error_count,
                            "Query result failed validation: {}",
                            validation.summary()
                        );
                        return Err(fail(
                            attempt,
                            QueryError::DataQuality {
                                query_id: query.id.clone(),
                                validation: Box::new(validation),
                            },
                        ));
                    }

                    self.cache.put(fingerprint, rows.clone(), elapsed).await;
                    info!(
                        subject_id,
                        query_id = %query.id,
                        attempts = attempt,
                        rows = rows.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        quality_score = validation.quality_score,
                        "Query succeeded"
                    );
                    return Ok(QueryOutcome {
                        rows,
                        validation: Some(validation),
                        from_cache: false,
                        attempts: attempt,
                        execution_time: elapsed,
                    });
                }
                Err(error) => error,
            };

            match &error {
                QueryError::Timeout { .. } => {
                    self.metrics.record_timeout(&query.id, elapsed).await
                }
                other => {
                    self.metrics
                        .record_error(&query.id, other.kind().as_str(), elapsed)
                        .await
                }
            }

            let class = error.retry_class();
            let delay = match self.backoff.delay_for(class, attempt - 1) {
                Some(delay) if attempt < budget => delay,
                _ => {
                    error!(
                        subject_id,
                        query_id = %query.id,
                        attempts = attempt,
                        connection_retries,
                        timeout_retries,
                        unexpected_retries,
                        elapsed_ms = run_started.elapsed().as_millis() as u64,
                        "Query failed: {}",
                        error
                    );
                    return Err(fail(attempt, error));
                }
            };

            match (class, &error) {
                (_, QueryError::Timeout { .. }) => timeout_retries += 1,
                (RetryClass::LinearBackoff, _) => unexpected_retries += 1,
                _ => connection_retries += 1,
            }
            warn!(
                subject_id,
                query_id = %query.id,
                attempt,
                budget,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying: {}",
                error
            );
            sleep(delay).await;
        }
    }

    /// One bounded attempt: wait for a worker slot and run the query, all
    /// inside the per-attempt deadline.
    async fn run_attempt(
        &self,
        query: &NamedQuery,
        subject_id: i64,
    ) -> std::result::Result<Vec<ResultRow>, QueryError> {
        let deadline = self.config.attempt_timeout();
        let attempt = async {
            let _permit = self
                .workers
                .acquire()
                .await
                .map_err(|_| QueryError::connection("query worker pool is closed"))?;
            self.backend.fetch_rows(&query.text, subject_id).await
        };

        match timeout(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::timeout(
                deadline,
                format!("attempt for {} exceeded {:?}", query.id, deadline),
            )),
        }
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            generated_at: Utc::now(),
            overall_stats: self.metrics.overall().await,
            per_query_metrics: self.metrics.snapshot().await,
            pool_metrics: self.backend.pool_metrics(),
            cache_stats: self.cache.stats().await,
        }
    }

    /// Stop accepting work, drop cached results and release the backend.
    pub async fn close(&self) {
        self.workers.close();
        self.cache.clear().await;
        self.backend.close().await;
        info!("Query executor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    struct FlakyBackend {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl QueryBackend for FlakyBackend {
        async fn fetch_rows(
            &self,
            _query_text: &str,
            _subject_id: i64,
        ) -> Result<Vec<ResultRow>, QueryError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(QueryError::connection("connection refused"));
            }
            let mut row = ResultRow::new();
            row.insert("period".to_string(), "2024-01-01".into());
            row.insert("response_count".to_string(), 3.into());
            Ok(vec![row])
        }
    }

    fn executor(failures: u32) -> QueryExecutor {
        let config = ExecutorConfig {
            backoff_base_ms: 1,
            max_backoff_ms: 10,
            ..ExecutorConfig::default()
        };
        QueryExecutor::new(
            Arc::new(FlakyBackend {
                failures_left: AtomicU32::new(failures),
            }),
            config,
            CacheConfig::default(),
            ResultValidator::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_attempt_budget() {
        let executor = executor(0);
        let plain = NamedQuery::new("preference_timeline", "SELECT 1");
        let priority = NamedQuery::new("image_preference_summary", "SELECT 1");
        assert_eq!(executor.attempt_budget(&plain, 3), 4);
        assert_eq!(executor.attempt_budget(&priority, 3), 6);
        assert_eq!(executor.attempt_budget(&plain, 0), 1);
        assert_eq!(executor.attempt_budget(&plain, u32::MAX), u32::MAX);
        assert_eq!(executor.attempt_budget(&priority, u32::MAX - 1), u32::MAX);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_terminal_failure_is_logged() {
        let executor = executor(10);
        let query = NamedQuery::new("preference_timeline", "SELECT 1");
        let err = executor
            .execute_with_retries(&query, 5, 1)
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(logs_contain("Attempt failed, retrying"));
        assert!(logs_contain("Query failed"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_success_is_logged_and_cached() {
        let executor = executor(1);
        let query = NamedQuery::new("preference_timeline", "SELECT 1");
        let outcome = executor.execute_query(&query, 5).await.unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(logs_contain("Query succeeded"));
        assert_eq!(executor.cache().len().await, 1);
    }
}
