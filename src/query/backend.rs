use super::connection::{ConnectionPool, ConnectionPoolMetrics};
use super::error::{QueryError, Result};
use super::models::ResultRow;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Executes one opaque query for one subject against the backing store.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn fetch_rows(&self, query_text: &str, subject_id: i64) -> Result<Vec<ResultRow>>;

    fn pool_metrics(&self) -> Option<ConnectionPoolMetrics> {
        None
    }

    async fn close(&self) {}
}

/// PostgreSQL backend. Each call checks out its own connection and hands it
/// back to the pool when the call returns.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: Arc<ConnectionPool>,
}

impl PgBackend {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Wrap the opaque query so every record comes back as one JSON object.
    fn wrap(query_text: &str) -> String {
        let inner = query_text.trim().trim_end_matches(';');
        format!("SELECT row_to_json(q)::jsonb AS record FROM ({inner}) AS q")
    }
}

#[async_trait]
impl QueryBackend for PgBackend {
    async fn fetch_rows(&self, query_text: &str, subject_id: i64) -> Result<Vec<ResultRow>> {
        let mut conn = self.pool.acquire().await?;
        let sql = Self::wrap(query_text);

        let values: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(subject_id)
            .fetch_all(&mut *conn)
            .await?;

        debug!(subject_id, rows = values.len(), "Fetched result set");

        values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => Ok(map),
                other => Err(QueryError::unexpected(format!(
                    "expected a JSON record, got {other}"
                ))),
            })
            .collect()
    }

    fn pool_metrics(&self) -> Option<ConnectionPoolMetrics> {
        Some(self.pool.get_metrics())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_strips_trailing_semicolon() {
        let sql = PgBackend::wrap("SELECT a, b FROM t WHERE subject_id = $1;\n");
        assert_eq!(
            sql,
            "SELECT row_to_json(q)::jsonb AS record FROM (SELECT a, b FROM t WHERE subject_id = $1) AS q"
        );
    }
}
