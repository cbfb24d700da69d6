use crate::config::PoolConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::time::Duration;
use tracing::info;

/// Bounded pool of PostgreSQL connections. The only component that opens or
/// closes raw connections.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: PgPool,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Connect eagerly and verify the store answers.
    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = Self::options(&config)
            .connect(&Self::tuned_url(database_url, &config))
            .await?;

        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        info!(
            pool_size = config.pool_size,
            max_overflow = config.max_overflow,
            "Connected to PostgreSQL with {} max connections",
            config.max_connections()
        );

        Ok(Self { pool, config })
    }

    /// Build the pool without opening any connection until first use.
    pub fn connect_lazy(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = Self::options(&config).connect_lazy(&Self::tuned_url(database_url, &config))?;
        Ok(Self { pool, config })
    }

    fn options(config: &PoolConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_seconds)))
            .max_lifetime(Some(Duration::from_secs(config.recycle_seconds)))
            .test_before_acquire(config.pre_ping)
    }

    /// Append statement timeout and keepalive settings to the connection URL.
    pub fn tuned_url(database_url: &str, config: &PoolConfig) -> String {
        let mut url = database_url.to_string();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&format!(
            "options=-c%20statement_timeout%3D{}s&tcp_keepalives_idle=60&tcp_keepalives_interval=30&tcp_keepalives_count=3",
            config.statement_timeout_seconds
        ));
        url
    }

    /// Check out a validated connection, waiting at most `pool_timeout`.
    pub async fn acquire(&self) -> std::result::Result<PoolConnection<Postgres>, sqlx::Error> {
        self.pool.acquire().await
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub async fn check_health(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    pub fn get_pool_stats(&self) -> PoolStats {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            size,
            idle,
            pool_size: self.config.pool_size,
            max_overflow: self.config.max_overflow,
            checked_out: size.saturating_sub(idle),
        }
    }

    /// Log and classify current utilization.
    pub fn monitor_pool_health(&self) -> PoolHealthStatus {
        let stats = self.get_pool_stats();
        let utilization = stats.utilization_percentage();

        let status = stats.health();
        match status {
            PoolHealthStatus::Critical => tracing::error!(
                "CRITICAL: Connection pool utilization at {:.1}% ({}/{} connections checked out)",
                utilization,
                stats.checked_out,
                stats.pool_size
            ),
            PoolHealthStatus::Warning => tracing::warn!(
                "WARNING: Connection pool utilization at {:.1}% ({}/{} connections checked out)",
                utilization,
                stats.checked_out,
                stats.pool_size
            ),
            PoolHealthStatus::Healthy => tracing::debug!(
                "Connection pool healthy: {:.1}% utilization ({}/{} connections checked out)",
                utilization,
                stats.checked_out,
                stats.pool_size
            ),
        }
        status
    }

    pub fn get_metrics(&self) -> ConnectionPoolMetrics {
        self.get_pool_stats().into()
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Connection pool closed");
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub checked_out: u32,
}

impl PoolStats {
    /// Connections opened beyond the steady-state pool size.
    pub fn overflow(&self) -> u32 {
        self.size.saturating_sub(self.pool_size)
    }

    pub fn utilization(&self) -> f64 {
        if self.pool_size == 0 {
            return 0.0;
        }
        self.checked_out as f64 / self.pool_size as f64
    }

    pub fn utilization_percentage(&self) -> f64 {
        self.utilization() * 100.0
    }

    pub fn is_saturated(&self, threshold: f64) -> bool {
        self.utilization_percentage() >= threshold
    }

    pub fn health(&self) -> PoolHealthStatus {
        if self.is_saturated(90.0) {
            PoolHealthStatus::Critical
        } else if self.is_saturated(70.0) {
            PoolHealthStatus::Warning
        } else {
            PoolHealthStatus::Healthy
        }
    }

    pub fn health_status(&self) -> String {
        let utilization = self.utilization_percentage();
        match self.health() {
            PoolHealthStatus::Critical => "CRITICAL: Pool >90% utilized".to_string(),
            PoolHealthStatus::Warning => "WARNING: Pool >70% utilized".to_string(),
            PoolHealthStatus::Healthy => format!("HEALTHY: Pool {utilization:.1}% utilized"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolHealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Read-only snapshot of pool utilization, recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPoolMetrics {
    pub pool_size: u32,
    pub checked_out: u32,
    pub idle: u32,
    pub overflow: u32,
    pub utilization: f64,
    pub health_status: String,
}

impl From<PoolStats> for ConnectionPoolMetrics {
    fn from(stats: PoolStats) -> Self {
        Self {
            pool_size: stats.pool_size,
            checked_out: stats.checked_out,
            idle: stats.idle,
            overflow: stats.overflow(),
            utilization: stats.utilization(),
            health_status: stats.health_status(),
        }
    }
}
