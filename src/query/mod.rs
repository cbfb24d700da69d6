pub mod backend;
pub mod cache;
pub mod catalog;
pub mod connection;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod retry;

pub use backend::{PgBackend, QueryBackend};
pub use cache::{CacheStats, ResultCache};
pub use catalog::{QueryCatalog, SchemaAdapter};
pub use connection::{ConnectionPool, ConnectionPoolMetrics, PoolHealthStatus, PoolStats};
pub use error::{ErrorKind, ExecutionError, QueryError, RetryClass};
pub use executor::{PerformanceReport, QueryExecutor, QueryOutcome};
pub use metrics::{OverallStats, PerformanceMetrics, QueryMetrics};
pub use models::{NamedQuery, QueryFingerprint, ResultRow, RowExpectation, SubjectId};
pub use retry::{BackoffConfig, BackoffPolicy};
