pub mod config;
pub mod diagnostics;
pub mod query;
pub mod validation;

pub use config::Config;

// Re-export the execution layer for convenience
pub use query::{
    ConnectionPool, ErrorKind, ExecutionError, NamedQuery, PerformanceReport, PgBackend,
    QueryBackend, QueryCatalog, QueryError, QueryExecutor, QueryOutcome, ResultRow,
    SchemaAdapter, SubjectId,
};

// Re-export validation types
pub use validation::{DataPresence, QueryKind, ResultValidator, ScoringConstants, ValidationResult};

// Re-export diagnostics types
pub use diagnostics::{
    BulkAnalysisResult, BulkAnalyzer, DiagnosticReport, DiagnosticReportBuilder, HealthDashboard,
    HealthSummary, Pattern, PatternDetector, PatternSeverity, PatternType, QueryDiagnostic,
};
