pub mod bulk;
pub mod health;
pub mod models;
pub mod patterns;
pub mod report;
pub mod stats;

pub use bulk::{BulkAnalysisResult, BulkAnalyzer, QualityDistribution, QueryTally, SubjectRange};
pub use health::{AvailabilitySummary, HealthDashboard, HealthSummary, PerformanceSummary};
pub use models::{DiagnosticReport, QueryDiagnostic};
pub use patterns::{Pattern, PatternDetector, PatternSeverity, PatternType};
pub use report::DiagnosticReportBuilder;
pub use stats::TimingStats;
