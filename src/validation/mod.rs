//! Rule-based validation and quality scoring of query result sets.

pub mod result;
pub mod rules;
pub mod scoring;
pub mod validator;

pub use result::{DataPresence, IssueKind, Severity, ValidationIssue, ValidationResult};
pub use rules::QueryKind;
pub use scoring::ScoringConstants;
pub use validator::ResultValidator;
