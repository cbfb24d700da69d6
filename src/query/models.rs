use super::error::QueryError;
use crate::validation::QueryKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// One flat record of a result set. Keys are unique per record.
pub type ResultRow = serde_json::Map<String, serde_json::Value>;

/// Positive integer identifying the subject whose results are diagnosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct SubjectId(i64);

impl SubjectId {
    pub fn new(id: i64) -> Result<Self, QueryError> {
        if id <= 0 {
            return Err(QueryError::validation(format!(
                "subject id must be a positive integer, got {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for SubjectId {
    type Error = QueryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for i64 {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl FromStr for SubjectId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().parse::<i64>().map_err(|_| {
            QueryError::validation(format!("subject id must be a positive integer, got '{s}'"))
        })?;
        Self::new(id)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic cache key derived from query id, subject id and query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    query_id: String,
    subject_id: i64,
    digest: String,
}

impl QueryFingerprint {
    pub fn new(query_id: &str, subject_id: i64, query_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(query_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(subject_id.to_be_bytes());
        hasher.update([0u8]);
        hasher.update(query_text.as_bytes());
        Self {
            query_id: query_id.to_string(),
            subject_id,
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.query_id, self.subject_id, &self.digest[..12])
    }
}

/// Expected shape of a result set's row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowExpectation {
    Exact { count: usize },
    AtLeast { min: usize },
    Between { min: usize, max: usize },
    Any,
}

impl RowExpectation {
    pub fn accepts(&self, rows: usize) -> bool {
        match *self {
            RowExpectation::Exact { count } => rows == count,
            RowExpectation::AtLeast { min } => rows >= min,
            RowExpectation::Between { min, max } => rows >= min && rows <= max,
            RowExpectation::Any => true,
        }
    }

    pub fn describe(&self) -> String {
        match *self {
            RowExpectation::Exact { count } => format!("exactly {count}"),
            RowExpectation::AtLeast { min } => format!("at least {min}"),
            RowExpectation::Between { min, max } => format!("between {min} and {max}"),
            RowExpectation::Any => "any number of".to_string(),
        }
    }
}

/// A named query supplied by the schema adapter. The text is opaque to the
/// executor and binds the subject id as `$1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedQuery {
    pub id: String,
    pub kind: QueryKind,
    pub text: String,
    pub expected_rows: RowExpectation,
    #[serde(default)]
    pub priority: bool,
}

impl NamedQuery {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let kind = QueryKind::from_query_id(&id);
        let expected_rows = kind.default_row_expectation();
        let priority = kind.is_priority();
        Self {
            id,
            kind,
            text: text.into(),
            expected_rows,
            priority,
        }
    }

    pub fn with_expected_rows(mut self, expected_rows: RowExpectation) -> Self {
        self.expected_rows = expected_rows;
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn fingerprint(&self, subject_id: i64) -> QueryFingerprint {
        QueryFingerprint::new(&self.id, subject_id, &self.text)
    }
}
