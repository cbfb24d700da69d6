//! Named queries supplied by the schema adapter.

use super::models::{NamedQuery, RowExpectation};
use crate::validation::QueryKind;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

pub trait SchemaAdapter: Send + Sync {
    /// Every query run by a diagnostic pass, in report order.
    fn queries(&self) -> Vec<NamedQuery>;

    fn query(&self, id: &str) -> Option<NamedQuery> {
        self.queries().into_iter().find(|q| q.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    queries: Vec<QueryDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueryDefinition {
    id: String,
    text: String,
    kind: Option<String>,
    expected_rows: Option<RowExpectation>,
    priority: Option<bool>,
}

impl QueryDefinition {
    fn into_named_query(self) -> NamedQuery {
        let kind = self
            .kind
            .as_deref()
            .map(QueryKind::from_query_id)
            .unwrap_or_else(|| QueryKind::from_query_id(&self.id));
        let expected_rows = self
            .expected_rows
            .unwrap_or_else(|| kind.default_row_expectation());
        let priority = self.priority.unwrap_or_else(|| kind.is_priority());
        NamedQuery {
            id: self.id,
            kind,
            text: self.text,
            expected_rows,
            priority,
        }
    }
}

/// In-memory catalog of named queries.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    queries: Vec<NamedQuery>,
}

impl QueryCatalog {
    pub fn new(queries: Vec<NamedQuery>) -> Result<Self> {
        let mut seen = HashSet::new();
        for query in &queries {
            if query.id.trim().is_empty() {
                return Err(anyhow!("query id must not be empty"));
            }
            if query.text.trim().is_empty() {
                return Err(anyhow!("query '{}' has empty text", query.id));
            }
            if !seen.insert(query.id.clone()) {
                return Err(anyhow!("duplicate query id '{}'", query.id));
            }
        }
        Ok(Self { queries })
    }

    /// Load a catalog from a TOML file of `[[queries]]` tables.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read query catalog: {}", path.as_ref().display())
        })?;
        let catalog = Self::from_toml_str(&content).with_context(|| {
            format!("Failed to parse query catalog: {}", path.as_ref().display())
        })?;
        info!(
            queries = catalog.queries.len(),
            "Loaded query catalog from: {}",
            path.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::new(
            file.queries
                .into_iter()
                .map(QueryDefinition::into_named_query)
                .collect(),
        )
    }

    /// The three canonical preference queries.
    pub fn builtin() -> Self {
        Self {
            queries: vec![
                NamedQuery::new(
                    "image_preference_summary",
                    "SELECT COUNT(i.id) AS total_image_count, \
                     COUNT(r.id) AS response_count, \
                     ROUND(100.0 * COUNT(r.id) / NULLIF(COUNT(i.id), 0), 2) AS response_rate \
                     FROM subject_images i \
                     LEFT JOIN preference_responses r \
                       ON r.image_id = i.id AND r.subject_id = i.subject_id \
                     WHERE i.subject_id = $1",
                ),
                NamedQuery::new(
                    "category_preferences",
                    "SELECT c.name AS category, \
                     COUNT(r.id) FILTER (WHERE r.selected) AS selection_count, \
                     COUNT(r.id) AS total_count, \
                     ROUND(100.0 * COUNT(r.id) FILTER (WHERE r.selected) / NULLIF(COUNT(r.id), 0), 2) \
                       AS preference_rate \
                     FROM preference_responses r \
                     JOIN image_categories c ON c.image_id = r.image_id \
                     WHERE r.subject_id = $1 \
                     GROUP BY c.name \
                     ORDER BY c.name",
                ),
                NamedQuery::new(
                    "preference_timeline",
                    "SELECT date_trunc('week', r.responded_at)::date AS period, \
                     COUNT(*) AS response_count \
                     FROM preference_responses r \
                     WHERE r.subject_id = $1 \
                     GROUP BY 1 \
                     ORDER BY 1",
                ),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl SchemaAdapter for QueryCatalog {
    fn queries(&self) -> Vec<NamedQuery> {
        self.queries.clone()
    }

    fn query(&self, id: &str) -> Option<NamedQuery> {
        self.queries.iter().find(|q| q.id == id).cloned()
    }
}
