use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::caller::Role;
use crate::errors::QueryError;
use crate::policy::AccessPolicy;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self { table: table.into(), name: name.into(), data_type: data_type.into() }
    }
}

#[derive(Debug, Error)]
pub enum SchemaSourceError {
    #[error("schema source unreachable: {0}")]
    Unreachable(String),
}

/// Live catalog of the data store.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Columns of the named tables, in the store's ordinal order.
    async fn columns(&self, tables: &[String]) -> Result<Vec<ColumnInfo>, SchemaSourceError>;
}

/// Fixed catalog, used by tests and dry-run tooling.
#[derive(Clone, Debug, Default)]
pub struct StaticSchemaSource {
    columns: Vec<ColumnInfo>,
}

impl StaticSchemaSource {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn columns(&self, tables: &[String]) -> Result<Vec<ColumnInfo>, SchemaSourceError> {
        Ok(self
            .columns
            .iter()
            .filter(|column| tables.iter().any(|table| table.eq_ignore_ascii_case(&column.table)))
            .cloned()
            .collect())
    }
}

/// Schema rendering handed to the language model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaText(String);

impl SchemaText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SchemaText {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SchemaText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct SchemaProjector {
    policy: Arc<AccessPolicy>,
    source: Arc<dyn SchemaSource>,
}

impl SchemaProjector {
    pub fn new(policy: Arc<AccessPolicy>, source: Arc<dyn SchemaSource>) -> Self {
        Self { policy, source }
    }

    /// Renders only the tables and columns `role` may see.
    ///
    /// Tables come out in lexicographic order. Columns follow the policy's declared
    /// order, or the store's ordinal order when the role may see every column, so the
    /// same role over an unchanged store always yields the same text.
    pub async fn project(&self, role: &Role) -> Result<SchemaText, QueryError> {
        let entry = self.policy.entry(role)?;
        let tables = entry.allowed_tables.iter().cloned().collect::<Vec<_>>();

        let columns = self
            .source
            .columns(&tables)
            .await
            .map_err(|error| QueryError::SchemaUnavailable(error.to_string()))?;

        let mut by_table: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();
        for column in columns {
            if entry.allows_table(&column.table) && entry.allows_column(&column.name) {
                by_table.entry(column.table.to_ascii_lowercase()).or_default().push(column);
            }
        }

        let mut sections = Vec::new();
        for (table, mut visible) in by_table {
            if !entry.allows_all_columns() {
                visible.sort_by_key(|column| {
                    declared_position(&entry.allowed_columns, &column.name)
                });
            }
            let mut lines = vec![format!("Table: {table}"), "Columns:".to_string()];
            lines.extend(
                visible.iter().map(|column| format!("  {}: {}", column.name, column.data_type)),
            );
            sections.push(lines.join("\n"));
        }

        if sections.is_empty() {
            return Err(QueryError::SchemaUnavailable(format!(
                "no visible columns found for role `{role}`"
            )));
        }

        Ok(SchemaText(sections.join("\n\n")))
    }
}

fn declared_position(declared: &[String], column: &str) -> usize {
    declared
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(column))
        .unwrap_or(declared.len())
}
