use async_trait::async_trait;
use sqlx::Row;

use supplyq_core::schema::{ColumnInfo, SchemaSource, SchemaSourceError};

use crate::DbPool;

/// Reads column metadata from `information_schema` for the current schema.
pub struct PgSchemaSource {
    pool: DbPool,
}

impl PgSchemaSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn columns(&self, tables: &[String]) -> Result<Vec<ColumnInfo>, SchemaSourceError> {
        let lowered = tables.iter().map(|table| table.to_ascii_lowercase()).collect::<Vec<_>>();

        let rows = sqlx::query(
            "SELECT table_name::text AS table_name,
                    column_name::text AS column_name,
                    data_type::text AS data_type
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = ANY($1)
             ORDER BY table_name, ordinal_position",
        )
        .bind(&lowered)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| SchemaSourceError::Unreachable(error.to_string()))?;

        rows.iter()
            .map(|row| {
                let table: String = row
                    .try_get("table_name")
                    .map_err(|e| SchemaSourceError::Unreachable(e.to_string()))?;
                let name: String = row
                    .try_get("column_name")
                    .map_err(|e| SchemaSourceError::Unreachable(e.to_string()))?;
                let data_type: String = row
                    .try_get("data_type")
                    .map_err(|e| SchemaSourceError::Unreachable(e.to_string()))?;
                Ok(ColumnInfo::new(table, name, data_type))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use supplyq_core::schema::SchemaSource;

    use super::PgSchemaSource;
    use crate::connect_lazy_with_settings;
    use crate::migrations::run_pending;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn unreachable_store_is_reported() {
        let pool = connect_lazy_with_settings("postgres://nobody@127.0.0.1:1/supplyq", 1, 1)
            .expect("lazy pool");
        let source = PgSchemaSource::new(pool);
        assert!(source.columns(&["supply_chain".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn live_catalog_lists_columns_in_ordinal_order() {
        let Some(pool) = test_pool().await else {
            return;
        };
        run_pending(&pool).await.expect("run migrations");
        let source = PgSchemaSource::new(pool);

        let columns = source.columns(&["AUDIT_LOG".to_string()]).await.expect("catalog read");
        let names = columns.iter().map(|column| column.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names.first(), Some(&"record_id"));
        assert_eq!(names.last(), Some(&"occurred_at"));
        assert!(columns.iter().all(|column| column.table == "audit_log"));
    }
}
