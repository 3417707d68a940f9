use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use supplyq_core::audit::{AuditError, AuditRecord, AuditSink};
use supplyq_core::domain::tool::ToolIntent;
use supplyq_core::errors::ErrorKind;

use super::RepositoryError;
use crate::DbPool;

/// Append-only audit trail backed by the `audit_log` table.
pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, record: &AuditRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO audit_log (record_id, user_id, role, region, tool, query_text,
                                    success, error_kind, error_message, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&record.record_id)
        .bind(&record.user_id)
        .bind(&record.role)
        .bind(&record.region)
        .bind(record.tool.as_str())
        .bind(&record.query_text)
        .bind(record.success)
        .bind(record.error_kind.map(|kind| kind.as_str()))
        .bind(&record.error_message)
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record_id, user_id, role, region, tool, query_text,
                    success, error_kind, error_message, occurred_at
             FROM audit_log ORDER BY occurred_at DESC LIMIT $1",
        )
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<AuditRecord, RepositoryError> {
    let tool: String = row.try_get("tool").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let error_kind: Option<String> =
        row.try_get("error_kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at: DateTime<Utc> =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let tool = ToolIntent::parse(&tool)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown tool `{tool}`")))?;
    let error_kind = error_kind
        .map(|raw| {
            serde_json::from_value::<ErrorKind>(serde_json::Value::String(raw.clone()))
                .map_err(|_| RepositoryError::Decode(format!("unknown error kind `{raw}`")))
        })
        .transpose()?;

    Ok(AuditRecord {
        record_id: row.try_get("record_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        user_id: row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        role: row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        region: row.try_get("region").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        tool,
        query_text: row
            .try_get("query_text")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        success: row.try_get("success").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        error_kind,
        error_message: row
            .try_get("error_message")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        occurred_at,
    })
}

#[async_trait]
impl AuditSink for SqlAuditRepository {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.append(&record).await.map_err(|error| AuditError::Write(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use supplyq_core::audit::{AuditRecord, AuditSink};
    use supplyq_core::domain::caller::{CallerContext, Role};
    use supplyq_core::domain::tool::ToolIntent;
    use supplyq_core::errors::{ErrorKind, QueryError};

    use super::SqlAuditRepository;
    use crate::migrations::run_pending;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn records_round_trip_through_audit_log() {
        let Some(pool) = test_pool().await else {
            return;
        };
        run_pending(&pool).await.expect("run migrations");
        let repository = SqlAuditRepository::new(pool);

        let caller = CallerContext::new("audit-test-user", Role::new("Planning"), "Mexico");
        let record = AuditRecord::failure(
            &caller,
            ToolIntent::DatabaseQuery,
            "delete all late orders",
            &QueryError::unsafe_statement("first token is `DELETE`, expected SELECT"),
        );
        let record_id = record.record_id.clone();
        repository.record(record).await.expect("audit write");

        let recent = repository.recent(50).await.expect("audit read");
        let stored = recent
            .into_iter()
            .find(|candidate| candidate.record_id == record_id)
            .expect("record is persisted");
        assert!(!stored.success);
        assert_eq!(stored.error_kind, Some(ErrorKind::UnsafeStatement));
        assert_eq!(stored.region, "Mexico");
        assert_eq!(stored.tool, ToolIntent::DatabaseQuery);
    }
}
