use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Versions bundled into the binary, in apply order.
pub fn known_versions() -> Vec<i64> {
    MIGRATOR
        .iter()
        .filter(|migration| migration.migration_type.is_up_migration())
        .map(|migration| migration.version)
        .collect()
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{known_versions, run_pending};
    use crate::test_support::test_pool;

    #[test]
    fn bundled_migrations_are_ordered() {
        let versions = known_versions();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn migrations_create_audit_log_and_are_idempotent() {
        let Some(pool) = test_pool().await else {
            return;
        };
        run_pending(&pool).await.expect("run migrations");
        run_pending(&pool).await.expect("second run is a no-op");

        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = 'audit_log'",
        )
        .fetch_one(&pool)
        .await
        .expect("check audit_log table")
        .get::<i64, _>("count");
        assert_eq!(count, 1);

        let reader =
            sqlx::query("SELECT COUNT(*) AS count FROM pg_roles WHERE rolname = 'supplyq_reader'")
                .fetch_one(&pool)
                .await
                .expect("check reader role")
                .get::<i64, _>("count");
        assert_eq!(reader, 1);
    }
}
