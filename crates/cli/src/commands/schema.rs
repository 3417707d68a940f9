use std::sync::Arc;

use supplyq_core::domain::caller::Role;
use supplyq_core::schema::SchemaProjector;
use supplyq_db::{connect_lazy_with_settings, PgSchemaSource};

use crate::commands::{async_runtime, load_config, load_policy, CommandResult};

/// Prints the schema text the model would see for `role`.
pub fn run(role: &str) -> CommandResult {
    let config = match load_config("schema") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let policy = match load_policy("schema", &config) {
        Ok(policy) => Arc::new(policy),
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("schema") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let pool = match runtime.block_on(async {
        connect_lazy_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
    }) {
        Ok(pool) => pool,
        Err(error) => {
            return CommandResult::failure("schema", "db_connectivity", error.to_string(), 4)
        }
    };

    let projector = SchemaProjector::new(policy, Arc::new(PgSchemaSource::new(pool.clone())));
    let projected = runtime.block_on(async {
        let projected = projector.project(&Role::new(role)).await;
        pool.close().await;
        projected
    });

    match projected {
        Ok(schema) => CommandResult::success("schema", schema.as_str()),
        Err(error) => CommandResult::query_failure("schema", &error),
    }
}
