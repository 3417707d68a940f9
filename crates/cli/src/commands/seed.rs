use std::path::Path;

use crate::commands::{async_runtime, load_config, CommandResult};
use supplyq_db::{connect_with_settings, load_supply_chain, migrations, read_dataset, LoadSummary};

/// Replaces the `supply_chain` table with the contents of a DataCo-style CSV export.
pub fn run(csv_path: &Path) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let dataset = match read_dataset(csv_path) {
        Ok(dataset) => dataset,
        Err(error) => return CommandResult::failure("seed", "dataset_read", error.to_string(), 5),
    };

    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let summary = load_supply_chain(&pool, &dataset, config.database.session_role.as_deref())
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));

        pool.close().await;
        summary
    });

    match result {
        Ok(summary) => CommandResult::success("seed", describe(csv_path, &summary)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn describe(csv_path: &Path, summary: &LoadSummary) -> String {
    let grant = match &summary.granted_to {
        Some(role) => format!("; SELECT granted to {role}"),
        None => String::new(),
    };
    format!(
        "loaded {} row(s) with {} column(s) from {} into {}{grant}",
        summary.rows,
        summary.columns,
        csv_path.display(),
        summary.table
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use supplyq_db::LoadSummary;

    use super::describe;

    #[test]
    fn summary_mentions_grant_only_when_a_reader_role_is_set() {
        let mut summary = LoadSummary {
            table: "supply_chain".to_string(),
            columns: 3,
            rows: 120,
            granted_to: Some("supplyq_reader".to_string()),
        };
        let message = describe(Path::new("data/DataCoSupplyChainDataset.csv"), &summary);
        assert_eq!(
            message,
            "loaded 120 row(s) with 3 column(s) from data/DataCoSupplyChainDataset.csv into supply_chain; SELECT granted to supplyq_reader"
        );

        summary.granted_to = None;
        let message = describe(Path::new("rows.csv"), &summary);
        assert!(message.ends_with("into supply_chain"));
    }
}
