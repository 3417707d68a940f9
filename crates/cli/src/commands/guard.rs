use std::sync::Arc;

use supplyq_agent::QueryGuard;
use supplyq_core::domain::caller::Role;

use crate::commands::{load_config, load_policy, CommandResult};

/// Dry-runs the guard on a statement without touching the database or the model.
pub fn run(role: &str, region: &str, sql: &str) -> CommandResult {
    let config = match load_config("guard") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let policy = match load_policy("guard", &config) {
        Ok(policy) => Arc::new(policy),
        Err(failure) => return failure,
    };

    let role = Role::new(role);
    if let Err(error) = policy.entry(&role) {
        return CommandResult::query_failure("guard", &error);
    }

    match QueryGuard::new(policy).guard(sql, &role, region) {
        Ok(guarded) => {
            let params = guarded
                .params()
                .iter()
                .map(|param| format!("{}={}", param.placeholder(), param.value))
                .collect::<Vec<_>>();
            let message = if params.is_empty() {
                guarded.text().to_string()
            } else {
                format!("{} [{}]", guarded.text(), params.join(", "))
            };
            CommandResult::success("guard", message)
        }
        Err(error) => CommandResult::query_failure("guard", &error),
    }
}
