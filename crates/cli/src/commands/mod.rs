pub mod ask;
pub mod config;
pub mod doctor;
pub mod guard;
pub mod migrate;
pub mod schema;
pub mod seed;

use serde::Serialize;
use supplyq_core::config::{AppConfig, LoadOptions};
use supplyq_core::errors::QueryError;
use supplyq_core::policy::AccessPolicy;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Request-level rejections carry their stable error kind as the class.
    pub fn query_failure(command: &str, error: &QueryError) -> Self {
        Self::failure(command, error.kind().as_str(), error.to_string(), 6)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn load_policy(
    command: &str,
    config: &AppConfig,
) -> Result<AccessPolicy, CommandResult> {
    match &config.policy.path {
        Some(path) => AccessPolicy::load(path).map_err(|error| {
            CommandResult::failure(command, "policy", format!("access policy issue: {error}"), 2)
        }),
        None => Ok(AccessPolicy::builtin()),
    }
}

pub(crate) fn async_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}
