use serde::Serialize;
use supplyq_agent::build_generator;
use supplyq_core::config::{AppConfig, LoadOptions};
use supplyq_core::policy::AccessPolicy;
use supplyq_db::connect_with_settings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_access_policy(&config));
            checks.push(check_text_generator(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("access_policy"));
            checks.push(DoctorCheck::skipped("text_generator"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_access_policy(config: &AppConfig) -> DoctorCheck {
    let loaded = match &config.policy.path {
        Some(path) => AccessPolicy::load(path),
        None => Ok(AccessPolicy::builtin()),
    };
    match loaded {
        Ok(policy) => DoctorCheck::pass(
            "access_policy",
            format!("roles: {}", policy.role_names().collect::<Vec<_>>().join(", ")),
        ),
        Err(error) => DoctorCheck::fail("access_policy", error.to_string()),
    }
}

fn check_text_generator(config: &AppConfig) -> DoctorCheck {
    match build_generator(&config.llm) {
        Ok(generator) => DoctorCheck::pass(
            "text_generator",
            format!("{} client built for model `{}`", generator.provider(), config.llm.model),
        ),
        Err(error) => DoctorCheck::fail("text_generator", error.to_string()),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let server_version = sqlx::query_scalar::<_, String>("SHOW server_version")
            .fetch_one(&pool)
            .await
            .map_err(|error| format!("connected but version probe failed: {error}"));
        pool.close().await;
        server_version
    });

    match result {
        Ok(version) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected to PostgreSQL {version}"),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
