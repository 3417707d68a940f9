use std::sync::Arc;
use std::time::Duration;

use supplyq_agent::{
    build_generator, AgentRuntime, DataQueryPipeline, DuckDuckGoSearcher, HttpDocumentSearcher,
    PipelineSettings, SqlGenerator, ToolRegistry,
};
use supplyq_core::audit::AuditSink;
use supplyq_core::config::{AppConfig, ConfigError};
use supplyq_core::policy::{AccessPolicy, PolicyError};
use supplyq_core::schema::SchemaProjector;
use supplyq_db::{
    connect_lazy_with_settings, connect_with_settings, migrations, DbPool, PgSchemaSource,
    PgStatementExecutor, SqlAuditRepository,
};
use thiserror::Error;
use tracing::{info, warn};

/// Whether every collaborator came up. A degraded gateway still serves requests and
/// answers with service-unavailable errors where a collaborator is missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Degraded { reasons: Vec<String> },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            Self::Ready
        } else {
            Self::Degraded { reasons }
        }
    }
}

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub readiness: Readiness,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("database pool could not be created: {0}")]
    DatabasePool(#[source] sqlx::Error),
}

/// Configuration and policy errors are fatal. Unreachable collaborators degrade the
/// gateway instead of stopping it.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let mut degraded = Vec::new();

    let policy = Arc::new(match &config.policy.path {
        Some(path) => AccessPolicy::load(path)?,
        None => AccessPolicy::builtin(),
    });
    info!(
        event_name = "system.bootstrap.policy_loaded",
        correlation_id = "bootstrap",
        roles = %policy.role_names().collect::<Vec<_>>().join(", "),
        "access policy loaded"
    );

    let db_pool = connect_database(&config, &mut degraded).await?;
    let audit: Arc<dyn AuditSink> = Arc::new(SqlAuditRepository::new(db_pool.clone()));

    let pipeline = match build_generator(&config.llm) {
        Ok(text_generator) => {
            let schema_source = Arc::new(PgSchemaSource::new(db_pool.clone()));
            let projector = SchemaProjector::new(policy.clone(), schema_source);
            let executor = Arc::new(PgStatementExecutor::new(
                db_pool.clone(),
                Duration::from_secs(config.database.timeout_secs),
            ));
            let sql_generator =
                SqlGenerator::new(text_generator, Duration::from_secs(config.llm.timeout_secs));
            Some(Arc::new(DataQueryPipeline::new(
                policy.clone(),
                projector,
                sql_generator,
                executor,
                audit.clone(),
                PipelineSettings {
                    session_role: config.database.session_role.clone(),
                    statement_timeout_ms: config.database.statement_timeout_ms,
                    display_limit: config.tools.display_limit,
                },
            )))
        }
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.llm_unavailable",
                correlation_id = "bootstrap",
                provider = ?config.llm.provider,
                error = %error,
                "text generator could not be built; data questions are disabled"
            );
            degraded.push(format!("llm: {error}"));
            None
        }
    };

    let tools = build_tools(&config, &mut degraded);
    let runtime = Arc::new(AgentRuntime::new(pipeline, tools, audit));
    let readiness = Readiness::from_reasons(degraded);

    info!(
        event_name = "system.bootstrap.completed",
        correlation_id = "bootstrap",
        ready = readiness.is_ready(),
        "application bootstrap completed"
    );

    Ok(Application { config, db_pool, runtime, readiness })
}

async fn connect_database(
    config: &AppConfig,
    degraded: &mut Vec<String>,
) -> Result<DbPool, BootstrapError> {
    let database = &config.database;
    match connect_with_settings(&database.url, database.max_connections, database.timeout_secs)
        .await
    {
        Ok(pool) => {
            info!(
                event_name = "system.bootstrap.database_connected",
                correlation_id = "bootstrap",
                "database connection established"
            );
            if let Err(error) = migrations::run_pending(&pool).await {
                warn!(
                    event_name = "system.bootstrap.migrations_failed",
                    correlation_id = "bootstrap",
                    error = %error,
                    "database migrations failed"
                );
                degraded.push(format!("migrations: {error}"));
            } else {
                info!(
                    event_name = "system.bootstrap.migrations_applied",
                    correlation_id = "bootstrap",
                    "database migrations applied"
                );
            }
            Ok(pool)
        }
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.database_unavailable",
                correlation_id = "bootstrap",
                error = %error,
                "database unreachable; continuing with a lazy pool"
            );
            degraded.push(format!("database: {error}"));
            connect_lazy_with_settings(
                &database.url,
                database.max_connections,
                database.timeout_secs,
            )
            .map_err(BootstrapError::DatabasePool)
        }
    }
}

fn build_tools(config: &AppConfig, degraded: &mut Vec<String>) -> ToolRegistry {
    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let mut tools = ToolRegistry::default();

    if let Some(url) = &config.tools.retrieval_url {
        match HttpDocumentSearcher::new(url.clone(), timeout) {
            Ok(searcher) => tools = tools.with_documents(Arc::new(searcher)),
            Err(error) => degraded.push(format!("document search: {error}")),
        }
    }
    if config.tools.web_search_enabled {
        match DuckDuckGoSearcher::new(config.tools.web_search_url.clone(), timeout) {
            Ok(searcher) => tools = tools.with_web(Arc::new(searcher)),
            Err(error) => degraded.push(format!("web search: {error}")),
        }
    }

    info!(
        event_name = "system.bootstrap.tools_configured",
        correlation_id = "bootstrap",
        documents = tools.documents().is_some(),
        web = tools.web().is_some(),
        "auxiliary tools configured"
    );
    tools
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use supplyq_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError, Readiness};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        let config = AppConfig::load(options)?;
        bootstrap_with_config(config).await
    }

    const UNREACHABLE_DB: &str = "postgres://supplyq@127.0.0.1:1/supplyq";

    #[tokio::test]
    async fn bootstrap_fails_fast_when_provider_credentials_are_missing() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(UNREACHABLE_DB.to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let error = result.err().expect("missing api key must be fatal");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("llm.api_key"));
    }

    #[tokio::test]
    async fn broken_policy_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().expect("temp policy");
        writeln!(file, "this is = = not toml").expect("write policy");

        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(UNREACHABLE_DB.to_string()),
                policy_path: Some(file.path().to_path_buf()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::Policy(_))));
    }

    #[tokio::test]
    async fn unreachable_database_degrades_instead_of_failing() {
        let mut config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(UNREACHABLE_DB.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("defaults validate");
        config.database.timeout_secs = 1;

        let app = bootstrap_with_config(config).await.expect("degraded bootstrap still succeeds");

        match &app.readiness {
            Readiness::Degraded { reasons } => {
                assert!(reasons.iter().any(|reason| reason.starts_with("database:")));
            }
            Readiness::Ready => panic!("gateway must report degraded"),
        }
        assert!(app.runtime.has_data_pipeline());
        assert!(app.runtime.tools().is_empty());
    }
}
