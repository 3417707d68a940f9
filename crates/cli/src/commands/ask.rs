use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use supplyq_agent::{
    build_generator, AgentRequest, AgentRuntime, DataQueryPipeline, DuckDuckGoSearcher,
    HttpDocumentSearcher, PipelineSettings, SqlGenerator, ToolRegistry,
};
use supplyq_core::audit::AuditSink;
use supplyq_core::config::AppConfig;
use supplyq_core::domain::caller::{CallerContext, Role};
use supplyq_core::domain::tool::ToolIntent;
use supplyq_core::policy::AccessPolicy;
use supplyq_core::schema::SchemaProjector;
use supplyq_db::{
    connect_lazy_with_settings, PgSchemaSource, PgStatementExecutor, SqlAuditRepository,
};
use uuid::Uuid;

use crate::commands::{async_runtime, load_config, load_policy, CommandResult};

pub struct AskArgs {
    pub question: String,
    pub user_id: String,
    pub role: String,
    pub region: String,
    pub tool: Option<String>,
    pub claims: Option<String>,
}

/// Answers one question through the same runtime the server uses.
pub fn run(args: AskArgs) -> CommandResult {
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let policy = match load_policy("ask", &config) {
        Ok(policy) => Arc::new(policy),
        Err(failure) => return failure,
    };

    let tool = match args.tool.as_deref() {
        Some(raw) => match ToolIntent::parse(raw) {
            Some(tool) => Some(tool),
            None => {
                return CommandResult::failure(
                    "ask",
                    "invalid_request",
                    format!("unknown tool `{raw}`"),
                    2,
                )
            }
        },
        None => None,
    };
    let claims = match args.claims.as_deref().map(serde_json::from_str::<Value>) {
        Some(Ok(claims)) => claims,
        Some(Err(error)) => {
            return CommandResult::failure(
                "ask",
                "invalid_request",
                format!("claims must be a JSON document: {error}"),
                2,
            )
        }
        None => Value::Null,
    };
    if args.question.trim().is_empty() {
        return CommandResult::failure("ask", "invalid_request", "no question provided", 2);
    }

    let runtime = match async_runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let answered = runtime.block_on(async {
        let pool = connect_lazy_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .map_err(|error| CommandResult::failure("ask", "db_connectivity", error.to_string(), 4))?;

        let agent = build_runtime(&config, policy, pool.clone())?;
        let request = AgentRequest {
            question: args.question.trim().to_string(),
            caller: CallerContext::new(args.user_id, Role::new(args.role), args.region)
                .with_claims(claims),
            tool,
            correlation_id: format!("cli-{}", Uuid::new_v4().simple()),
        };
        let outcome = agent.answer(request).await;
        pool.close().await;
        Ok::<_, CommandResult>(outcome)
    });

    match answered {
        Ok(Ok(response)) => CommandResult::success("ask", response.answer),
        Ok(Err(error)) => CommandResult::query_failure("ask", &error),
        Err(failure) => failure,
    }
}

fn build_runtime(
    config: &AppConfig,
    policy: Arc<AccessPolicy>,
    pool: supplyq_db::DbPool,
) -> Result<AgentRuntime, CommandResult> {
    let audit: Arc<dyn AuditSink> = Arc::new(SqlAuditRepository::new(pool.clone()));
    let text_generator = build_generator(&config.llm).map_err(|error| {
        CommandResult::failure("ask", "generation_unavailable", error.to_string(), 6)
    })?;

    let pipeline = DataQueryPipeline::new(
        policy.clone(),
        SchemaProjector::new(policy, Arc::new(PgSchemaSource::new(pool.clone()))),
        SqlGenerator::new(text_generator, Duration::from_secs(config.llm.timeout_secs)),
        Arc::new(PgStatementExecutor::new(pool, Duration::from_secs(config.database.timeout_secs))),
        audit.clone(),
        PipelineSettings {
            session_role: config.database.session_role.clone(),
            statement_timeout_ms: config.database.statement_timeout_ms,
            display_limit: config.tools.display_limit,
        },
    );

    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let mut tools = ToolRegistry::default();
    if let Some(url) = &config.tools.retrieval_url {
        if let Ok(searcher) = HttpDocumentSearcher::new(url.clone(), timeout) {
            tools = tools.with_documents(Arc::new(searcher));
        }
    }
    if config.tools.web_search_enabled {
        if let Ok(searcher) = DuckDuckGoSearcher::new(config.tools.web_search_url.clone(), timeout)
        {
            tools = tools.with_web(Arc::new(searcher));
        }
    }

    Ok(AgentRuntime::new(Some(Arc::new(pipeline)), tools, audit))
}
