//! JSON query API.
//!
//! - `POST /api/v1/query` - answer one question for an authenticated caller
//!
//! Identity (`user_id`, `role`, `region`, `claims`) is asserted by the upstream auth
//! layer and trusted as given.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use supplyq_agent::{AgentRequest, AgentResponse, AgentRuntime};
use supplyq_core::domain::caller::{CallerContext, Role};
use supplyq_core::domain::tool::ToolIntent;
use supplyq_core::errors::InterfaceError;
use tracing::warn;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

impl ApiState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub user_id: String,
    pub role: String,
    pub region: String,
    #[serde(default)]
    pub claims: Value,
    #[serde(default)]
    pub tool: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub response: AgentResponse,
    pub correlation_id: String,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error_kind: String,
    pub message: String,
    pub correlation_id: String,
}

impl ApiError {
    fn invalid_request(message: impl Into<String>, correlation_id: &str) -> (StatusCode, Self) {
        (
            StatusCode::BAD_REQUEST,
            Self {
                error_kind: "invalid_request".to_string(),
                message: message.into(),
                correlation_id: correlation_id.to_string(),
            },
        )
    }
}

fn interface_error(error: InterfaceError) -> (StatusCode, ApiError) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        ApiError {
            error_kind: error.kind().as_str().to_string(),
            message: error.message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        },
    )
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/api/v1/query", post(query)).with_state(state)
}

async fn query(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let correlation_id = correlation_id(&headers);

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(
                event_name = "system.api.invalid_body",
                correlation_id = %correlation_id,
                error = %rejection.body_text(),
                "query request body rejected"
            );
            return error_response(ApiError::invalid_request(
                "request body must be JSON with question, user_id, role and region",
                &correlation_id,
            ));
        }
    };

    let question = request.question.trim();
    if question.is_empty() {
        return error_response(ApiError::invalid_request("no question provided", &correlation_id));
    }

    let tool = match request.tool.as_deref().map(str::trim).filter(|tool| !tool.is_empty()) {
        Some(raw) => match ToolIntent::parse(raw) {
            Some(tool) => Some(tool),
            None => {
                return error_response(ApiError::invalid_request(
                    format!("unknown tool `{raw}`"),
                    &correlation_id,
                ))
            }
        },
        None => None,
    };

    let caller = CallerContext::new(request.user_id, Role::new(request.role), request.region)
        .with_claims(request.claims);
    let agent_request = AgentRequest {
        question: question.to_string(),
        caller,
        tool,
        correlation_id: correlation_id.clone(),
    };

    match state.runtime.answer(agent_request).await {
        Ok(response) => {
            (StatusCode::OK, Json(QueryResponse { response, correlation_id })).into_response()
        }
        Err(error) => error_response(interface_error(error.into_interface(correlation_id))),
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()))
}

fn error_response((status, error): (StatusCode, ApiError)) -> Response {
    (status, Json(error)).into_response()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use supplyq_agent::{
        AgentRuntime, DataQueryPipeline, GenerationError, PipelineSettings, SqlGenerator,
        TextGenerator, ToolRegistry,
    };
    use supplyq_core::audit::InMemoryAuditSink;
    use supplyq_core::domain::result::QueryResult;
    use supplyq_core::domain::statement::GuardedStatement;
    use supplyq_core::errors::QueryError;
    use supplyq_core::execution::{SessionContext, StatementExecutor};
    use supplyq_core::policy::AccessPolicy;
    use supplyq_core::schema::{ColumnInfo, SchemaProjector, StaticSchemaSource};
    use tower::ServiceExt;

    use super::{router, ApiError, ApiState, CORRELATION_HEADER};

    struct FixedModel(&'static str);

    #[async_trait]
    impl TextGenerator for FixedModel {
        fn provider(&self) -> &'static str {
            "fixed"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    struct Rows(Result<usize, QueryError>);

    #[async_trait]
    impl StatementExecutor for Rows {
        async fn execute(
            &self,
            _statement: &GuardedStatement,
            _session: &SessionContext,
        ) -> Result<QueryResult, QueryError> {
            let count = self.0.clone()?;
            let rows = (0..count)
                .map(|index| BTreeMap::from([("order_id".to_string(), index.to_string())]))
                .collect();
            Ok(QueryResult::Rows { columns: vec!["order_id".to_string()], rows })
        }
    }

    fn app(model_reply: &'static str, executor: Rows) -> (Router, InMemoryAuditSink) {
        let policy = Arc::new(AccessPolicy::builtin());
        let audit = InMemoryAuditSink::default();
        let source = Arc::new(StaticSchemaSource::new(vec![
            ColumnInfo::new("supply_chain", "order_id", "bigint"),
            ColumnInfo::new("supply_chain", "order_country", "text"),
        ]));
        let pipeline = DataQueryPipeline::new(
            policy.clone(),
            SchemaProjector::new(policy, source),
            SqlGenerator::new(Arc::new(FixedModel(model_reply)), Duration::from_secs(1)),
            Arc::new(executor),
            Arc::new(audit.clone()),
            PipelineSettings::default(),
        );
        let runtime = AgentRuntime::new(
            Some(Arc::new(pipeline)),
            ToolRegistry::default(),
            Arc::new(audit.clone()),
        );
        (router(ApiState::new(Arc::new(runtime))), audit)
    }

    async fn post(app: Router, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/query")
            .header("content-type", "application/json")
            .header(CORRELATION_HEADER, "req-api-test")
            .body(Body::from(body.to_string()))
            .expect("request builds");
        let response = app.oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body reads");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn question(role: &str, region: &str) -> Value {
        json!({
            "question": "how many orders?",
            "user_id": "u-1",
            "role": role,
            "region": region,
            "claims": {"sub": "u-1"}
        })
    }

    #[tokio::test]
    async fn answered_question_returns_rows_and_correlation_id() {
        let (app, audit) = app("SELECT order_id FROM supply_chain", Rows(Ok(9)));

        let (status, body) = post(app, question("Finance", "USA")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tool"], "database_query");
        assert_eq!(body["total_rows"], 9);
        assert_eq!(body["rows_shown"], 5);
        assert_eq!(body["correlation_id"], "req-api-test");
        assert!(body["sql"].as_str().is_some_and(|sql| sql.contains("lower(:region)")));
        assert_eq!(audit.records().len(), 1);
    }

    #[tokio::test]
    async fn unknown_role_is_bad_request() {
        let (app, _) = app("SELECT 1", Rows(Ok(1)));

        let (status, body) = post(app, question("Intern", "USA")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ApiError = serde_json::from_value(body).expect("error shape");
        assert_eq!(error.error_kind, "unknown_role");
        assert_eq!(error.correlation_id, "req-api-test");
    }

    #[tokio::test]
    async fn unsafe_generation_is_forbidden_without_leaking_sql() {
        let (app, _) = app("DROP TABLE supply_chain", Rows(Ok(1)));

        let (status, body) = post(app, question("Operations Manager", "All")).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_kind"], "unsafe_statement");
        assert!(!body["message"].as_str().unwrap_or_default().contains("DROP"));
    }

    #[tokio::test]
    async fn error_kinds_map_to_statuses() {
        let cases = [
            (
                QueryError::MalformedGeneratedQuery("relation does not exist".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (QueryError::AccessDenied("permission denied".to_string()), StatusCode::FORBIDDEN),
            (
                QueryError::ExecutionFailure("connection reset".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (failure, expected) in cases {
            let kind = failure.kind().as_str();
            let (app, _) = app("SELECT order_id FROM supply_chain", Rows(Err(failure)));
            let (status, body) = post(app, question("Finance", "India")).await;
            assert_eq!(status, expected, "{kind}");
            assert_eq!(body["error_kind"], kind);
        }
    }

    #[tokio::test]
    async fn unconfigured_tool_is_service_unavailable() {
        let (app, _) = app("SELECT 1", Rows(Ok(1)));
        let mut body = question("Finance", "USA");
        body["tool"] = json!("web");

        let (status, body) = post(app, body).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error_kind"], "tool_unavailable");
    }

    #[tokio::test]
    async fn empty_question_and_unknown_tool_are_invalid_requests() {
        let (app_a, audit) = app("SELECT 1", Rows(Ok(1)));
        let mut empty = question("Finance", "USA");
        empty["question"] = json!("   ");
        let (status, body) = post(app_a, empty).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_kind"], "invalid_request");
        assert!(audit.records().is_empty());

        let (app_b, _) = app("SELECT 1", Rows(Ok(1)));
        let mut shell = question("Finance", "USA");
        shell["tool"] = json!("shell");
        let (status, body) = post(app_b, shell).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().is_some_and(|message| message.contains("shell")));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_request() {
        let (app, _) = app("SELECT 1", Rows(Ok(1)));
        let (status, body) = post(app, json!({"question": "missing fields"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["correlation_id"], "req-api-test");
    }
}
