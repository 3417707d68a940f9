use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn, Instrument};

use supplyq_core::audit::{AuditRecord, AuditSink};
use supplyq_core::domain::caller::CallerContext;
use supplyq_core::domain::tool::ToolIntent;
use supplyq_core::errors::QueryError;

use crate::pipeline::DataQueryPipeline;
use crate::tools::{ToolAnswer, ToolError, ToolRegistry};

const DOCUMENT_KEYWORDS: &[&str] =
    &["policy", "policies", "guideline", "procedure", "write-off", "ethical", "code of conduct"];
const WEB_KEYWORDS: &[&str] = &["news", "latest", "current events", "internet"];

/// Keyword classifier choosing which tool answers a question.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntentRouter;

impl IntentRouter {
    pub fn classify(&self, question: &str) -> ToolIntent {
        let lowered = question.to_lowercase();
        if DOCUMENT_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            ToolIntent::DocumentSearch
        } else if WEB_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            ToolIntent::WebSearch
        } else {
            ToolIntent::DatabaseQuery
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentRequest {
    pub question: String,
    pub caller: CallerContext,
    /// Skips classification when set.
    pub tool: Option<ToolIntent>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentResponse {
    pub tool: ToolIntent,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_shown: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl AgentResponse {
    fn from_tool(tool: ToolIntent, answer: ToolAnswer) -> Self {
        Self {
            tool,
            answer: answer.answer_text,
            sql: None,
            rows_shown: None,
            total_rows: None,
            sources: answer.sources,
        }
    }
}

pub struct AgentRuntime {
    router: IntentRouter,
    pipeline: Option<Arc<DataQueryPipeline>>,
    tools: ToolRegistry,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        pipeline: Option<Arc<DataQueryPipeline>>,
        tools: ToolRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { router: IntentRouter, pipeline, tools, audit }
    }

    pub fn has_data_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn answer(&self, request: AgentRequest) -> Result<AgentResponse, QueryError> {
        let intent = request.tool.unwrap_or_else(|| self.router.classify(&request.question));
        let span = tracing::info_span!(
            "agent.request",
            correlation_id = %request.correlation_id,
            tool = %intent,
            role = %request.caller.role,
            region = %request.caller.region,
        );

        async move {
            info!(event_name = "agent.request.routed", "question routed");
            match intent {
                ToolIntent::DatabaseQuery => self.answer_database(&request).await,
                ToolIntent::DocumentSearch | ToolIntent::WebSearch => {
                    let outcome = self.answer_with_tool(intent, &request.question).await;
                    self.audit(&request.caller, intent, &request.question, &outcome).await;
                    outcome
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn answer_database(&self, request: &AgentRequest) -> Result<AgentResponse, QueryError> {
        let Some(pipeline) = &self.pipeline else {
            let intent = ToolIntent::DatabaseQuery;
            let outcome = Err(unavailable(intent, "data pipeline is not initialized"));
            self.audit(&request.caller, intent, &request.question, &outcome).await;
            return outcome;
        };

        let answer = pipeline.answer_data_question(&request.question, &request.caller).await?;
        Ok(AgentResponse {
            tool: ToolIntent::DatabaseQuery,
            answer: answer.answer_text,
            sql: Some(answer.sql),
            rows_shown: Some(answer.rows_shown),
            total_rows: Some(answer.total_rows),
            sources: Vec::new(),
        })
    }

    async fn answer_with_tool(
        &self,
        intent: ToolIntent,
        question: &str,
    ) -> Result<AgentResponse, QueryError> {
        let result = match intent {
            ToolIntent::DocumentSearch => match self.tools.documents() {
                Some(searcher) => searcher.search(question).await,
                None => return Err(unavailable(intent, "document retrieval is not configured")),
            },
            ToolIntent::WebSearch => match self.tools.web() {
                Some(searcher) => searcher.search(question).await,
                None => return Err(unavailable(intent, "web search is disabled")),
            },
            ToolIntent::DatabaseQuery => {
                return Err(unavailable(intent, "database questions use the data pipeline"))
            }
        };

        result
            .map(|answer| AgentResponse::from_tool(intent, answer))
            .map_err(|error: ToolError| {
                warn!(
                    event_name = "agent.tool.failed",
                    error = %error,
                    question = %question,
                    "tool call failed"
                );
                unavailable(intent, error.to_string())
            })
    }

    async fn audit<T>(
        &self,
        caller: &CallerContext,
        tool: ToolIntent,
        question: &str,
        outcome: &Result<T, QueryError>,
    ) {
        let record = AuditRecord::from_outcome(caller, tool, question, outcome);
        if let Err(error) = self.audit.record(record).await {
            warn!(
                event_name = "agent.audit.write_failed",
                error = %error,
                "audit record could not be written"
            );
        }
    }
}

fn unavailable(tool: ToolIntent, reason: impl Into<String>) -> QueryError {
    QueryError::ToolUnavailable { tool: tool.as_str().to_string(), reason: reason.into() }
}
