use std::sync::Arc;

use tracing::{error, info, warn};

use supplyq_core::audit::{AuditRecord, AuditSink};
use supplyq_core::domain::caller::CallerContext;
use supplyq_core::domain::result::{DataAnswer, DEFAULT_DISPLAY_LIMIT};
use supplyq_core::domain::tool::ToolIntent;
use supplyq_core::errors::QueryError;
use supplyq_core::execution::{SessionContext, StatementExecutor};
use supplyq_core::policy::AccessPolicy;
use supplyq_core::schema::SchemaProjector;

use crate::guard::QueryGuard;
use crate::sql_generator::SqlGenerator;

/// Connection-level settings applied to every execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub session_role: Option<String>,
    pub statement_timeout_ms: u64,
    pub display_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            session_role: None,
            statement_timeout_ms: 15_000,
            display_limit: DEFAULT_DISPLAY_LIMIT,
        }
    }
}

/// Question in, formatted rows out: policy, projection, generation, guard, execution.
pub struct DataQueryPipeline {
    policy: Arc<AccessPolicy>,
    projector: SchemaProjector,
    generator: SqlGenerator,
    guard: QueryGuard,
    executor: Arc<dyn StatementExecutor>,
    audit: Arc<dyn AuditSink>,
    settings: PipelineSettings,
}

/// How far a request got before it resolved; carried into fault logs.
#[derive(Default)]
struct Trace {
    sql: Option<String>,
}

impl DataQueryPipeline {
    pub fn new(
        policy: Arc<AccessPolicy>,
        projector: SchemaProjector,
        generator: SqlGenerator,
        executor: Arc<dyn StatementExecutor>,
        audit: Arc<dyn AuditSink>,
        settings: PipelineSettings,
    ) -> Self {
        let guard = QueryGuard::new(policy.clone());
        Self { policy, projector, generator, guard, executor, audit, settings }
    }

    /// Answers one database question for `caller`. Exactly one audit record is written
    /// whatever the outcome; a failing audit sink never changes the result.
    pub async fn answer_data_question(
        &self,
        question: &str,
        caller: &CallerContext,
    ) -> Result<DataAnswer, QueryError> {
        let mut trace = Trace::default();
        let outcome = self.run(question, caller, &mut trace).await;

        match &outcome {
            Ok(answer) => info!(
                event_name = "agent.pipeline.completed",
                role = %caller.role,
                region = %caller.region,
                rows_shown = answer.rows_shown,
                total_rows = answer.total_rows,
                "data question answered"
            ),
            Err(failure) if failure.is_infrastructure_fault() => error!(
                event_name = "agent.pipeline.fault",
                error_kind = %failure.kind(),
                error = %failure,
                question = %question,
                sql = trace.sql.as_deref().unwrap_or("<not generated>"),
                role = %caller.role,
                region = %caller.region,
                "data question failed on infrastructure"
            ),
            Err(failure) => warn!(
                event_name = "agent.pipeline.rejected",
                error_kind = %failure.kind(),
                error = %failure,
                role = %caller.role,
                region = %caller.region,
                "data question rejected"
            ),
        }

        let record =
            AuditRecord::from_outcome(caller, ToolIntent::DatabaseQuery, question, &outcome);
        if let Err(audit_error) = self.audit.record(record).await {
            warn!(
                event_name = "agent.audit.write_failed",
                error = %audit_error,
                "audit record could not be written"
            );
        }

        outcome
    }

    async fn run(
        &self,
        question: &str,
        caller: &CallerContext,
        trace: &mut Trace,
    ) -> Result<DataAnswer, QueryError> {
        self.policy.entry(&caller.role)?;

        let schema = self.projector.project(&caller.role).await?;
        let generated = self.generator.generate(question, &schema).await?;
        trace.sql = Some(generated.cleaned.clone());

        let guarded = self.guard.guard(&generated.cleaned, &caller.role, &caller.region)?;
        trace.sql = Some(guarded.text().to_string());

        let session = SessionContext::new(
            self.settings.session_role.clone(),
            caller.claims.clone(),
            self.settings.statement_timeout_ms,
        );
        let result = self.executor.execute(&guarded, &session).await?;

        Ok(DataAnswer::from_result(guarded.text(), result, self.settings.display_limit))
    }
}
