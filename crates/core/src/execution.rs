use async_trait::async_trait;
use serde_json::Value;

use crate::domain::result::QueryResult;
use crate::domain::statement::GuardedStatement;
use crate::errors::QueryError;

/// Request-scoped security context established on the connection before a statement runs.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionContext {
    /// Restricted database role assumed for the duration of the statement.
    pub session_role: Option<String>,
    /// Caller claims forwarded for row-level policies in the store.
    pub claims: Value,
    pub statement_timeout_ms: u64,
}

impl SessionContext {
    pub fn new(session_role: Option<String>, claims: Value, statement_timeout_ms: u64) -> Self {
        Self { session_role, claims, statement_timeout_ms }
    }

    pub fn claims_json(&self) -> String {
        match &self.claims {
            Value::Null => "{}".to_string(),
            claims => claims.to_string(),
        }
    }
}

#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(
        &self,
        statement: &GuardedStatement,
        session: &SessionContext,
    ) -> Result<QueryResult, QueryError>;
}
