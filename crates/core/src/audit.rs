use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::caller::CallerContext;
use crate::domain::tool::ToolIntent;
use crate::errors::{ErrorKind, QueryError};

/// One line of the append-only request log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: String,
    pub user_id: String,
    pub role: String,
    pub region: String,
    pub tool: ToolIntent,
    pub query_text: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn success(caller: &CallerContext, tool: ToolIntent, query_text: &str) -> Self {
        Self::build(caller, tool, query_text, None)
    }

    pub fn failure(
        caller: &CallerContext,
        tool: ToolIntent,
        query_text: &str,
        error: &QueryError,
    ) -> Self {
        Self::build(caller, tool, query_text, Some(error))
    }

    pub fn from_outcome<T>(
        caller: &CallerContext,
        tool: ToolIntent,
        query_text: &str,
        outcome: &Result<T, QueryError>,
    ) -> Self {
        Self::build(caller, tool, query_text, outcome.as_ref().err())
    }

    fn build(
        caller: &CallerContext,
        tool: ToolIntent,
        query_text: &str,
        error: Option<&QueryError>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            user_id: caller.user_id.clone(),
            role: caller.role.as_str().to_string(),
            region: caller.region.clone(),
            tool,
            query_text: query_text.to_string(),
            success: error.is_none(),
            error_kind: error.map(QueryError::kind),
            error_message: error.map(ToString::to_string),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit write failed: {0}")]
    Write(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}
