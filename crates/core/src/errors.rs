use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, serializable tag for every failure a request can end in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownRole,
    SchemaUnavailable,
    EmptyGeneration,
    UnsafeStatement,
    AccessDenied,
    MalformedGeneratedQuery,
    ExecutionFailure,
    GenerationUnavailable,
    ToolUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownRole => "unknown_role",
            Self::SchemaUnavailable => "schema_unavailable",
            Self::EmptyGeneration => "empty_generation",
            Self::UnsafeStatement => "unsafe_statement",
            Self::AccessDenied => "access_denied",
            Self::MalformedGeneratedQuery => "malformed_generated_query",
            Self::ExecutionFailure => "execution_failure",
            Self::GenerationUnavailable => "generation_unavailable",
            Self::ToolUnavailable => "tool_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown role `{role}`")]
    UnknownRole { role: String },
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),
    #[error("language model returned an empty statement")]
    EmptyGeneration,
    #[error("unsafe statement rejected: {reason}")]
    UnsafeStatement { reason: String },
    #[error("access denied by data store: {0}")]
    AccessDenied(String),
    #[error("generated query is malformed: {0}")]
    MalformedGeneratedQuery(String),
    #[error("query execution failed: {0}")]
    ExecutionFailure(String),
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("tool `{tool}` is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },
}

impl QueryError {
    pub fn unsafe_statement(reason: impl Into<String>) -> Self {
        Self::UnsafeStatement { reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownRole { .. } => ErrorKind::UnknownRole,
            Self::SchemaUnavailable(_) => ErrorKind::SchemaUnavailable,
            Self::EmptyGeneration => ErrorKind::EmptyGeneration,
            Self::UnsafeStatement { .. } => ErrorKind::UnsafeStatement,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::MalformedGeneratedQuery(_) => ErrorKind::MalformedGeneratedQuery,
            Self::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
            Self::GenerationUnavailable(_) => ErrorKind::GenerationUnavailable,
            Self::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
        }
    }

    /// Rejections that must never be retried.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::UnknownRole { .. } | Self::UnsafeStatement { .. })
    }

    /// Faults of the model endpoint, the data store, or a missing collaborator.
    pub fn is_infrastructure_fault(&self) -> bool {
        matches!(
            self,
            Self::SchemaUnavailable(_)
                | Self::GenerationUnavailable(_)
                | Self::ExecutionFailure(_)
                | Self::ToolUnavailable { .. }
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownRole { .. } => {
                "Your role is not authorized to query the supply-chain database."
            }
            Self::SchemaUnavailable(_) => {
                "The database schema is temporarily unavailable. Please retry shortly."
            }
            Self::EmptyGeneration => {
                "I could not turn that question into a database query. Try rephrasing it."
            }
            Self::UnsafeStatement { .. } => {
                "The generated query was rejected because only read-only queries are allowed."
            }
            Self::AccessDenied(_) => "You do not have access to the data this question requires.",
            Self::MalformedGeneratedQuery(_) => {
                "The generated query could not be run against the database. Try rephrasing the question."
            }
            Self::ExecutionFailure(_) => "The database query failed. Please retry shortly.",
            Self::GenerationUnavailable(_) => {
                "The language model service is unavailable. Please retry shortly."
            }
            Self::ToolUnavailable { .. } => "That capability is not configured on this gateway.",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

/// Transport-facing view of a [`QueryError`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { kind: ErrorKind, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { kind: ErrorKind, message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { kind: ErrorKind, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { kind: ErrorKind, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { kind: ErrorKind, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { kind, .. }
            | Self::Forbidden { kind, .. }
            | Self::Unprocessable { kind, .. }
            | Self::ServiceUnavailable { kind, .. }
            | Self::Internal { kind, .. } => *kind,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

impl From<QueryError> for InterfaceError {
    fn from(value: QueryError) -> Self {
        let kind = value.kind();
        let message = value.user_message().to_owned();
        let correlation_id = "unassigned".to_owned();
        match value {
            QueryError::UnknownRole { .. } => Self::BadRequest { kind, message, correlation_id },
            QueryError::UnsafeStatement { .. } | QueryError::AccessDenied(_) => {
                Self::Forbidden { kind, message, correlation_id }
            }
            QueryError::EmptyGeneration | QueryError::MalformedGeneratedQuery(_) => {
                Self::Unprocessable { kind, message, correlation_id }
            }
            QueryError::SchemaUnavailable(_)
            | QueryError::GenerationUnavailable(_)
            | QueryError::ToolUnavailable { .. } => {
                Self::ServiceUnavailable { kind, message, correlation_id }
            }
            QueryError::ExecutionFailure(_) => Self::Internal { kind, message, correlation_id },
        }
    }
}
