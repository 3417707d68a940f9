pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod execution;
pub mod policy;
pub mod schema;

pub use audit::{AuditError, AuditRecord, AuditSink, InMemoryAuditSink};
pub use domain::caller::{CallerContext, Region, Role};
pub use domain::result::{DataAnswer, QueryResult, DEFAULT_DISPLAY_LIMIT};
pub use domain::statement::{BoundParam, GeneratedStatement, GuardedStatement};
pub use domain::tool::ToolIntent;
pub use errors::{ErrorKind, InterfaceError, QueryError};
pub use execution::{SessionContext, StatementExecutor};
pub use policy::{AccessPolicy, PolicyError, RolePolicy};
pub use schema::{ColumnInfo, SchemaProjector, SchemaSource, SchemaSourceError, SchemaText};
