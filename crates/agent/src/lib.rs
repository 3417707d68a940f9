//! Agent runtime for the supply-chain query gateway.
//!
//! The language model is strictly a translator from question to candidate SQL. What the
//! caller may see is decided by the access policy, the guard, and the restricted session
//! on the data store, never by model output.
//!
//! # Request flow
//!
//! 1. **Routing** (`runtime`) - keyword intent: documents, web, or database
//! 2. **Generation** (`sql_generator`, `llm`) - role-filtered schema in, SQL text out
//! 3. **Guard** (`guard`) - SELECT-only gate and regional predicate injection
//! 4. **Execution** (`pipeline`) - read-only session, formatted rows, one audit record

pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod sql_generator;
pub mod tools;

pub use guard::QueryGuard;
pub use llm::{build_generator, GenerationError, TextGenerator};
pub use pipeline::{DataQueryPipeline, PipelineSettings};
pub use runtime::{AgentRequest, AgentResponse, AgentRuntime, IntentRouter};
pub use sql_generator::SqlGenerator;
pub use tools::{
    DocumentSearcher, DuckDuckGoSearcher, HttpDocumentSearcher, ToolAnswer, ToolError,
    ToolRegistry, WebSearcher,
};
