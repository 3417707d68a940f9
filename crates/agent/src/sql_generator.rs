use std::sync::Arc;
use std::time::Duration;

use tera::{Context, Tera};
use tracing::debug;

use supplyq_core::domain::statement::GeneratedStatement;
use supplyq_core::errors::QueryError;
use supplyq_core::schema::SchemaText;

use crate::llm::{GenerationError, TextGenerator};

const SQL_PROMPT_TEMPLATE: &str = r#"You are a PostgreSQL analyst for a supply-chain dataset. Translate the user question into one syntactically valid PostgreSQL SELECT statement.
Reply with the SQL statement only: no explanation, no markdown, no surrounding text.
Quote a table or column name only when it contains spaces or special characters or is a reserved word. Unquoted names are stored lowercase.
Use only the tables and columns listed below.

Database schema:
---
{{ schema }}
---

Question: {{ question }}

PostgreSQL query:
"#;

const ANSWER_LABEL: &str = "sql query:";
const FENCE: &str = "```";
const FENCE_TAGS: [&str; 4] = ["sql", "postgresql", "postgres", "pgsql"];

/// Turns a question plus a role-filtered schema into candidate SQL text.
pub struct SqlGenerator {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaText,
    ) -> Result<GeneratedStatement, QueryError> {
        let prompt = render_prompt(question, schema)?;

        let raw_output = match tokio::time::timeout(self.timeout, self.generator.complete(&prompt))
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => return Err(unavailable(self.generator.provider(), error)),
            Err(_) => return Err(unavailable(self.generator.provider(), GenerationError::Timeout)),
        };

        let cleaned = clean_generated_sql(&raw_output);
        debug!(
            event_name = "agent.sql.generated",
            provider = self.generator.provider(),
            sql = %cleaned,
            "language model produced candidate sql"
        );
        if cleaned.is_empty() {
            return Err(QueryError::EmptyGeneration);
        }

        Ok(GeneratedStatement {
            question: question.to_string(),
            schema_text: schema.as_str().to_string(),
            raw_output,
            cleaned,
        })
    }
}

fn unavailable(provider: &str, error: GenerationError) -> QueryError {
    QueryError::GenerationUnavailable(format!("{provider}: {error}"))
}

pub fn render_prompt(question: &str, schema: &SchemaText) -> Result<String, QueryError> {
    let mut context = Context::new();
    context.insert("schema", schema.as_str());
    context.insert("question", question.trim());
    Tera::one_off(SQL_PROMPT_TEMPLATE, &context, false).map_err(|error| {
        QueryError::GenerationUnavailable(format!("prompt render failed: {error}"))
    })
}

/// Strips the answer label and markdown fences models like to wrap SQL in.
pub fn clean_generated_sql(raw: &str) -> String {
    let mut text = raw.trim();

    if text.len() >= ANSWER_LABEL.len()
        && text.is_char_boundary(ANSWER_LABEL.len())
        && text[..ANSWER_LABEL.len()].eq_ignore_ascii_case(ANSWER_LABEL)
    {
        text = text[ANSWER_LABEL.len()..].trim();
    }

    if let Some(rest) = text.strip_prefix(FENCE) {
        text = rest[fence_tag_len(rest)..].trim();
    }

    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest.trim();
    }

    text.to_string()
}

// A run after the opening fence is a language tag when it is a known SQL tag or sits
// alone on the fence line. Otherwise it is the start of the statement.
fn fence_tag_len(rest: &str) -> usize {
    let tag_len = rest.find(|ch: char| !ch.is_ascii_alphanumeric()).unwrap_or(rest.len());
    let tag = &rest[..tag_len];
    let after = &rest[tag_len..];

    let known = FENCE_TAGS.iter().any(|known| tag.eq_ignore_ascii_case(known))
        && after.chars().next().map_or(true, char::is_whitespace);
    let own_line = after.trim_start_matches([' ', '\t', '\r']).starts_with('\n');

    if known || own_line {
        tag_len
    } else {
        0
    }
}
