//! Runs guarded statements on Postgres inside a throwaway read-only transaction.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, Postgres, Row, Transaction, TypeInfo};
use tracing::warn;
use uuid::Uuid;

use supplyq_core::domain::result::QueryResult;
use supplyq_core::domain::statement::{BoundParam, GuardedStatement};
use supplyq_core::errors::QueryError;
use supplyq_core::execution::{SessionContext, StatementExecutor};

use crate::DbPool;

const INSUFFICIENT_PRIVILEGE: &str = "42501";
const SYNTAX_OR_ACCESS_RULE_CLASS: &str = "42";

pub struct PgStatementExecutor {
    pool: DbPool,
    timeout: Duration,
}

impl PgStatementExecutor {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn run(
        &self,
        statement: &GuardedStatement,
        session: &SessionContext,
    ) -> Result<QueryResult, QueryError> {
        let (sql, values) = bind_named(statement.text(), statement.params());

        let mut tx = self.pool.begin().await.map_err(classify_error)?;

        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await.map_err(classify_error)?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(session.statement_timeout_ms.to_string())
            .execute(&mut *tx)
            .await
            .map_err(classify_error)?;
        if let Some(role) = &session.session_role {
            sqlx::query("SELECT set_config('role', $1, true)")
                .bind(role)
                .execute(&mut *tx)
                .await
                .map_err(classify_error)?;
        }
        sqlx::query("SELECT set_config('request.jwt.claims', $1, true)")
            .bind(session.claims_json())
            .execute(&mut *tx)
            .await
            .map_err(classify_error)?;

        let fetched = fetch(&mut tx, &sql, &values).await;

        if let Err(error) = tx.rollback().await {
            warn!(
                event_name = "system.executor.rollback_failed",
                error = %error,
                "read-only transaction rollback failed"
            );
        }

        fetched
    }
}

async fn fetch(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    values: &[String],
) -> Result<QueryResult, QueryError> {
    let described = (&mut **tx).describe(sql).await.map_err(classify_error)?;
    let columns: Vec<String> =
        described.columns().iter().map(|column| column.name().to_string()).collect();

    let mut query = sqlx::query(sql);
    for value in values {
        query = query.bind(value);
    }

    if columns.is_empty() {
        let done = query.execute(&mut **tx).await.map_err(classify_error)?;
        return Ok(QueryResult::RowsAffected { rows_affected: done.rows_affected() });
    }

    let rows = query.fetch_all(&mut **tx).await.map_err(classify_error)?;
    Ok(rows_to_result(columns, &rows))
}

#[async_trait]
impl StatementExecutor for PgStatementExecutor {
    async fn execute(
        &self,
        statement: &GuardedStatement,
        session: &SessionContext,
    ) -> Result<QueryResult, QueryError> {
        match tokio::time::timeout(self.timeout, self.run(statement, session)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::ExecutionFailure(format!(
                "statement did not finish within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Maps a driver error onto the failure taxonomy by SQLSTATE.
pub fn classify_error(error: sqlx::Error) -> QueryError {
    match &error {
        sqlx::Error::Database(db_error) => {
            classify_sqlstate(db_error.code().as_deref(), db_error.message())
        }
        _ => QueryError::ExecutionFailure(error.to_string()),
    }
}

pub fn classify_sqlstate(code: Option<&str>, message: &str) -> QueryError {
    match code {
        Some(INSUFFICIENT_PRIVILEGE) => QueryError::AccessDenied(message.to_string()),
        Some(code) if code.starts_with(SYNTAX_OR_ACCESS_RULE_CLASS) => {
            QueryError::MalformedGeneratedQuery(format!("{code}: {message}"))
        }
        Some(code) => QueryError::ExecutionFailure(format!("{code}: {message}")),
        None => QueryError::ExecutionFailure(message.to_string()),
    }
}

/// Rewrites `:name` placeholders into `$n` positional binds.
///
/// String literals, quoted identifiers and `::` casts are copied through untouched.
/// A name used twice reuses its first position. Placeholders without a matching param
/// are left in place so the server reports them.
pub fn bind_named(text: &str, params: &[BoundParam]) -> (String, Vec<String>) {
    if params.is_empty() {
        return (text.to_string(), Vec::new());
    }

    let chars = text.chars().collect::<Vec<_>>();
    let mut output = String::with_capacity(text.len());
    let mut values: Vec<String> = Vec::new();
    let mut positions: Vec<&str> = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            '\'' | '"' => {
                let end = closing_quote(&chars, index);
                output.extend(&chars[index..end]);
                index = end;
            }
            ':' if chars.get(index + 1) == Some(&':') => {
                output.push_str("::");
                index += 2;
            }
            ':' if chars.get(index + 1).is_some_and(|next| is_ident_start(*next)) => {
                let start = index + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name = chars[start..end].iter().collect::<String>();
                match params.iter().find(|param| param.name == name) {
                    Some(param) => {
                        let known = positions.iter().position(|known| *known == param.name);
                        let position = match known {
                            Some(existing) => existing + 1,
                            None => {
                                positions.push(param.name.as_str());
                                values.push(param.value.clone());
                                values.len()
                            }
                        };
                        output.push('$');
                        output.push_str(&position.to_string());
                    }
                    None => {
                        output.push(':');
                        output.push_str(&name);
                    }
                }
                index = end;
            }
            _ => {
                output.push(ch);
                index += 1;
            }
        }
    }

    (output, values)
}

fn closing_quote(chars: &[char], open: usize) -> usize {
    let quote = chars[open];
    let mut index = open + 1;
    while index < chars.len() {
        if chars[index] == quote {
            if chars.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    chars.len()
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn rows_to_result(columns: Vec<String>, rows: &[PgRow]) -> QueryResult {
    let rows = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| (column.name().to_string(), cell_to_string(row, column.ordinal())))
                .collect::<BTreeMap<_, _>>()
        })
        .collect();

    QueryResult::Rows { columns, rows }
}

/// Renders one cell as text, choosing the decoder from the column's Postgres type.
pub fn cell_to_string(row: &PgRow, index: usize) -> String {
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    let rendered = match type_name.as_str() {
        "BOOL" => decode::<bool>(row, index),
        "INT2" => decode::<i16>(row, index),
        "INT4" => decode::<i32>(row, index),
        "INT8" => decode::<i64>(row, index),
        "FLOAT4" => decode::<f32>(row, index),
        "FLOAT8" => decode::<f64>(row, index),
        "NUMERIC" => decode::<Decimal>(row, index),
        "DATE" => decode::<NaiveDate>(row, index),
        "TIME" => decode::<NaiveTime>(row, index),
        "TIMESTAMP" => decode::<NaiveDateTime>(row, index),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, index),
        "UUID" => decode::<Uuid>(row, index),
        "JSON" | "JSONB" => decode::<Value>(row, index),
        "INTERVAL" => row.try_get::<Option<PgInterval>, _>(index).ok().map(|value| {
            value.map_or_else(
                || "NULL".to_string(),
                |interval| {
                    format_interval(interval.months, interval.days, interval.microseconds)
                },
            )
        }),
        "MONEY" => row.try_get::<Option<PgMoney>, _>(index).ok().map(|value| {
            value.map_or_else(|| "NULL".to_string(), |money| money.to_decimal(2).to_string())
        }),
        "BOOL[]" => decode_array::<bool>(row, index),
        "INT2[]" => decode_array::<i16>(row, index),
        "INT4[]" => decode_array::<i32>(row, index),
        "INT8[]" => decode_array::<i64>(row, index),
        "FLOAT8[]" => decode_array::<f64>(row, index),
        "NUMERIC[]" => decode_array::<Decimal>(row, index),
        "TEXT[]" | "VARCHAR[]" => decode_array::<String>(row, index),
        _ => decode::<String>(row, index),
    };
    rendered
        .or_else(|| decode_text(row, index))
        .unwrap_or_else(|| format!("<unsupported {type_name}>"))
}

// Enums, domains and extension types such as citext arrive as UTF-8 text on the wire.
fn decode_text(row: &PgRow, index: usize) -> Option<String> {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(Some(value)) => Some(value),
        Ok(None) => Some("NULL".to_string()),
        Err(_) => None,
    }
}

fn decode_array<'r, T>(row: &'r PgRow, index: usize) -> Option<String>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + ToString,
    Vec<T>: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    match row.try_get::<Option<Vec<T>>, _>(index) {
        Ok(Some(values)) => Some(format!(
            "{{{}}}",
            values.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
        )),
        Ok(None) => Some("NULL".to_string()),
        Err(_) => None,
    }
}

/// Renders an interval the way Postgres prints it with the default `IntervalStyle`.
pub fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    for (amount, unit) in [(years, "year"), (months, "mon"), (days, "day")] {
        if amount != 0 {
            let plural = if amount.abs() == 1 { "" } else { "s" };
            parts.push(format!("{amount} {unit}{plural}"));
        }
    }

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let (seconds, fraction) = (total / 1_000_000, total % 1_000_000);
        let mut clock = format!(
            "{sign}{:02}:{:02}:{:02}",
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        );
        if fraction != 0 {
            let digits = format!("{fraction:06}");
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }

    parts.join(" ")
}

fn decode<'r, T>(row: &'r PgRow, index: usize) -> Option<String>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + ToString,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(value)) => Some(value.to_string()),
        Ok(None) => Some("NULL".to_string()),
        Err(_) => None,
    }
}
