use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DISPLAY_LIMIT: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    Rows { columns: Vec<String>, rows: Vec<BTreeMap<String, String>> },
    RowsAffected { rows_affected: u64 },
}

/// Formatted outcome of a database question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAnswer {
    pub answer_text: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
    pub rows_shown: usize,
    pub total_rows: usize,
}

impl DataAnswer {
    pub fn from_result(sql: &str, result: QueryResult, display_limit: usize) -> Self {
        match result {
            QueryResult::Rows { columns, mut rows } => {
                let total_rows = rows.len();
                rows.truncate(display_limit);
                let rows_shown = rows.len();
                let answer_text = render_rows(sql, &columns, &rows, total_rows);
                Self { answer_text, sql: sql.to_string(), columns, rows, rows_shown, total_rows }
            }
            QueryResult::RowsAffected { rows_affected } => Self {
                answer_text: format!(
                    "SQL executed: {sql}\nStatement completed without returning rows ({rows_affected} row(s) affected)."
                ),
                sql: sql.to_string(),
                columns: Vec::new(),
                rows: Vec::new(),
                rows_shown: 0,
                total_rows: 0,
            },
        }
    }
}

fn render_rows(
    sql: &str,
    columns: &[String],
    rows: &[BTreeMap<String, String>],
    total_rows: usize,
) -> String {
    if total_rows == 0 {
        return format!("SQL executed: {sql}\nThe query ran successfully but returned no results.");
    }

    let mut lines = vec![
        format!("SQL executed: {sql}"),
        format!("Returned {total_rows} row(s); showing {}:", rows.len()),
    ];
    for row in rows {
        let cells = columns
            .iter()
            .map(|column| {
                let value = row.get(column).map(String::as_str).unwrap_or("NULL");
                format!("{column}: {value}")
            })
            .collect::<Vec<_>>();
        lines.push(format!("- {}", cells.join(", ")));
    }
    lines.join("\n")
}
