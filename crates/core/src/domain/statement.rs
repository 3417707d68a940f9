use serde::{Deserialize, Serialize};

use crate::errors::QueryError;

/// Raw output of one generation call, kept only for the lifetime of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedStatement {
    pub question: String,
    pub schema_text: String,
    pub raw_output: String,
    pub cleaned: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundParam {
    pub name: String,
    pub value: String,
}

impl BoundParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Placeholder spelling used inside statement text.
    pub fn placeholder(&self) -> String {
        format!(":{}", self.name)
    }
}

/// A validated read-only statement plus the values for its named placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuardedStatement {
    text: String,
    params: Vec<BoundParam>,
}

impl GuardedStatement {
    pub fn new(text: impl Into<String>, params: Vec<BoundParam>) -> Result<Self, QueryError> {
        let text = text.into();
        if !is_select_statement(&text) {
            return Err(QueryError::unsafe_statement(format!(
                "first token is `{}`, expected SELECT",
                leading_keyword(&text)
            )));
        }
        Ok(Self { text, params })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|param| param.name == name).map(|param| param.value.as_str())
    }
}

/// First run of ASCII letters after leading whitespace.
pub fn leading_keyword(text: &str) -> &str {
    let trimmed = text.trim_start();
    let end = trimmed.find(|ch: char| !ch.is_ascii_alphabetic()).unwrap_or(trimmed.len());
    &trimmed[..end]
}

pub fn is_select_statement(text: &str) -> bool {
    leading_keyword(text).eq_ignore_ascii_case("select")
}
