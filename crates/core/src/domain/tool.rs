use serde::{Deserialize, Serialize};

/// Which capability answers a question.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolIntent {
    DocumentSearch,
    DatabaseQuery,
    WebSearch,
}

impl ToolIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentSearch => "document_search",
            Self::DatabaseQuery => "database_query",
            Self::WebSearch => "web_search",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_").replace(' ', "_");
        match normalized.as_str() {
            "document_search" | "documents" | "document" => Some(Self::DocumentSearch),
            "database_query" | "database" | "sql" => Some(Self::DatabaseQuery),
            "web_search" | "web" => Some(Self::WebSearch),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
