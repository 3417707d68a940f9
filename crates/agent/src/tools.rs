use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

const WEB_RESULT_LIMIT: usize = 3;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool transport failure: {0}")]
    Transport(String),
    #[error("unexpected tool response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for ToolError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Response(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAnswer {
    pub answer_text: String,
    pub sources: Vec<String>,
}

/// Question answering over the policy and guideline corpus.
#[async_trait]
pub trait DocumentSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<ToolAnswer, ToolError>;
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<ToolAnswer, ToolError>;
}

/// The non-database tools a runtime was configured with.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    documents: Option<Arc<dyn DocumentSearcher>>,
    web: Option<Arc<dyn WebSearcher>>,
}

impl ToolRegistry {
    pub fn with_documents(mut self, searcher: Arc<dyn DocumentSearcher>) -> Self {
        self.documents = Some(searcher);
        self
    }

    pub fn with_web(mut self, searcher: Arc<dyn WebSearcher>) -> Self {
        self.web = Some(searcher);
        self
    }

    pub fn documents(&self) -> Option<&Arc<dyn DocumentSearcher>> {
        self.documents.as_ref()
    }

    pub fn web(&self) -> Option<&Arc<dyn WebSearcher>> {
        self.web.as_ref()
    }

    pub fn len(&self) -> usize {
        usize::from(self.documents.is_some()) + usize::from(self.web.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client for a retrieval service answering `POST {"query"}` with `{"answer", "sources"}`.
pub struct HttpDocumentSearcher {
    client: reqwest::Client,
    url: String,
}

impl HttpDocumentSearcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ToolError::Transport(error.to_string()))?;
        Ok(Self { client, url: url.into() })
    }
}

#[derive(Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
}

#[async_trait]
impl DocumentSearcher for HttpDocumentSearcher {
    async fn search(&self, query: &str) -> Result<ToolAnswer, ToolError> {
        let response = self.client.post(&self.url).json(&json!({ "query": query })).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Transport(format!("retrieval service returned {status}")));
        }
        let body = response.json::<RetrievalResponse>().await?;
        Ok(format_document_answer(body.answer.as_deref(), body.sources))
    }
}

pub fn format_document_answer(answer: Option<&str>, sources: Vec<String>) -> ToolAnswer {
    let answer = answer
        .map(str::trim)
        .filter(|answer| !answer.is_empty())
        .unwrap_or("No answer found in documents.");
    let sources = sources
        .into_iter()
        .map(|source| source.trim().to_string())
        .filter(|source| !source.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let answer_text = if sources.is_empty() {
        format!("Answer from documents: {answer}")
    } else {
        format!("Answer from documents: {answer}\nSources: {}", sources.join(", "))
    };
    ToolAnswer { answer_text, sources }
}

/// DuckDuckGo instant-answer API client.
pub struct DuckDuckGoSearcher {
    client: reqwest::Client,
    base_url: String,
}

impl DuckDuckGoSearcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("supplyq/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ToolError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl WebSearcher for DuckDuckGoSearcher {
    async fn search(&self, query: &str) -> Result<ToolAnswer, ToolError> {
        let url = format!("{}/", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Transport(format!("web search returned {status}")));
        }
        let body = response.json::<Value>().await?;
        Ok(format_web_answer(query, &body))
    }
}

pub fn format_web_answer(query: &str, body: &Value) -> ToolAnswer {
    let mut lines = Vec::new();
    let mut sources = Vec::new();

    let abstract_text = body.get("AbstractText").and_then(Value::as_str).unwrap_or("").trim();
    if !abstract_text.is_empty() {
        lines.push(abstract_text.to_string());
        if let Some(url) = non_empty_str(body.get("AbstractURL")) {
            sources.push(url.to_string());
        }
    }

    let mut topics = Vec::new();
    if let Some(related) = body.get("RelatedTopics").and_then(Value::as_array) {
        collect_topics(related, &mut topics);
    }
    for (text, url) in topics.into_iter().take(WEB_RESULT_LIMIT) {
        lines.push(format!("- {text}"));
        if let Some(url) = url {
            sources.push(url);
        }
    }

    let answer_text = if lines.is_empty() {
        format!("No web results found for \"{}\".", query.trim())
    } else {
        format!("Web results for \"{}\":\n{}", query.trim(), lines.join("\n"))
    };
    ToolAnswer { answer_text, sources }
}

fn collect_topics(related: &[Value], topics: &mut Vec<(String, Option<String>)>) {
    for topic in related {
        if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
            collect_topics(nested, topics);
            continue;
        }
        if let Some(text) = non_empty_str(topic.get("Text")) {
            topics.push((text.to_string(), non_empty_str(topic.get("FirstURL")).map(String::from)));
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{
        format_document_answer, format_web_answer, DocumentSearcher, ToolAnswer, ToolError,
        ToolRegistry,
    };

    struct Canned;

    #[async_trait]
    impl DocumentSearcher for Canned {
        async fn search(&self, _query: &str) -> Result<ToolAnswer, ToolError> {
            Ok(format_document_answer(Some("42"), Vec::new()))
        }
    }

    #[test]
    fn document_sources_are_deduplicated_and_sorted() {
        let answer = format_document_answer(
            Some("Write-offs above $10k need CFO sign-off."),
            vec![
                "writeoff_policy.pdf".to_string(),
                "code_of_conduct.pdf".to_string(),
                "writeoff_policy.pdf".to_string(),
                " ".to_string(),
            ],
        );
        assert_eq!(
            answer.answer_text,
            "Answer from documents: Write-offs above $10k need CFO sign-off.\nSources: code_of_conduct.pdf, writeoff_policy.pdf"
        );
        assert_eq!(answer.sources.len(), 2);
    }

    #[test]
    fn document_answer_without_sources_or_text() {
        let answer = format_document_answer(None, Vec::new());
        assert_eq!(answer.answer_text, "Answer from documents: No answer found in documents.");
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn web_answer_uses_abstract_and_flattened_topics() {
        let body = json!({
            "AbstractText": "A port strike is under way.",
            "AbstractURL": "https://example.org/strike",
            "RelatedTopics": [
                {"Text": "Shipping delays expected", "FirstURL": "https://example.org/delays"},
                {"Name": "Ports", "Topics": [
                    {"Text": "Rotterdam congestion", "FirstURL": "https://example.org/rotterdam"},
                    {"Text": "Long Beach backlog", "FirstURL": "https://example.org/lb"},
                    {"Text": "Never shown", "FirstURL": "https://example.org/hidden"}
                ]}
            ]
        });
        let answer = format_web_answer(" port strike ", &body);
        assert!(answer.answer_text.starts_with("Web results for \"port strike\":\nA port strike"));
        assert!(answer.answer_text.contains("- Long Beach backlog"));
        assert!(!answer.answer_text.contains("Never shown"));
        assert_eq!(answer.sources.len(), 4);
    }

    #[test]
    fn empty_web_payload_says_so() {
        let answer = format_web_answer("zzz", &json!({"AbstractText": "", "RelatedTopics": []}));
        assert_eq!(answer.answer_text, "No web results found for \"zzz\".");
    }

    #[tokio::test]
    async fn registry_tracks_configured_tools() {
        let registry = ToolRegistry::default();
        assert!(registry.is_empty());

        let registry = registry.with_documents(Arc::new(Canned));
        assert_eq!(registry.len(), 1);
        assert!(registry.web().is_none());
        let answer = registry.documents().expect("documents configured").search("q").await;
        assert!(answer.is_ok_and(|answer| answer.answer_text.ends_with("42")));
    }
}
