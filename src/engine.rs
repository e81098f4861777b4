//! Narrow contracts for the collaborators a worker delegates actual work to.
//! The page-extraction and summarization engines themselves are out of
//! scope; the crate ships deterministic in-memory stand-ins so the
//! coordination core is exercisable on its own.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::models::TaskPayload;

#[derive(Debug, thiserror::Error)]
#[error("engine error: {0}")]
pub struct EngineError(pub String);

#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, url: &str, max_depth: u32, formats: &[String]) -> Result<serde_json::Value, EngineError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, title: Option<&str>, source: Option<&str>) -> Result<serde_json::Value, EngineError>;
}

/// Deterministic stand-in: "extracts" a page by echoing the URL into a
/// markdown stub. Never fails, never touches the network.
pub struct MockPageExtractor;

#[async_trait]
impl PageExtractor for MockPageExtractor {
    async fn extract(&self, url: &str, _max_depth: u32, formats: &[String]) -> Result<serde_json::Value, EngineError> {
        Ok(json!({
            "markdown": format!("# {url}\n\n(mock extraction, formats={formats:?})"),
            "url": url,
            "timestamp": Utc::now(),
            "map": [url],
        }))
    }
}

/// Deterministic stand-in: "summarizes" by truncating the input text.
pub struct MockSummarizer;

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, text: &str, title: Option<&str>, source: Option<&str>) -> Result<serde_json::Value, EngineError> {
        let truncated: String = text.chars().take(200).collect();
        Ok(json!({
            "summary": truncated,
            "title": title.unwrap_or("Untitled"),
            "source": source,
        }))
    }
}

/// Run a task's payload through whichever engine applies, returning the
/// result object the leader expects on `/worker/task_completed`.
pub async fn execute(
    payload: &TaskPayload,
    extractor: &dyn PageExtractor,
    summarizer: &dyn Summarizer,
) -> Result<serde_json::Value, EngineError> {
    match payload {
        TaskPayload::Crawl { url, max_depth, formats, .. } => {
            extractor.extract(url, *max_depth, formats).await
        }
        TaskPayload::Summarize { text, title, source, .. } => {
            summarizer
                .summarize(text, title.as_deref(), source.as_deref())
                .await
        }
    }
}
