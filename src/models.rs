//! Shared data model for tasks, nodes, and the wire messages nodes exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two fleets share every wire shape; only the payload variant differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetKind {
    Crawler,
    Summarizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    PrimaryLeader,
    BackupLeader,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Starting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Per-fleet task payload. Crawler tasks carry crawl options; summarizer
/// tasks carry the text to summarize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Crawl {
        url: String,
        #[serde(default = "default_max_depth")]
        max_depth: u32,
        #[serde(default = "default_crawl_timeout")]
        timeout: u32,
        #[serde(default = "default_formats")]
        formats: Vec<String>,
    },
    Summarize {
        text: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
}

impl TaskPayload {
    /// The URL this payload is keyed on for completion dedup, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            TaskPayload::Crawl { url, .. } => Some(url.as_str()),
            TaskPayload::Summarize { url, .. } => url.as_deref(),
        }
    }
}

fn default_max_depth() -> u32 {
    2
}
fn default_crawl_timeout() -> u32 {
    30
}
fn default_formats() -> Vec<String> {
    vec!["markdown".to_string(), "html".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_worker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Task {
    pub fn new(payload: TaskPayload) -> Self {
        let now = Utc::now();
        Task {
            task_id: generate_task_id(),
            payload,
            status: TaskStatus::Pending,
            assigned_worker: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.payload.url()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

pub fn generate_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// The message exchanged on `POST /heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub leader_id: Option<String>,
    #[serde(default)]
    pub tasks_count: usize,
    #[serde(default)]
    pub pending_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_crawl_timeout")]
    pub timeout: u32,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResultEntry {
    pub markdown: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub map: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMultiResponse {
    pub results: Vec<CrawlResultEntry>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeAcceptedResponse {
    pub task_id: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderChangeMessage {
    pub leader_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletedMessage {
    pub task_id: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailedMessage {
    pub task_id: String,
    pub error: String,
}

/// True if a `task_completed` payload's `result` carries the embedded
/// failure shape (`{"status": "failed", ...}`) instead of a real result.
pub fn result_is_embedded_failure(result: &serde_json::Value) -> bool {
    result
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s == "failed")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_url_follows_payload_kind() {
        let t = Task::new(TaskPayload::Crawl {
            url: "https://example.com".into(),
            max_depth: 2,
            timeout: 30,
            formats: default_formats(),
        });
        assert_eq!(t.url(), Some("https://example.com"));
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.assigned_worker.is_none());
    }

    #[test]
    fn summarize_payload_url_is_optional() {
        let t = Task::new(TaskPayload::Summarize {
            text: "hello".into(),
            url: None,
            title: None,
            source: None,
        });
        assert_eq!(t.url(), None);
    }

    #[test]
    fn terminal_status_detection() {
        let mut t = Task::new(TaskPayload::Summarize {
            text: "hello".into(),
            url: None,
            title: None,
            source: None,
        });
        assert!(!t.is_terminal());
        t.status = TaskStatus::Completed;
        assert!(t.is_terminal());
        t.status = TaskStatus::Failed;
        assert!(t.is_terminal());
    }

    #[test]
    fn embedded_failure_shape_detection() {
        let ok = serde_json::json!({"markdown": "x"});
        let failed = serde_json::json!({"status": "failed", "error": "boom"});
        assert!(!result_is_embedded_failure(&ok));
        assert!(result_is_embedded_failure(&failed));
    }
}
