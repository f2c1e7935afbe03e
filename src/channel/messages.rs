//! Typed payloads for every topic
//!
//! Each payload is validated at decode time; a message that fails validation is
//! malformed and must be acknowledged and dropped by the consumer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Topic prefix for task messages; each worker consumes `crawl-tasks.<worker-id>`
pub const TASKS_TOPIC: &str = "crawl-tasks";

/// Topic on which workers report task outcomes
pub const RESULTS_TOPIC: &str = "crawl-results";

/// Topic on which workers report liveness
pub const HEARTBEATS_TOPIC: &str = "crawler-heartbeats";

/// Topic on which the coordinator publishes dashboard snapshots
pub const DASHBOARD_TOPIC: &str = "crawler-dashboard";

/// Topic consumed by the external document index
pub const INDEX_TOPIC: &str = "index-tasks";

/// Returns the task topic a given worker consumes
pub fn worker_task_topic(worker_id: &str) -> String {
    format!("{}.{}", TASKS_TOPIC, worker_id)
}

/// Errors raised while encoding or validating a payload
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// A payload with field-level validation beyond what serde enforces
pub trait Payload: Serialize + DeserializeOwned {
    fn validate(&self) -> Result<(), MessageError>;
}

/// Decodes and validates a JSON payload
pub fn decode<T: Payload>(bytes: &[u8]) -> Result<T, MessageError> {
    let message: T = serde_json::from_slice(bytes)?;
    message.validate()?;
    Ok(message)
}

/// Encodes a payload as JSON
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, MessageError> {
    Ok(serde_json::to_vec(message)?)
}

fn require(value: &str, field: &'static str) -> Result<(), MessageError> {
    if value.trim().is_empty() {
        Err(MessageError::MissingField(field))
    } else {
        Ok(())
    }
}

fn require_url(value: &str, field: &'static str) -> Result<(), MessageError> {
    require(value, field)?;
    Url::parse(value).map_err(|e| MessageError::InvalidField {
        field,
        message: e.to_string(),
    })?;
    Ok(())
}

/// `crawl-tasks`: one unit of work for a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl Payload for TaskMessage {
    fn validate(&self) -> Result<(), MessageError> {
        require(&self.task_id, "task_id")?;
        require_url(&self.url, "url")
    }
}

/// Outcome reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Crawled,
    Error,
}

/// `crawl-results`: outcome of one task attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task_id: String,
    pub status: ResultStatus,
    pub crawler_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Outbound links discovered on the page
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the worker handed the page to the document index
    #[serde(default)]
    pub indexed: bool,
}

impl Payload for ResultMessage {
    fn validate(&self) -> Result<(), MessageError> {
        require(&self.task_id, "task_id")?;
        require(&self.crawler_id, "crawler_id")
    }
}

/// `crawler-heartbeats`: liveness signal from a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub crawler_id: String,
    /// Worker clock, seconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Payload for HeartbeatMessage {
    fn validate(&self) -> Result<(), MessageError> {
        require(&self.crawler_id, "crawler_id")?;
        if let Some(task_id) = &self.task_id {
            require(task_id, "task_id")?;
        }
        Ok(())
    }
}

/// `index-tasks`: page content handed to the external document index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub url: String,
    pub title: String,
    pub content: String,
}

impl Payload for IndexDocument {
    fn validate(&self) -> Result<(), MessageError> {
        require_url(&self.url, "url")
    }
}
