use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;

/// One field as reported by a remote describe call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub nillable: bool,
    #[serde(default)]
    pub createable: bool,
}

/// Entry of the global describe listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSummary {
    pub name: String,
    #[serde(default)]
    pub createable: bool,
    #[serde(default, rename = "replicateable")]
    pub replicable: bool,
    #[serde(default)]
    pub triggerable: bool,
}

/// Request body for a new bulk job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub operation: String,
    pub object: String,
    pub content_type: String,
}

impl JobSpec {
    pub fn query(object: impl Into<String>) -> Self {
        Self {
            operation: "query".to_string(),
            object: object.into(),
            content_type: "JSON".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Failed)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A remote bulk-query job, owned by the extraction of one object.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: String,
    pub object_name: String,
    pub status: ExportStatus,
    pub state_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExportJob {
    pub fn new(id: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_name: object_name.into(),
            status: ExportStatus::Pending,
            state_message: None,
            created_at: Utc::now(),
        }
    }
}

/// The single query batch submitted under a job.
#[derive(Debug, Clone)]
pub struct ExportBatch {
    pub id: String,
    pub job_id: String,
    pub result_ids: Vec<String>,
}

impl ExportBatch {
    pub fn new(id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            result_ids: Vec::new(),
        }
    }
}

/// Snapshot returned by one batch status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchState {
    pub status: ExportStatus,
    pub state_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Advice {
    #[serde(default)]
    pub reconnect: Option<String>,
}

/// Protocol-level frame of the streaming transport (`/meta/*` channels).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaFrame {
    pub channel: String,
    #[serde(default)]
    pub successful: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub advice: Option<Advice>,
    #[serde(default)]
    pub ext: Option<Value>,
}

impl MetaFrame {
    /// Handshake/connect reply telling the client never to reconnect, which
    /// is how the remote signals that the session's authentication was lost.
    pub fn is_auth_failure(&self) -> bool {
        (self.channel == "/meta/connect" || self.channel == "/meta/handshake")
            && self
                .advice
                .as_ref()
                .and_then(|a| a.reconnect.as_deref())
                == Some("none")
    }
}

/// Everything the streaming transport hands to an observer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingFrame {
    Meta(MetaFrame),
    /// Data message; the value is the message `data` member
    /// (`{"event": {"replayId": ..}, "payload": {..}}`).
    Message { channel: String, data: Value },
}

pub type FrameReceiver = mpsc::Receiver<StreamingFrame>;

/// Authenticated handle to the remote source.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Base URL of the remote instance, for logging.
    fn instance_url(&self) -> &str;

    async fn describe(&self, object_name: &str) -> Result<Vec<FieldDescriptor>>;

    async fn describe_all(&self) -> Result<Vec<ObjectSummary>>;

    async fn submit_job(&self, spec: &JobSpec) -> Result<ExportJob>;

    async fn submit_batch(&self, job_id: &str, query: &str) -> Result<ExportBatch>;

    async fn poll_batch(&self, job_id: &str, batch_id: &str) -> Result<BatchState>;

    async fn fetch_result_ids(&self, job_id: &str, batch_id: &str) -> Result<Vec<String>>;

    async fn fetch_result(&self, job_id: &str, batch_id: &str, result_id: &str) -> Result<Value>;

    /// Subscribe to a live topic, replaying after `replay_id` when given.
    ///
    /// Resolves once the subscription handshake succeeded. Every inbound
    /// frame, meta frames included, is forwarded on the returned channel,
    /// which closes when the transport terminates.
    async fn subscribe(&self, topic: &str, replay_id: Option<i64>) -> Result<FrameReceiver>;

    /// Create a record of `object_name`; returns the remote save result.
    async fn create(&self, object_name: &str, record: &Value) -> Result<Value>;
}

/// Produces the authenticated connection at the start of a run.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Arc<dyn Connection>>;
}
