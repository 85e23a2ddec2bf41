//! Scripted in-memory connection for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::connection::{
    Authenticator, BatchState, Connection, ExportBatch, ExportJob, ExportStatus, FieldDescriptor,
    FrameReceiver, JobSpec, ObjectSummary, StreamingFrame,
};
use crate::{Error, Result};

pub(crate) fn field(name: &str, field_type: &str) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_string(),
        field_type: field_type.to_string(),
        nillable: true,
        createable: true,
    }
}

pub(crate) fn eligible(name: &str) -> ObjectSummary {
    ObjectSummary {
        name: name.to_string(),
        createable: true,
        replicable: true,
        triggerable: true,
    }
}

pub(crate) fn data_message(topic: &str, replay_id: i64, entity: Option<&str>) -> StreamingFrame {
    let payload = match entity {
        Some(entity) => json!({ "ChangeEventHeader": { "entityName": entity, "changeType": "UPDATE" } }),
        None => json!({ "Context_Id__c": "ctx-1" }),
    };
    StreamingFrame::Message {
        channel: topic.to_string(),
        data: json!({ "event": { "replayId": replay_id }, "payload": payload }),
    }
}

#[derive(Default, Clone)]
struct MockObject {
    fields: Vec<FieldDescriptor>,
    polls: Vec<BatchState>,
    results: Vec<(String, Value)>,
    failing_results: Vec<String>,
    fail_job: bool,
    fail_poll: bool,
}

#[derive(Default)]
pub(crate) struct MockConnection {
    objects: HashMap<String, MockObject>,
    summaries: Vec<ObjectSummary>,
    fail_describe_all: bool,
    fail_subscribe: bool,
    calls: Mutex<Vec<String>>,
    poll_counts: Mutex<HashMap<String, usize>>,
    senders: Mutex<HashMap<String, mpsc::Sender<StreamingFrame>>>,
    subscribe_calls: Mutex<Vec<(String, Option<i64>)>>,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Eligible object whose job completes on the first poll with no results.
    pub(crate) fn with_object(mut self, name: &str, fields: Vec<FieldDescriptor>) -> Self {
        self.summaries.push(eligible(name));
        self.objects.insert(
            name.to_string(),
            MockObject {
                fields,
                polls: vec![BatchState {
                    status: ExportStatus::Completed,
                    state_message: None,
                }],
                ..Default::default()
            },
        );
        self
    }

    pub(crate) fn with_summary(mut self, summary: ObjectSummary) -> Self {
        self.summaries.push(summary);
        self
    }

    pub(crate) fn with_results(mut self, name: &str, batches: Vec<Value>) -> Self {
        let object = self.objects.entry(name.to_string()).or_default();
        object.results = batches
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("{}-r{}", name, i), v))
            .collect();
        self
    }

    pub(crate) fn with_polls(mut self, name: &str, polls: Vec<BatchState>) -> Self {
        self.objects.entry(name.to_string()).or_default().polls = polls;
        self
    }

    pub(crate) fn with_failed_batch(self, name: &str, message: &str) -> Self {
        self.with_polls(
            name,
            vec![
                BatchState {
                    status: ExportStatus::InProgress,
                    state_message: None,
                },
                BatchState {
                    status: ExportStatus::Failed,
                    state_message: Some(message.to_string()),
                },
            ],
        )
    }

    pub(crate) fn with_failing_result(mut self, name: &str, index: usize) -> Self {
        self.objects
            .entry(name.to_string())
            .or_default()
            .failing_results
            .push(format!("{}-r{}", name, index));
        self
    }

    pub(crate) fn with_failing_job(mut self, name: &str) -> Self {
        self.objects.entry(name.to_string()).or_default().fail_job = true;
        self
    }

    /// Every status poll of `name`'s batch errors.
    pub(crate) fn with_failing_poll(mut self, name: &str) -> Self {
        self.objects.entry(name.to_string()).or_default().fail_poll = true;
        self
    }

    pub(crate) fn failing_describe_all(mut self) -> Self {
        self.fail_describe_all = true;
        self
    }

    pub(crate) fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn subscribe_calls(&self) -> Vec<(String, Option<i64>)> {
        self.subscribe_calls.lock().unwrap().clone()
    }

    /// Deliver a frame to the subscriber of `topic`.
    pub(crate) async fn push(&self, topic: &str, frame: StreamingFrame) {
        let sender = self.senders.lock().unwrap().get(topic).cloned();
        sender
            .expect("topic not subscribed")
            .send(frame)
            .await
            .expect("subscriber gone");
    }

    /// Terminate the transport of `topic`.
    pub(crate) fn close(&self, topic: &str) {
        self.senders.lock().unwrap().remove(topic);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn object(&self, name: &str) -> Result<&MockObject> {
        self.objects
            .get(name)
            .ok_or_else(|| Error::RemoteRequest(format!("NOT_FOUND: {}", name)))
    }

    fn object_for_job(&self, job_id: &str) -> Result<(&str, &MockObject)> {
        let name = job_id.trim_start_matches("job-");
        self.objects
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| Error::RemoteRequest(format!("unknown job {}", job_id)))
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn instance_url(&self) -> &str {
        "https://mock.my.salesforce.com"
    }

    async fn describe(&self, object_name: &str) -> Result<Vec<FieldDescriptor>> {
        self.record(format!("describe:{}", object_name));
        Ok(self.object(object_name)?.fields.clone())
    }

    async fn describe_all(&self) -> Result<Vec<ObjectSummary>> {
        self.record("describe_all".to_string());
        if self.fail_describe_all {
            return Err(Error::RemoteRequest("describe global failed".into()));
        }
        Ok(self.summaries.clone())
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<ExportJob> {
        self.record(format!("submit_job:{}", spec.object));
        if self.object(&spec.object)?.fail_job {
            return Err(Error::RemoteRequest("job rejected".into()));
        }
        Ok(ExportJob::new(format!("job-{}", spec.object), spec.object.clone()))
    }

    async fn submit_batch(&self, job_id: &str, query: &str) -> Result<ExportBatch> {
        let (name, _) = self.object_for_job(job_id)?;
        self.record(format!("submit_batch:{}:{}", name, query));
        Ok(ExportBatch::new(format!("batch-{}", name), job_id))
    }

    async fn poll_batch(&self, job_id: &str, _batch_id: &str) -> Result<BatchState> {
        let (name, object) = self.object_for_job(job_id)?;
        self.record(format!("poll_batch:{}", name));
        if object.fail_poll {
            return Err(Error::RemoteRequest("batch status unavailable".into()));
        }
        let mut counts = self.poll_counts.lock().unwrap();
        let count = counts.entry(name.to_string()).or_insert(0);
        let state = object
            .polls
            .get(*count)
            .or_else(|| object.polls.last())
            .cloned()
            .unwrap_or(BatchState {
                status: ExportStatus::InProgress,
                state_message: None,
            });
        *count += 1;
        Ok(state)
    }

    async fn fetch_result_ids(&self, job_id: &str, _batch_id: &str) -> Result<Vec<String>> {
        let (name, object) = self.object_for_job(job_id)?;
        self.record(format!("fetch_result_ids:{}", name));
        Ok(object.results.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn fetch_result(&self, job_id: &str, _batch_id: &str, result_id: &str) -> Result<Value> {
        let (name, object) = self.object_for_job(job_id)?;
        self.record(format!("fetch_result:{}:{}", name, result_id));
        if object.failing_results.iter().any(|r| r == result_id) {
            return Err(Error::RemoteRequest(format!("result {} unavailable", result_id)));
        }
        object
            .results
            .iter()
            .find(|(id, _)| id == result_id)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::RemoteRequest(format!("unknown result {}", result_id)))
    }

    async fn subscribe(&self, topic: &str, replay_id: Option<i64>) -> Result<FrameReceiver> {
        self.subscribe_calls
            .lock()
            .unwrap()
            .push((topic.to_string(), replay_id));
        if self.fail_subscribe {
            return Err(Error::RemoteRequest("handshake rejected".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().insert(topic.to_string(), tx);
        Ok(rx)
    }

    async fn create(&self, object_name: &str, record: &Value) -> Result<Value> {
        self.record(format!("create:{}:{}", object_name, record));
        Ok(json!({ "id": "a01", "success": true, "errors": [] }))
    }
}

/// Authenticator handing out a prepared connection, or failing.
pub(crate) struct MockAuthenticator {
    connection: Option<Arc<MockConnection>>,
    pub(crate) attempts: Mutex<usize>,
}

impl MockAuthenticator {
    pub(crate) fn new(connection: Arc<MockConnection>) -> Self {
        Self {
            connection: Some(connection),
            attempts: Mutex::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            connection: None,
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate(&self) -> Result<Arc<dyn Connection>> {
        *self.attempts.lock().unwrap() += 1;
        match &self.connection {
            Some(connection) => Ok(connection.clone() as Arc<dyn Connection>),
            None => Err(Error::Authentication("INVALID_LOGIN".into())),
        }
    }
}
