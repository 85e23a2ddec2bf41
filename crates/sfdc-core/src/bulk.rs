use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn, Instrument};

use crate::connection::{Connection, ExportStatus, JobSpec, ObjectSummary};
use crate::multiplexer::{Multiplexer, SourceHandle};
use crate::{schema, Context, Envelope, Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Objects that pass the eligibility flags but whose bulk query jobs are
/// rejected by the remote (they need a filter or are views).
pub const BATCH_JOB_DENYLIST: &[&str] = &[
    "AccountUserTerritory2View",
    "ContentDocumentLink",
    "ContentFolderItem",
    "ContentFolderMember",
    "IdeaComment",
    "Vote",
];

/// Whether an object may be exported: creatable, replicable, triggerable
/// and not known to fail batch jobs.
pub fn is_exportable(summary: &ObjectSummary) -> bool {
    summary.createable
        && summary.replicable
        && summary.triggerable
        && !BATCH_JOB_DENYLIST.contains(&summary.name.as_str())
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Delay before each batch status poll.
    pub poll_interval: Duration,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFailure {
    pub object: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorStatus {
    pub objects_started: u64,
    pub objects_completed: u64,
    pub objects_failed: u64,
    pub record_batches: u64,
    pub records: u64,
    pub failures: Vec<ObjectFailure>,
}

enum ObjectOutcome {
    Completed,
    Failed(String),
}

/// Drives the job → batch → poll → result state machine for each selected
/// object and emits `schema` then `records` envelopes per object.
pub struct BulkExtractor {
    connection: Arc<dyn Connection>,
    ctx: Context,
    options: BulkOptions,
    status: Arc<Mutex<ExtractorStatus>>,
}

impl BulkExtractor {
    pub fn new(connection: Arc<dyn Connection>, ctx: Context, options: BulkOptions) -> Self {
        Self {
            connection,
            ctx,
            options,
            status: Arc::new(Mutex::new(ExtractorStatus::default())),
        }
    }

    pub fn status(&self) -> ExtractorStatus {
        self.status
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Resolve the objects to export.
    ///
    /// An explicit request is validated against the exportable set and
    /// rejected as a whole if any entry is not in it. No request (or an
    /// empty one) selects every exportable object.
    pub async fn select_objects(&self, requested: Option<&[String]>) -> Result<Vec<String>> {
        let summaries = self.connection.describe_all().await?;
        let exportable: Vec<&str> = summaries
            .iter()
            .filter(|s| is_exportable(s))
            .map(|s| s.name.as_str())
            .collect();

        let selected: Vec<String> = match requested {
            Some(requested) if !requested.is_empty() => {
                let unselectable: Vec<String> = requested
                    .iter()
                    .filter(|name| !exportable.contains(&name.as_str()))
                    .cloned()
                    .collect();
                if !unselectable.is_empty() {
                    return Err(Error::UnselectableObject(unselectable));
                }
                let mut selected: Vec<String> = Vec::with_capacity(requested.len());
                for name in requested {
                    if !selected.contains(name) {
                        selected.push(name.clone());
                    }
                }
                selected
            }
            _ => exportable.iter().map(|s| s.to_string()).collect(),
        };

        info!(
            parent: self.ctx.span(),
            "Selecting {} objects: {}",
            selected.len(),
            selected.join(", ")
        );
        Ok(selected)
    }

    /// Start extracting every selected object into `output`.
    ///
    /// Returns once the selection is validated and all per-object tasks are
    /// running; `output` completes when the last object finishes. Objects
    /// run independently: one object's failure is reported and recorded in
    /// [`ExtractorStatus`] but never fails the stream or its siblings.
    pub async fn extract_all(
        &self,
        requested: Option<&[String]>,
        output: &Multiplexer,
    ) -> Result<Vec<String>> {
        let selected = self.select_objects(requested).await?;

        for object in &selected {
            let source = output.source(object.clone());
            let span = tracing::info_span!(parent: self.ctx.span(), "bulk_export", object = %object);
            let task = extract_object(
                self.connection.clone(),
                object.clone(),
                self.options.poll_interval,
                self.status.clone(),
                source,
            );
            tokio::spawn(task.instrument(span));
        }
        output.seal();

        Ok(selected)
    }
}

async fn extract_object(
    connection: Arc<dyn Connection>,
    object: String,
    poll_interval: Duration,
    status: Arc<Mutex<ExtractorStatus>>,
    source: SourceHandle,
) {
    update(&status, |s| s.objects_started += 1);
    info!("Bulk read \"{}\" records", object);

    let outcome = export_object(connection.as_ref(), &object, poll_interval, &status, &source).await;
    match outcome {
        Ok(ObjectOutcome::Completed) => {
            update(&status, |s| s.objects_completed += 1);
            info!("Bulk read \"{}\" completed", object);
        }
        Ok(ObjectOutcome::Failed(message)) => {
            error!("Bulk job for \"{}\" failed: {}", object, message);
            record_failure(&status, &object, message);
        }
        Err(e) => {
            error!("Bulk read \"{}\" failed: {}", object, e);
            record_failure(&status, &object, e.to_string());
        }
    }

    source.finish();
}

async fn export_object(
    connection: &dyn Connection,
    object: &str,
    poll_interval: Duration,
    status: &Mutex<ExtractorStatus>,
    source: &SourceHandle,
) -> Result<ObjectOutcome> {
    let schema = schema::resolve(connection, object).await?;
    source.emit(Envelope::schema(object, &schema)?);

    let mut job = connection.submit_job(&JobSpec::query(object)).await?;
    debug!(job_id = %job.id, "Created bulk job");

    let mut batch = connection
        .submit_batch(&job.id, &schema.select_query(object))
        .await?;
    debug!(batch_id = %batch.id, "Created bulk batch");

    // No attempt bound: a job stuck remotely keeps this object pending.
    loop {
        sleep(poll_interval).await;
        let state = connection.poll_batch(&job.id, &batch.id).await?;
        debug!(status = %state.status, "Batch status");
        job.status = state.status;
        job.state_message = state.state_message;
        if job.status.is_terminal() {
            break;
        }
    }

    let elapsed = chrono::Utc::now() - job.created_at;
    if job.status == ExportStatus::Failed {
        let message = job
            .state_message
            .take()
            .unwrap_or_else(|| "no state message".to_string());
        return Ok(ObjectOutcome::Failed(message));
    }
    debug!(elapsed_ms = elapsed.num_milliseconds(), "Batch completed");

    batch.result_ids = connection.fetch_result_ids(&job.id, &batch.id).await?;
    debug!("Fetching {} result sets", batch.result_ids.len());

    let job_id = job.id.as_str();
    let batch_id = batch.id.as_str();
    let mut fetches: FuturesUnordered<_> = batch
        .result_ids
        .iter()
        .map(|result_id| async move {
            let body = connection.fetch_result(job_id, batch_id, result_id).await;
            (result_id, body)
        })
        .collect();

    while let Some((result_id, body)) = fetches.next().await {
        match body {
            Ok(records) if is_empty_result(&records) => {
                debug!(result_id = %result_id, "Empty result set");
            }
            Ok(records) => {
                let envelope = Envelope::records(object, records);
                let count = envelope.record_count() as u64;
                if source.emit(envelope) {
                    update(status, |s| {
                        s.record_batches += 1;
                        s.records += count;
                    });
                }
            }
            Err(e) => {
                warn!(result_id = %result_id, "Failed to fetch result: {}", e);
                update(status, |s| {
                    s.failures.push(ObjectFailure {
                        object: object.to_string(),
                        message: format!("result {}: {}", result_id, e),
                    })
                });
            }
        }
    }

    Ok(ObjectOutcome::Completed)
}

fn is_empty_result(records: &Value) -> bool {
    match records {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn update(status: &Mutex<ExtractorStatus>, f: impl FnOnce(&mut ExtractorStatus)) {
    f(&mut status.lock().unwrap_or_else(|p| p.into_inner()));
}

fn record_failure(status: &Mutex<ExtractorStatus>, object: &str, message: String) {
    update(status, |s| {
        s.objects_failed += 1;
        s.failures.push(ObjectFailure {
            object: object.to_string(),
            message,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BatchState;
    use crate::stream::{EnvelopeStream, StreamState};
    use crate::test_support::{field, MockConnection};
    use crate::EnvelopeKind;
    use serde_json::json;

    fn options() -> BulkOptions {
        BulkOptions {
            poll_interval: Duration::from_millis(1),
        }
    }

    fn fields() -> Vec<crate::connection::FieldDescriptor> {
        vec![field("Id", "id"), field("Name", "string"), field("MailingAddress", "address")]
    }

    async fn run(
        connection: MockConnection,
        requested: Option<Vec<String>>,
    ) -> (Arc<MockConnection>, BulkExtractor, Vec<Arc<Envelope>>, StreamState) {
        let connection = Arc::new(connection);
        let extractor = BulkExtractor::new(connection.clone(), Context::default(), options());
        let mux = Multiplexer::new(EnvelopeStream::new("bulk"));
        let subscription = mux.output().subscribe();

        extractor
            .extract_all(requested.as_deref(), &mux)
            .await
            .unwrap();
        let (envelopes, state) = subscription.collect().await;
        (connection, extractor, envelopes, state)
    }

    #[tokio::test]
    async fn test_schema_precedes_records_per_object() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_results("Account", vec![json!([{ "Id": "1" }]), json!([{ "Id": "2" }])])
            .with_object("Contact", fields())
            .with_results("Contact", vec![json!([{ "Id": "3" }])]);

        let (_, extractor, envelopes, state) =
            run(connection, Some(vec!["Account".into(), "Contact".into()])).await;

        assert!(matches!(state, StreamState::Completed));
        for name in ["Account", "Contact"] {
            let kinds: Vec<EnvelopeKind> = envelopes
                .iter()
                .filter(|e| e.name == name)
                .map(|e| e.kind)
                .collect();
            assert_eq!(kinds[0], EnvelopeKind::Schema);
            assert!(kinds[1..].iter().all(|k| *k == EnvelopeKind::Records));
        }
        let status = extractor.status();
        assert_eq!(status.objects_completed, 2);
        assert_eq!(status.record_batches, 3);
    }

    #[tokio::test]
    async fn test_steps_strictly_ordered_per_object() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_polls(
                "Account",
                vec![
                    BatchState { status: ExportStatus::Pending, state_message: None },
                    BatchState { status: ExportStatus::InProgress, state_message: None },
                    BatchState { status: ExportStatus::Completed, state_message: None },
                ],
            )
            .with_results("Account", vec![json!([{ "Id": "1" }])]);

        let (connection, _, _, _) = run(connection, Some(vec!["Account".into()])).await;

        let calls: Vec<String> = connection
            .calls()
            .into_iter()
            .filter(|c| c != "describe_all")
            .collect();
        assert_eq!(
            calls,
            vec![
                "describe:Account",
                "submit_job:Account",
                "submit_batch:Account:SELECT Id, Name FROM Account",
                "poll_batch:Account",
                "poll_batch:Account",
                "poll_batch:Account",
                "fetch_result_ids:Account",
                "fetch_result:Account:Account-r0",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_job_emits_no_records_and_spares_siblings() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_failed_batch("Account", "row limit exceeded")
            .with_object("Contact", fields())
            .with_results("Contact", vec![json!([{ "Id": "3" }])]);

        let (_, extractor, envelopes, state) =
            run(connection, Some(vec!["Account".into(), "Contact".into()])).await;

        assert!(matches!(state, StreamState::Completed));
        assert!(!envelopes
            .iter()
            .any(|e| e.name == "Account" && e.kind == EnvelopeKind::Records));
        assert!(envelopes
            .iter()
            .any(|e| e.name == "Contact" && e.kind == EnvelopeKind::Records));

        let status = extractor.status();
        assert_eq!(status.objects_failed, 1);
        assert_eq!(
            status.failures,
            vec![ObjectFailure {
                object: "Account".into(),
                message: "row limit exceeded".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_zero_results_completes() {
        let connection = MockConnection::new().with_object("Account", fields());

        let (_, _, envelopes, state) = run(connection, None).await;

        assert!(matches!(state, StreamState::Completed));
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, EnvelopeKind::Schema);
    }

    #[tokio::test]
    async fn test_empty_result_bodies_skipped() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_results("Account", vec![json!([]), json!([{ "Id": "1" }])]);

        let (_, _, envelopes, _) = run(connection, None).await;

        let records: Vec<_> = envelopes
            .iter()
            .filter(|e| e.kind == EnvelopeKind::Records)
            .collect();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_result_fetch_still_completes_object() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_results(
                "Account",
                vec![json!([{ "Id": "1" }]), json!([{ "Id": "2" }]), json!([{ "Id": "3" }])],
            )
            .with_failing_result("Account", 1);

        let (_, extractor, envelopes, state) = run(connection, None).await;

        assert!(matches!(state, StreamState::Completed));
        let mut ids: Vec<&str> = envelopes
            .iter()
            .filter(|e| e.kind == EnvelopeKind::Records)
            .filter_map(|e| e.content[0]["Id"].as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "3"]);

        let status = extractor.status();
        assert_eq!(status.objects_completed, 1);
        assert_eq!(status.objects_failed, 0);
        assert_eq!(status.record_batches, 2);
        assert_eq!(status.failures.len(), 1);
        assert!(status.failures[0].message.contains("Account-r1"));
    }

    #[tokio::test]
    async fn test_poll_error_is_per_object() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_failing_poll("Account")
            .with_object("Contact", fields())
            .with_results("Contact", vec![json!([{ "Id": "3" }])]);

        let (connection, extractor, envelopes, state) =
            run(connection, Some(vec!["Account".into(), "Contact".into()])).await;

        assert!(matches!(state, StreamState::Completed));
        assert!(!envelopes
            .iter()
            .any(|e| e.name == "Account" && e.kind == EnvelopeKind::Records));
        assert!(envelopes
            .iter()
            .any(|e| e.name == "Contact" && e.kind == EnvelopeKind::Records));
        assert!(!connection.calls().contains(&"fetch_result_ids:Account".to_string()));

        let status = extractor.status();
        assert_eq!(status.objects_completed, 1);
        assert_eq!(status.objects_failed, 1);
        assert_eq!(status.failures[0].object, "Account");
        assert!(status.failures[0].message.contains("batch status unavailable"));
    }

    #[tokio::test]
    async fn test_describe_failure_is_per_object() {
        let connection = MockConnection::new()
            .with_summary(crate::test_support::eligible("Ghost__c"))
            .with_object("Contact", fields());

        let (_, extractor, envelopes, state) = run(connection, None).await;

        assert!(matches!(state, StreamState::Completed));
        assert!(envelopes.iter().all(|e| e.name == "Contact"));
        assert_eq!(extractor.status().objects_failed, 1);
    }

    #[tokio::test]
    async fn test_job_submission_failure_is_per_object() {
        let connection = MockConnection::new()
            .with_object("Account", fields())
            .with_failing_job("Account");

        let (_, extractor, envelopes, state) = run(connection, None).await;

        assert!(matches!(state, StreamState::Completed));
        assert_eq!(envelopes.len(), 1);
        assert_eq!(extractor.status().objects_failed, 1);
    }

    #[tokio::test]
    async fn test_unselectable_object_rejected() {
        let connection = Arc::new(
            MockConnection::new()
                .with_object("Account", fields())
                .with_object("Vote", fields())
                .with_summary(ObjectSummary {
                    name: "AuditTrail".into(),
                    createable: false,
                    replicable: true,
                    triggerable: false,
                }),
        );
        let extractor = BulkExtractor::new(connection, Context::default(), options());

        let requested = vec!["Account".to_string(), "AuditTrail".to_string(), "Vote".to_string()];
        let err = extractor.select_objects(Some(&requested)).await.unwrap_err();

        match err {
            Error::UnselectableObject(names) => assert_eq!(names, vec!["AuditTrail", "Vote"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_selection_is_exportable_set() {
        let connection = Arc::new(
            MockConnection::new()
                .with_object("Account", fields())
                .with_object("IdeaComment", fields())
                .with_object("Contact", fields()),
        );
        let extractor = BulkExtractor::new(connection, Context::default(), options());

        let selected = extractor.select_objects(None).await.unwrap();
        assert_eq!(selected, vec!["Account", "Contact"]);

        let duplicated = vec!["Contact".to_string(), "Contact".to_string()];
        let selected = extractor.select_objects(Some(&duplicated)).await.unwrap();
        assert_eq!(selected, vec!["Contact"]);
    }
}
