use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sfdc_core::{
    BatchState, Connection, Error, ExportBatch, ExportJob, ExportStatus, FieldDescriptor,
    FrameReceiver, JobSpec, ObjectSummary, Result,
};
use tracing::debug;

use crate::streaming::Cometd;

#[derive(Debug, Deserialize)]
struct DescribeResult {
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Deserialize)]
struct GlobalDescribe {
    sobjects: Vec<ObjectSummary>,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    id: String,
    object: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchInfo {
    id: String,
    job_id: String,
    state: String,
    #[serde(default)]
    state_message: Option<String>,
}

/// Map a remote bulk batch state onto the extractor's states.
pub fn map_batch_state(state: &str) -> Result<ExportStatus> {
    match state {
        "Queued" => Ok(ExportStatus::Pending),
        "InProgress" => Ok(ExportStatus::InProgress),
        "Completed" => Ok(ExportStatus::Completed),
        "Failed" | "NotProcessed" => Ok(ExportStatus::Failed),
        other => Err(Error::RemoteRequest(format!("Unknown batch state '{}'", other))),
    }
}

/// Authenticated REST, bulk and streaming access to one org.
pub struct SalesforceConnection {
    http: Client,
    instance_url: String,
    access_token: String,
    api_version: String,
    cometd: Cometd,
}

impl SalesforceConnection {
    pub fn new(
        http: Client,
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let instance_url = instance_url.into().trim_end_matches('/').to_string();
        let access_token = access_token.into();
        let api_version = api_version.into();
        let cometd = Cometd::new(http.clone(), &instance_url, &api_version, &access_token);
        Self {
            http,
            instance_url,
            access_token,
            api_version,
            cometd,
        }
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}/services/data/v{}{}", self.instance_url, self.api_version, path)
    }

    fn async_url(&self, path: &str) -> String {
        format!("{}/services/async/{}{}", self.instance_url, self.api_version, path)
    }

    fn rest(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }

    fn bulk(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-SFDC-Session", &self.access_token)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(format!("{} request failed: {}", what, e)))?;
        read_json(response, what).await
    }

    async fn batch_info(&self, job_id: &str, batch_id: &str) -> Result<BatchInfo> {
        let url = self.async_url(&format!("/job/{}/batch/{}", job_id, batch_id));
        self.send(self.bulk(self.http.get(url)), "Batch status").await
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Authentication(format!(
            "{} rejected the session: {}",
            what,
            body.trim()
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::RemoteRequest(format!(
            "{} failed ({}): {}",
            what,
            status,
            body.trim()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::RemoteRequest(format!("{} returned an unexpected body: {}", what, e)))
}

#[async_trait]
impl Connection for SalesforceConnection {
    fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn describe(&self, object_name: &str) -> Result<Vec<FieldDescriptor>> {
        let url = self.data_url(&format!("/sobjects/{}/describe", object_name));
        let description: DescribeResult = self
            .send(self.rest(self.http.get(url)), &format!("Describe {}", object_name))
            .await?;
        Ok(description.fields)
    }

    async fn describe_all(&self) -> Result<Vec<ObjectSummary>> {
        let listing: GlobalDescribe = self
            .send(self.rest(self.http.get(self.data_url("/sobjects"))), "Describe global")
            .await?;
        Ok(listing.sobjects)
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<ExportJob> {
        let request = self.bulk(self.http.post(self.async_url("/job"))).json(spec);
        let job: JobInfo = self.send(request, "Create job").await?;
        debug!(job_id = %job.id, "New job for {}", job.object);
        Ok(ExportJob::new(job.id, job.object))
    }

    async fn submit_batch(&self, job_id: &str, query: &str) -> Result<ExportBatch> {
        let url = self.async_url(&format!("/job/{}/batch", job_id));
        let request = self.bulk(self.http.post(url)).body(query.to_string());
        let batch: BatchInfo = self.send(request, "Create batch").await?;
        debug!(batch_id = %batch.id, state = %batch.state, "New batch");
        Ok(ExportBatch::new(batch.id, batch.job_id))
    }

    async fn poll_batch(&self, job_id: &str, batch_id: &str) -> Result<BatchState> {
        let info = self.batch_info(job_id, batch_id).await?;
        Ok(BatchState {
            status: map_batch_state(&info.state)?,
            state_message: info.state_message.filter(|m| !m.is_empty()),
        })
    }

    async fn fetch_result_ids(&self, job_id: &str, batch_id: &str) -> Result<Vec<String>> {
        let url = self.async_url(&format!("/job/{}/batch/{}/result", job_id, batch_id));
        self.send(self.bulk(self.http.get(url)), "Batch results").await
    }

    async fn fetch_result(&self, job_id: &str, batch_id: &str, result_id: &str) -> Result<Value> {
        let url = self.async_url(&format!(
            "/job/{}/batch/{}/result/{}",
            job_id, batch_id, result_id
        ));
        self.send(self.bulk(self.http.get(url)), &format!("Result {}", result_id))
            .await
    }

    async fn subscribe(&self, topic: &str, replay_id: Option<i64>) -> Result<FrameReceiver> {
        self.cometd.subscribe(topic, replay_id).await
    }

    async fn create(&self, object_name: &str, record: &Value) -> Result<Value> {
        let url = self.data_url(&format!("/sobjects/{}", object_name));
        self.send(
            self.rest(self.http.post(url)).json(record),
            &format!("Create {}", object_name),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sfdc_core::{resolve_schema, JobSpec};
    use wiremock::matchers::{body_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection(server: &MockServer) -> SalesforceConnection {
        SalesforceConnection::new(Client::new(), server.uri(), "00Dtoken", "41.0")
    }

    #[test]
    fn test_batch_state_mapping() {
        assert_eq!(map_batch_state("Queued").unwrap(), ExportStatus::Pending);
        assert_eq!(map_batch_state("InProgress").unwrap(), ExportStatus::InProgress);
        assert_eq!(map_batch_state("Completed").unwrap(), ExportStatus::Completed);
        assert_eq!(map_batch_state("Failed").unwrap(), ExportStatus::Failed);
        assert_eq!(map_batch_state("NotProcessed").unwrap(), ExportStatus::Failed);
        assert!(map_batch_state("Aborted?").is_err());
    }

    #[tokio::test]
    async fn test_describe_feeds_schema_resolution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v41.0/sobjects/Contact/describe"))
            .and(header("authorization", "Bearer 00Dtoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Contact",
                "fields": [
                    { "name": "Id", "type": "id", "nillable": false, "createable": false },
                    { "name": "LastName", "type": "string", "nillable": false, "createable": true },
                    { "name": "MailingAddress", "type": "address", "nillable": true, "createable": false }
                ]
            })))
            .mount(&server)
            .await;

        let connection = connection(&server);
        let schema = resolve_schema(&connection, "Contact").await.unwrap();
        assert_eq!(schema.select_query("Contact"), "SELECT Id, LastName FROM Contact");
    }

    #[tokio::test]
    async fn test_describe_not_found_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v41.0/sobjects/Nope__c/describe"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!([
                { "errorCode": "NOT_FOUND", "message": "The requested resource does not exist" }
            ])))
            .mount(&server)
            .await;

        let err = connection(&server).describe("Nope__c").await.unwrap_err();
        assert!(matches!(err, Error::RemoteRequest(ref m) if m.contains("NOT_FOUND")));
    }

    #[tokio::test]
    async fn test_expired_session_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v41.0/sobjects"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!([
                { "errorCode": "INVALID_SESSION_ID", "message": "Session expired or invalid" }
            ])))
            .mount(&server)
            .await;

        let err = connection(&server).describe_all().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_describe_all_reads_flags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v41.0/sobjects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "encoding": "UTF-8",
                "sobjects": [
                    { "name": "Account", "createable": true, "replicateable": true, "triggerable": true },
                    { "name": "AccountHistory", "createable": false, "replicateable": false, "triggerable": false }
                ]
            })))
            .mount(&server)
            .await;

        let objects = connection(&server).describe_all().await.unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects[0].replicable);
        assert!(!objects[1].createable);
    }

    #[tokio::test]
    async fn test_bulk_job_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/async/41.0/job"))
            .and(header("x-sfdc-session", "00Dtoken"))
            .and(body_json(json!({ "operation": "query", "object": "Account", "contentType": "JSON" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "750x0001", "object": "Account", "operation": "query", "state": "Open"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/async/41.0/job/750x0001/batch"))
            .and(body_string("SELECT Id, Name FROM Account"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "751x0001", "jobId": "750x0001", "state": "Queued"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/async/41.0/job/750x0001/batch/751x0001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "751x0001", "jobId": "750x0001", "state": "Completed", "stateMessage": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/async/41.0/job/750x0001/batch/751x0001/result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["752x0001"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/async/41.0/job/750x0001/batch/751x0001/result/752x0001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "attributes": { "type": "Account" }, "Id": "001x01", "Name": "Acme" }
            ])))
            .mount(&server)
            .await;

        let connection = connection(&server);
        let job = connection.submit_job(&JobSpec::query("Account")).await.unwrap();
        assert_eq!((job.id.as_str(), job.status), ("750x0001", ExportStatus::Pending));

        let batch = connection
            .submit_batch(&job.id, "SELECT Id, Name FROM Account")
            .await
            .unwrap();
        assert_eq!(batch.job_id, "750x0001");

        let state = connection.poll_batch(&job.id, &batch.id).await.unwrap();
        assert_eq!(state.status, ExportStatus::Completed);
        assert_eq!(state.state_message, None);

        let ids = connection.fetch_result_ids(&job.id, &batch.id).await.unwrap();
        assert_eq!(ids, vec!["752x0001"]);
        let records = connection.fetch_result(&job.id, &batch.id, &ids[0]).await.unwrap();
        assert_eq!(records[0]["Name"], "Acme");
    }

    #[tokio::test]
    async fn test_not_processed_batch_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/async/41.0/job/750x0002/batch/751x0002"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "751x0002",
                "jobId": "750x0002",
                "state": "NotProcessed",
                "stateMessage": "Entity 'Vote' is not supported by the Bulk API."
            })))
            .mount(&server)
            .await;

        let state = connection(&server)
            .poll_batch("750x0002", "751x0002")
            .await
            .unwrap();
        assert_eq!(state.status, ExportStatus::Failed);
        assert!(state.state_message.unwrap().contains("not supported"));
    }

    #[tokio::test]
    async fn test_create_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/data/v41.0/sobjects/Invoke__e"))
            .and(body_json(json!({ "Context_Id__c": "ctx-9" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "e00x01", "success": true, "errors": []
            })))
            .mount(&server)
            .await;

        let saved = connection(&server)
            .create("Invoke__e", &json!({ "Context_Id__c": "ctx-9" }))
            .await
            .unwrap();
        assert_eq!(saved["success"], true);
    }
}
