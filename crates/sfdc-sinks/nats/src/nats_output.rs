use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sfdc_core::{
    Envelope, EnvelopeStream, Error, PluginContext, Result, SinkPlugin, StreamEvent, Subscription,
};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

pub const PLUGIN_NAME: &str = "nats-output";

/// Header carrying the envelope name, used as the message key.
const OBJECT_HEADER: &str = "Sfdc-Object";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsOutputConfig {
    /// NATS server URL(s)
    pub servers: Vec<String>,

    pub topic_prefix: String,

    pub output_topic: String,

    pub connect_timeout_ms: u64,

    /// Optional username for authentication
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Optional token for authentication
    pub token: Option<String>,
}

impl Default for NatsOutputConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            topic_prefix: String::new(),
            output_topic: "salesforce-cdc".to_string(),
            connect_timeout_ms: 5000,
            username: None,
            password: None,
            token: None,
        }
    }
}

impl NatsOutputConfig {
    pub fn subject(&self) -> String {
        format!("{}{}", self.topic_prefix, self.output_topic)
    }
}

/// Publishes every change-stream envelope's content to one subject.
pub struct NatsOutput {
    config: NatsOutputConfig,
}

impl NatsOutput {
    pub fn new(config: NatsOutputConfig) -> Self {
        Self { config }
    }

    /// Connect within the configured timeout.
    pub async fn connect(&self) -> Result<Client> {
        let server = self
            .config
            .servers
            .first()
            .ok_or_else(|| Error::Configuration("nats-output requires a server".to_string()))?;

        let mut opts = async_nats::ConnectOptions::new();
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            opts = opts.user_and_password(username.clone(), password.clone());
        } else if let Some(ref token) = self.config.token {
            opts = opts.token(token.clone());
        }

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        tokio::time::timeout(timeout, opts.connect(server.as_str()))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "Failed to connect NATS producer ({}-ms timeout)",
                    self.config.connect_timeout_ms
                ))
            })?
            .map_err(|e| Error::Connection(format!("Failed to connect to NATS: {}", e)))
    }
}

/// Message body and headers for one envelope.
fn encode(envelope: &Envelope) -> Result<(HeaderMap, Bytes)> {
    let mut headers = HeaderMap::new();
    headers.insert(OBJECT_HEADER, envelope.name.as_str());
    let payload = serde_json::to_vec(&envelope.content)?;
    Ok((headers, Bytes::from(payload)))
}

async fn publish_changes(client: Client, subject: String, mut changes: Subscription) {
    let mut published = 0u64;
    while let Some(event) = changes.recv().await {
        match event {
            StreamEvent::Envelope(envelope) => {
                let (headers, payload) = match encode(&envelope) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Failed to encode {}/{}: {}", envelope.kind, envelope.name, e);
                        continue;
                    }
                };
                debug!("Produce change for {}", envelope.name);
                match client
                    .publish_with_headers(subject.clone(), headers, payload)
                    .await
                {
                    Ok(()) => published += 1,
                    Err(e) => error!("Failed to publish {}: {}", envelope.name, e),
                }
            }
            StreamEvent::Completed => info!("Change stream completed"),
            StreamEvent::Failed(e) => error!("Change stream failed: {}", e),
        }
    }

    if let Err(e) = client.flush().await {
        warn!("Failed to flush: {}", e);
    }
    info!("Published {} changes to {}", published, subject);
}

#[async_trait]
impl SinkPlugin for NatsOutput {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn observe(
        &self,
        _bulk: EnvelopeStream,
        changes: EnvelopeStream,
        context: PluginContext,
    ) -> Result<()> {
        let subject = self.config.subject();
        info!("NATS output topic {}", subject);
        // Subscribe first; changes emitted while connecting are kept.
        let changes = changes.subscribe();
        let client = self.connect().await?;
        info!("Connected to NATS");

        let span = tracing::info_span!(parent: context.ctx.span(), "nats_output", subject = %subject);
        tokio::spawn(publish_changes(client, subject, changes).instrument(span));
        Ok(())
    }
}
