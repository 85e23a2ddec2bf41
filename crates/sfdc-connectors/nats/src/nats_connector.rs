use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sfdc_core::{Connector, ConnectorStatus, Envelope, Error, Result};
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL(s)
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Topic carrying change events, without prefix
    pub topic: String,

    /// Prefix applied to both topic and group (multi-tenant brokers)
    #[serde(default)]
    pub topic_prefix: String,

    /// Queue group shared by every instance of this connector
    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Optional token for authentication
    #[serde(default)]
    pub token: Option<String>,
}

fn default_servers() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

fn default_group_id() -> String {
    "salesforce-data-connector".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

impl NatsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Configuration("NATS change source requires a topic".to_string()));
        }
        if self.servers.is_empty() {
            return Err(Error::Configuration("NATS change source requires a server".to_string()));
        }
        Ok(())
    }

    /// Subject subscribed to, prefix included.
    pub fn subject(&self) -> String {
        format!("{}{}", self.topic_prefix, self.topic)
    }

    /// Queue group, prefix included.
    pub fn queue_group(&self) -> String {
        format!("{}{}", self.topic_prefix, self.group_id)
    }
}

pub struct NatsConnector {
    name: String,
    config: NatsConfig,
    client: Option<Client>,
    subscriber: Option<Subscriber>,
    status: ConnectorStatus,
}

impl NatsConnector {
    pub fn new(config: NatsConfig) -> Self {
        Self {
            name: format!("nats:{}", config.subject()),
            config,
            client: None,
            subscriber: None,
            status: ConnectorStatus::default(),
        }
    }

    /// Turn one message payload into a change envelope. Undecodable payloads
    /// are counted and yield `None`.
    fn decode(&mut self, payload: &[u8]) -> Option<Envelope> {
        match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(message) => {
                self.status.records_received += 1;
                Some(Envelope::from_stream_message(&self.config.topic, message))
            }
            Err(e) => {
                self.status.errors += 1;
                let err_msg = format!("Failed to deserialize message: {}", e);
                self.status.last_error = Some(err_msg.clone());
                error!("[{}] {}", self.name, err_msg);
                None
            }
        }
    }
}

#[async_trait]
impl Connector for NatsConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to NATS servers: {:?}", self.config.servers);

        // Build connection options with authentication if provided
        let mut opts = async_nats::ConnectOptions::new();

        if let Some(ref username) = self.config.username {
            if let Some(ref password) = self.config.password {
                info!("Using username/password authentication");
                opts = opts.user_and_password(username.clone(), password.clone());
            }
        } else if let Some(ref token) = self.config.token {
            info!("Using token authentication");
            opts = opts.token(token.clone());
        }

        let server = self.config.servers[0].clone();
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let client = tokio::time::timeout(timeout, opts.connect(server.as_str()))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "Failed to connect to NATS ({}-ms timeout)",
                    self.config.connect_timeout_ms
                ))
            })?
            .map_err(|e| Error::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS successfully");

        let subject = self.config.subject();
        let group = self.config.queue_group();
        info!("Consuming topic '{}' with queue group '{}'", subject, group);
        let subscriber = client
            .queue_subscribe(subject, group)
            .await
            .map_err(|e| Error::Connection(format!("Failed to subscribe: {}", e)))?;

        self.client = Some(client);
        self.subscriber = Some(subscriber);
        self.status.connected = true;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from NATS");

        if let Some(mut subscriber) = self.subscriber.take() {
            if let Err(e) = subscriber.unsubscribe().await {
                debug!("Unsubscribe failed: {}", e);
            }
        }

        if let Some(client) = self.client.take() {
            client
                .flush()
                .await
                .map_err(|e| Error::Connection(format!("Failed to flush: {}", e)))?;
        }

        self.status.connected = false;
        info!("Disconnected from NATS");

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.status.connected
    }

    async fn receive(&mut self) -> Result<Option<Envelope>> {
        loop {
            let subscriber = self
                .subscriber
                .as_mut()
                .ok_or_else(|| Error::Connection("Not connected".to_string()))?;

            let Some(msg) = subscriber.next().await else {
                info!("NATS subscription closed");
                return Ok(None);
            };
            debug!("Received message from NATS: {} bytes", msg.payload.len());

            if let Some(envelope) = self.decode(&msg.payload) {
                return Ok(Some(envelope));
            }
        }
    }

    fn status(&self) -> ConnectorStatus {
        self.status.clone()
    }
}
