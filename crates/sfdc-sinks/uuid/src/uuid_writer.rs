use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sfdc_core::{
    Connection, Envelope, EnvelopeStream, Error, PluginContext, Result, SinkPlugin, StreamEvent,
    Subscription,
};
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

pub const PLUGIN_NAME: &str = "generate-uuid";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UuidWriterConfig {
    /// Name of the change envelopes that request a UUID, e.g. `/event/UUID_Request__e`.
    #[serde(default)]
    pub observe_topic: String,

    /// Object created in the remote system for every request.
    #[serde(default)]
    pub return_event: String,
}

impl UuidWriterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.observe_topic.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "{} requires observe_topic",
                PLUGIN_NAME
            )));
        }
        if self.return_event.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "{} requires return_event",
                PLUGIN_NAME
            )));
        }
        Ok(())
    }
}

/// Answers request events with a freshly generated UUID, written back to
/// the remote system as a new `return_event` record carrying the request's
/// `Context_Id`.
pub struct UuidWriter {
    config: Arc<UuidWriterConfig>,
}

impl UuidWriter {
    pub fn new(config: UuidWriterConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl SinkPlugin for UuidWriter {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn observe(
        &self,
        _bulk: EnvelopeStream,
        changes: EnvelopeStream,
        context: PluginContext,
    ) -> Result<()> {
        self.config.validate()?;
        info!(
            "Answering {} with {} records",
            self.config.observe_topic, self.config.return_event
        );

        let span = tracing::info_span!(parent: context.ctx.span(), "generate_uuid");
        tokio::spawn(
            write_replies(
                changes.subscribe(),
                context.connection.clone(),
                self.config.clone(),
            )
            .instrument(span),
        );
        Ok(())
    }
}

/// Create one reply per matching request until the stream ends; returns how
/// many replies the remote system accepted.
pub async fn write_replies(
    mut subscription: Subscription,
    connection: Arc<dyn Connection>,
    config: Arc<UuidWriterConfig>,
) -> u64 {
    let mut written = 0;
    while let Some(event) = subscription.recv().await {
        match event {
            StreamEvent::Envelope(envelope) if envelope.name == config.observe_topic => {
                if reply(connection.as_ref(), &config, &envelope).await {
                    written += 1;
                }
            }
            StreamEvent::Envelope(_) => {}
            StreamEvent::Completed => debug!("Change stream completed, {} replies", written),
            StreamEvent::Failed(e) => error!("Change stream failed: {}", e),
        }
    }
    written
}

async fn reply(
    connection: &dyn Connection,
    config: &UuidWriterConfig,
    envelope: &Envelope,
) -> bool {
    let Some(context_id) = envelope.content.pointer("/payload/Context_Id").cloned() else {
        error!(
            "{} event has no payload.Context_Id: {}",
            config.observe_topic, envelope.content
        );
        return false;
    };

    let record = json!({
        "Context_Id": context_id,
        "Value": Uuid::new_v4().to_string(),
    });

    match connection.create(&config.return_event, &record).await {
        Ok(response) if response.get("success") == Some(&Value::Bool(false)) => {
            let errors = response.get("errors").cloned().unwrap_or(Value::Null);
            error!(
                "Create {} for Context_Id {} was rejected: {}",
                config.return_event, context_id, errors
            );
            false
        }
        Ok(response) => {
            info!(
                "Created {} {} for Context_Id {}",
                config.return_event,
                response.get("id").unwrap_or(&serde_json::Value::Null),
                context_id
            );
            true
        }
        Err(e) => {
            error!(
                "Create {} for Context_Id {} failed: {}",
                config.return_event, context_id, e
            );
            false
        }
    }
}
