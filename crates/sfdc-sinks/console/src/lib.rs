use async_trait::async_trait;
use serde_json::Value;
use sfdc_core::{
    EnvelopeStream, PluginContext, Result, SinkFactory, SinkPlugin, StreamEvent, Subscription,
};
use tracing::{error, info, Instrument};

pub const PLUGIN_NAME: &str = "console-output";

/// Logs one line per envelope of either stream.
pub struct ConsoleOutput;

#[async_trait]
impl SinkPlugin for ConsoleOutput {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn observe(
        &self,
        bulk: EnvelopeStream,
        changes: EnvelopeStream,
        context: PluginContext,
    ) -> Result<()> {
        let span = tracing::info_span!(parent: context.ctx.span(), "console_output");
        tokio::spawn(print_stream(changes.subscribe()).instrument(span.clone()));
        tokio::spawn(print_stream(bulk.subscribe()).instrument(span));
        Ok(())
    }
}

/// Log every event of `subscription`; returns how many envelopes were seen.
pub async fn print_stream(mut subscription: Subscription) -> u64 {
    let mut seen = 0;
    while let Some(event) = subscription.recv().await {
        match event {
            StreamEvent::Envelope(envelope) => {
                seen += 1;
                info!("{}/{}", envelope.kind, envelope.name);
            }
            StreamEvent::Completed => info!("Stream completed after {} envelopes", seen),
            StreamEvent::Failed(e) => error!("{}", e),
        }
    }
    seen
}

pub struct ConsoleOutputFactory;

impl SinkFactory for ConsoleOutputFactory {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn create(&self, _config: Value) -> Result<Box<dyn SinkPlugin>> {
        Ok(Box::new(ConsoleOutput))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sfdc_core::{Envelope, Error, Registry};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_print_stream_counts_until_end() {
        let stream = EnvelopeStream::new("changes");
        let printer = tokio::spawn(print_stream(stream.subscribe()));

        stream.emit(Envelope::records("Account", json!([{ "Id": "001" }])));
        stream.emit(Envelope::from_stream_message(
            "/data/ChangeEvents",
            json!({ "payload": { "ChangeEventHeader": { "entityName": "Account" } } }),
        ));
        stream.fail(Error::Authentication("session expired".into()));

        assert_eq!(printer.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_print_stream_on_unstarted_stream() {
        let stream = EnvelopeStream::completed("bulk");
        assert_eq!(print_stream(stream.subscribe()).await, 0);
    }

    #[test]
    fn test_registered_under_default_name() {
        let mut registry = Registry::new();
        registry.register_sink(Arc::new(ConsoleOutputFactory));

        let factory = registry.resolve_sink("console-output").ok().unwrap();
        assert_eq!(factory.create(Value::Null).ok().unwrap().name(), "console-output");
    }
}
