use crate::{NatsOutput, NatsOutputConfig, PLUGIN_NAME};
use serde_json::Value;
use sfdc_core::{Result, SinkFactory, SinkPlugin};

pub struct NatsOutputFactory;

impl SinkFactory for NatsOutputFactory {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn create(&self, config: Value) -> Result<Box<dyn SinkPlugin>> {
        let config: NatsOutputConfig = if config.is_null() {
            NatsOutputConfig::default()
        } else {
            serde_json::from_value(config)?
        };
        Ok(Box::new(NatsOutput::new(config)))
    }
}
