use crate::{UuidWriter, UuidWriterConfig, PLUGIN_NAME};
use serde_json::Value;
use sfdc_core::{Error, Result, SinkFactory, SinkPlugin};

pub struct UuidWriterFactory;

impl SinkFactory for UuidWriterFactory {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn create(&self, config: Value) -> Result<Box<dyn SinkPlugin>> {
        if config.is_null() {
            return Err(Error::Configuration(format!(
                "{} requires observe_topic and return_event",
                PLUGIN_NAME
            )));
        }
        let config: UuidWriterConfig = serde_json::from_value(config)?;
        config.validate()?;
        Ok(Box::new(UuidWriter::new(config)))
    }
}
