use crate::{NatsConfig, NatsConnector};
use sfdc_core::{Connector, ConnectorFactory, Result};
use serde_json::Value;

pub struct NatsConnectorFactory;

impl ConnectorFactory for NatsConnectorFactory {
    fn name(&self) -> &str {
        "nats"
    }

    fn create(&self, config: Value) -> Result<Box<dyn Connector>> {
        let config: NatsConfig = serde_json::from_value(config)?;
        config.validate()?;
        Ok(Box::new(NatsConnector::new(config)))
    }
}
