use crate::{Connector, Result, SinkPlugin};
use serde_json::Value;

/// Factory trait for creating message-queue change sources
pub trait ConnectorFactory: Send + Sync {
    /// Get the name/type identifier for this connector
    fn name(&self) -> &str;

    /// Create a new connector instance from configuration
    fn create(&self, config: Value) -> Result<Box<dyn Connector>>;
}

/// Factory trait for creating sink plugins
pub trait SinkFactory: Send + Sync {
    /// Get the name under which the plugin is requested
    fn name(&self) -> &str;

    /// Create a new plugin instance from configuration
    fn create(&self, config: Value) -> Result<Box<dyn SinkPlugin>>;
}
