use crate::{ConnectorFactory, Error, Result, SinkFactory};
use std::collections::HashMap;
use std::sync::Arc;

/// Conventional name of an externally packaged sink plugin.
pub const EXTERNAL_PLUGIN_PREFIX: &str = "salesforce-data-connector-plugin-";

/// Registry for change-source connector and sink plugin factories
pub struct Registry {
    connector_factories: HashMap<String, Arc<dyn ConnectorFactory>>,
    sink_factories: HashMap<String, Arc<dyn SinkFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connector_factories: HashMap::new(),
            sink_factories: HashMap::new(),
        }
    }

    /// Register a connector factory
    pub fn register_connector(&mut self, factory: Arc<dyn ConnectorFactory>) {
        let name = factory.name().to_string();
        self.connector_factories.insert(name, factory);
    }

    /// Register a sink plugin factory
    pub fn register_sink(&mut self, factory: Arc<dyn SinkFactory>) {
        let name = factory.name().to_string();
        self.sink_factories.insert(name, factory);
    }

    /// Get a connector factory by name
    pub fn get_connector_factory(&self, name: &str) -> Result<Arc<dyn ConnectorFactory>> {
        self.connector_factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("Connector factory '{}' not found", name)))
    }

    /// Resolve a sink plugin by name: a plugin registered under the plain
    /// name wins, then one registered under the external package name.
    pub fn resolve_sink(&self, name: &str) -> Result<Arc<dyn SinkFactory>> {
        self.sink_factories
            .get(name)
            .or_else(|| {
                self.sink_factories
                    .get(&format!("{}{}", EXTERNAL_PLUGIN_PREFIX, name))
            })
            .cloned()
            .ok_or_else(|| {
                Error::PluginResolution(format!(
                    "No sink plugin registered as '{}' or '{}{}'",
                    name, EXTERNAL_PLUGIN_PREFIX, name
                ))
            })
    }

    /// List all registered connector types
    pub fn list_connectors(&self) -> Vec<String> {
        self.connector_factories.keys().cloned().collect()
    }

    /// List all registered sink plugins
    pub fn list_sinks(&self) -> Vec<String> {
        self.sink_factories.keys().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
