use serde::{Deserialize, Serialize};
use std::path::Path;

pub use sfdc_core::{ConnectorConfig, PluginConfig, RunMode, RunSettings};
pub use sfdc_redis_checkpoint::RedisCheckpointConfig;
pub use sfdc_salesforce::SalesforceConfig;

use sfdc_core::split_list;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub salesforce: SalesforceConfig,
    pub run: RunSettings,
    pub checkpoint: RedisCheckpointConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            salesforce: SalesforceConfig::default(),
            run: RunSettings::default(),
            checkpoint: RedisCheckpointConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_dir = config_dir.as_ref();
        let s = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&Self::default())?)
            // Add default.yaml
            .add_source(
                config::File::with_name(&config_dir.join("default.yaml").to_string_lossy())
                    .required(false),
            )
            // Add local.yaml (per-machine overrides, not committed)
            .add_source(
                config::File::with_name(&config_dir.join("local.yaml").to_string_lossy())
                    .required(false),
            )
            // Add environment variables (SFDC_RUN__MODE=changes)
            .add_source(config::Environment::with_prefix("SFDC").separator("__"))
            .build()?;

        let config = s.try_deserialize()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Conventional environment/CLI overrides applied on top of loaded config.
///
/// List values are comma or whitespace separated.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub read_mode: Option<String>,
    pub select_sobjects: Option<String>,
    pub plugin_names: Option<String>,
    pub topic_names: Option<String>,
    pub replay_id: Option<i64>,
    pub redis_url: Option<String>,
    pub api_version: Option<String>,
    pub salesforce_username: Option<String>,
    pub salesforce_password: Option<String>,
    pub salesforce_login_url: Option<String>,
    pub verbose: bool,
}

impl RunOverrides {
    pub fn apply(self, config: &mut AppConfig) -> anyhow::Result<()> {
        if let Some(mode) = self.read_mode {
            config.run.mode = mode.parse::<RunMode>()?;
        }
        if let Some(objects) = self.select_sobjects {
            let objects = split_list(&objects);
            config.run.objects = if objects.is_empty() { None } else { Some(objects) };
        }
        if let Some(plugins) = self.plugin_names {
            config.run.plugins = split_list(&plugins)
                .into_iter()
                .map(PluginConfig::named)
                .collect();
        }
        if let Some(topics) = self.topic_names {
            config.run.topics = split_list(&topics);
        }
        if self.replay_id.is_some() {
            config.run.replay_id = self.replay_id;
        }
        if let Some(url) = self.redis_url {
            config.checkpoint.url = Some(url);
        }
        if let Some(version) = self.api_version {
            config.salesforce.api_version = version;
        }
        if let Some(username) = self.salesforce_username {
            config.salesforce.username = Some(username);
        }
        if let Some(password) = self.salesforce_password {
            config.salesforce.password = Some(password);
        }
        if let Some(login_url) = self.salesforce_login_url {
            config.salesforce.login_url = login_url;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(())
    }
}
