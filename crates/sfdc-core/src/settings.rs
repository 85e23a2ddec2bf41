use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_PLUGIN: &str = "console-output";

/// Which logical streams a run reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    All,
    Records,
    Changes,
}

impl RunMode {
    pub fn reads_records(self) -> bool {
        matches!(self, RunMode::All | RunMode::Records)
    }

    pub fn reads_changes(self) -> bool {
        matches!(self, RunMode::All | RunMode::Changes)
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(RunMode::All),
            "records" => Ok(RunMode::Records),
            "changes" => Ok(RunMode::Changes),
            other => Err(Error::Configuration(format!(
                "Read mode \"{}\" not recognized (expected all, records or changes)",
                other
            ))),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::All => "all",
            RunMode::Records => "records",
            RunMode::Changes => "changes",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    /// Registered plugin name (e.g., "console-output")
    pub name: String,

    /// Plugin-specific configuration
    #[serde(default)]
    pub config: Value,
}

impl PluginConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorConfig {
    /// Type/name of the connector (e.g., "nats")
    #[serde(rename = "type")]
    pub connector_type: String,

    /// Connector-specific configuration
    pub config: Value,
}

/// Everything the orchestrator needs to know about one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSettings {
    pub mode: RunMode,

    /// Objects to export; `None` exports every eligible object.
    pub objects: Option<Vec<String>>,

    pub plugins: Vec<PluginConfig>,

    /// Live topics to subscribe to.
    pub topics: Vec<String>,

    /// Replay token overriding stored checkpoints.
    pub replay_id: Option<i64>,

    pub poll_interval_ms: u64,

    /// Message-queue change sources feeding the change stream.
    pub change_sources: Vec<ConnectorConfig>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::All,
            objects: None,
            plugins: vec![PluginConfig::named(DEFAULT_PLUGIN)],
            topics: Vec::new(),
            replay_id: None,
            poll_interval_ms: 5000,
            change_sources: Vec::new(),
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<()> {
        if self.plugins.is_empty() {
            return Err(Error::Configuration(
                "At least one sink plugin is required".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Configuration("Topic names must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether any live change source is configured.
    pub fn has_change_source(&self) -> bool {
        !self.topics.is_empty() || !self.change_sources.is_empty()
    }
}

/// Split a comma/whitespace separated list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
