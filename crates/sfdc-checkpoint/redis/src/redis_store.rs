use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, ConnectionInfo};
use serde::{Deserialize, Serialize};
use sfdc_core::{CheckpointStore, Error, Result};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisCheckpointConfig {
    /// Redis connection URL (e.g., redis://localhost:6379). No default:
    /// observing topics without one is a configuration error.
    #[serde(default)]
    pub url: Option<String>,

    /// Redis database number; overrides the one in the URL when set
    #[serde(default)]
    pub database: Option<i64>,
}

impl RedisCheckpointConfig {
    pub fn validate(&self) -> Result<&str> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(Error::Configuration(
                "Observing topics requires a checkpoint store address (checkpoint.url or REDIS_URL)"
                    .to_string(),
            )),
        }
    }
}

/// Replay checkpoints kept as decimal strings under `replayId:{topic}`.
pub struct RedisCheckpointStore {
    connection: ConnectionManager,
}

impl RedisCheckpointStore {
    pub async fn connect(config: &RedisCheckpointConfig) -> Result<Self> {
        let url = config.validate()?;
        let mut connection_info: ConnectionInfo = Client::open(url)
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {}", e)))?
            .get_connection_info()
            .clone();

        if let Some(database) = config.database {
            connection_info.redis.db = database;
        }
        info!(
            "Connecting to Redis checkpoint store: {} (db={})",
            connection_info.addr, connection_info.redis.db
        );

        let client = Client::open(connection_info)
            .map_err(|e| Error::CheckpointStore(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::CheckpointStore(format!("Failed to connect to Redis: {}", e)))?;

        info!("Connected to Redis successfully");
        Ok(Self { connection })
    }
}

/// Parse a stored checkpoint value.
fn parse_replay_id(topic_key: &str, raw: Option<String>) -> Result<Option<i64>> {
    match raw {
        None => Ok(None),
        Some(value) => value.trim().parse::<i64>().map(Some).map_err(|_| {
            Error::CheckpointStore(format!(
                "Checkpoint '{}' holds a non-numeric value: {:?}",
                topic_key, value
            ))
        }),
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn get(&self, topic_key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(topic_key).await.map_err(|e| {
            error!("Failed to read checkpoint '{}': {}", topic_key, e);
            Error::CheckpointStore(format!("Failed to read checkpoint: {}", e))
        })?;
        debug!("Read checkpoint '{}': {:?}", topic_key, raw);
        parse_replay_id(topic_key, raw)
    }

    async fn set(&self, topic_key: &str, replay_id: i64) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(topic_key, replay_id.to_string())
            .await
            .map_err(|e| Error::CheckpointStore(format!("Failed to save checkpoint: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay_id() {
        assert_eq!(parse_replay_id("replayId:/data/ChangeEvents", None).unwrap(), None);
        assert_eq!(
            parse_replay_id("replayId:/data/ChangeEvents", Some("1204".into())).unwrap(),
            Some(1204)
        );
        assert!(matches!(
            parse_replay_id("replayId:/data/ChangeEvents", Some("latest".into())),
            Err(Error::CheckpointStore(_))
        ));
    }

    #[test]
    fn test_config_has_no_default_address() {
        let config: RedisCheckpointConfig = serde_json::from_str("{}").unwrap();
        assert!(config.url.is_none());
        assert!(config.database.is_none());
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let blank = RedisCheckpointConfig {
            url: Some("  ".to_string()),
            database: None,
        };
        assert!(matches!(blank.validate(), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_missing_address_is_configuration_error() {
        let result = RedisCheckpointStore::connect(&RedisCheckpointConfig::default()).await;
        assert!(matches!(result, Err(Error::Configuration(ref m)) if m.contains("REDIS_URL")));
    }

    #[tokio::test]
    async fn test_invalid_url_is_configuration_error() {
        let config = RedisCheckpointConfig {
            url: Some("not a url".to_string()),
            database: None,
        };
        assert!(matches!(
            RedisCheckpointStore::connect(&config).await,
            Err(Error::Configuration(_))
        ));
    }
}
