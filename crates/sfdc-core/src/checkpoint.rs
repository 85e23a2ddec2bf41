use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::Result;

/// Key under which the replay checkpoint of `topic` is stored.
pub fn checkpoint_key(topic: &str) -> String {
    format!("replayId:{}", topic)
}

/// External key-value store holding one replay token per topic.
///
/// A single active observer per key is assumed; concurrent observers on the
/// same topic would race on writes. Tokens are not required to increase: a
/// lower value written by hand is a valid reset.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, topic_key: &str) -> Result<Option<i64>>;

    async fn set(&self, topic_key: &str, replay_id: i64) -> Result<()>;
}

/// Process-local store, for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, i64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, topic_key: &str) -> Result<Option<i64>> {
        Ok(self.entries.read().await.get(topic_key).copied())
    }

    async fn set(&self, topic_key: &str, replay_id: i64) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(topic_key.to_string(), replay_id);
        Ok(())
    }
}
