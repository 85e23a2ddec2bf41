mod redis_store;

pub use redis_store::{RedisCheckpointConfig, RedisCheckpointStore};
