mod factory;
mod nats_connector;

pub use factory::NatsConnectorFactory;
pub use nats_connector::{NatsConfig, NatsConnector};
