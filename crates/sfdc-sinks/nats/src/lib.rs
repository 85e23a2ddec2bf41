mod factory;
mod nats_output;

pub use factory::NatsOutputFactory;
pub use nats_output::{NatsOutput, NatsOutputConfig, PLUGIN_NAME};
