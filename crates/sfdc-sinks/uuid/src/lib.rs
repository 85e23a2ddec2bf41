mod factory;
mod uuid_writer;

pub use factory::UuidWriterFactory;
pub use uuid_writer::{write_replies, UuidWriter, UuidWriterConfig, PLUGIN_NAME};
