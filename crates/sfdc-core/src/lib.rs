mod bulk;
mod checkpoint;
mod connection;
mod connector;
mod context;
mod envelope;
mod error;
mod factory;
mod multiplexer;
mod notification;
mod observer;
mod orchestrator;
mod plugin;
mod registry;
mod schema;
mod settings;
mod stream;

#[cfg(test)]
mod test_support;

pub use bulk::{
    is_exportable, BulkExtractor, BulkOptions, ExtractorStatus, ObjectFailure,
    BATCH_JOB_DENYLIST, DEFAULT_POLL_INTERVAL,
};
pub use checkpoint::{checkpoint_key, CheckpointStore, MemoryCheckpointStore};
pub use connection::{
    Advice, Authenticator, BatchState, Connection, ExportBatch, ExportJob, ExportStatus,
    FieldDescriptor, FrameReceiver, JobSpec, MetaFrame, ObjectSummary, StreamingFrame,
};
pub use connector::{pump_connector, Connector, ConnectorStatus};
pub use context::Context;
pub use envelope::{change_entity_name, replay_id_of, Envelope, EnvelopeKind};
pub use error::{Error, Result};
pub use factory::{ConnectorFactory, SinkFactory};
pub use multiplexer::{CompletionState, Multiplexer, SourceHandle};
pub use notification::{EmailNotifier, NoOpNotifier, Notifier};
pub use observer::{ChangeObserver, ObserverHandle, ObserverOptions, ObserverStatus};
pub use orchestrator::{Orchestrator, RunSummary};
pub use plugin::{PluginContext, SinkPlugin};
pub use registry::{Registry, EXTERNAL_PLUGIN_PREFIX};
pub use schema::{resolve as resolve_schema, SchemaDescriptor, COMPOUND_FIELD_TYPES};
pub use settings::{
    split_list, ConnectorConfig, PluginConfig, RunMode, RunSettings, DEFAULT_PLUGIN,
};
pub use stream::{EnvelopeStream, StreamEvent, StreamState, Subscription};
