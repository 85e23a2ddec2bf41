use async_trait::async_trait;
use std::sync::Arc;

use crate::connection::Connection;
use crate::settings::RunSettings;
use crate::stream::EnvelopeStream;
use crate::{Context, Result};

/// What a sink plugin receives besides the two streams.
#[derive(Clone)]
pub struct PluginContext {
    pub settings: Arc<RunSettings>,
    pub connection: Arc<dyn Connection>,
    pub ctx: Context,
}

/// Consumer of the bulk and change streams.
///
/// `observe` is invoked once per run. Implementations must call
/// [`EnvelopeStream::subscribe`] for every stream they read before
/// returning: envelopes emitted before a subscription exists are not
/// replayed to it. The returned future is the plugin's setup (for example
/// connecting to a downstream broker); an error there ends the run.
/// Failures after setup belong to the plugin, are reported by it, and never
/// affect the run or other plugins.
///
/// Delivery is at-least-once: change envelopes can repeat after a restart,
/// so side effects must be idempotent.
#[async_trait]
pub trait SinkPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn observe(
        &self,
        bulk: EnvelopeStream,
        changes: EnvelopeStream,
        context: PluginContext,
    ) -> Result<()>;
}
