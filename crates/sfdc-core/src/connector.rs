use crate::multiplexer::SourceHandle;
use crate::{Envelope, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Trait for message-queue-backed change sources
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name used for the connector's sub-source in the change stream
    fn name(&self) -> &str;

    /// Connect to the broker and subscribe
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the connector is connected
    fn is_connected(&self) -> bool;

    /// Receive the next change envelope
    /// Returns None if the stream is closed
    async fn receive(&mut self) -> Result<Option<Envelope>>;

    /// Get connector status information
    fn status(&self) -> ConnectorStatus;
}

#[derive(Debug, Clone, Default)]
pub struct ConnectorStatus {
    pub connected: bool,
    pub records_received: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

/// Forward everything a connected connector receives into `source` until
/// the broker closes the stream or `cancel` fires.
pub async fn pump_connector(
    mut connector: Box<dyn Connector>,
    source: SourceHandle,
    cancel: CancellationToken,
) {
    let name = connector.name().to_string();
    info!("[{}] Change source running", name);

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] Received stop", name);
                break;
            }
            received = connector.receive() => received,
        };

        match received {
            Ok(Some(envelope)) => {
                source.emit(envelope);
            }
            Ok(None) => {
                warn!("[{}] Connector stream closed", name);
                break;
            }
            Err(e) => {
                error!("[{}] Error receiving message: {}", name, e);
                // Continue processing other messages
            }
        }
    }

    if let Err(e) = connector.disconnect().await {
        warn!("[{}] Disconnect failed: {}", name, e);
    }
    let status = connector.status();
    info!(
        "[{}] Change source stopped ({} received, {} errors)",
        name, status.records_received, status.errors
    );
    source.finish();
}
