use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::checkpoint::{checkpoint_key, CheckpointStore};
use crate::connection::{Connection, FrameReceiver, StreamingFrame};
use crate::envelope::replay_id_of;
use crate::multiplexer::{Multiplexer, SourceHandle};
use crate::{Context, Envelope, Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ObserverOptions {
    /// Replay token that takes priority over any stored checkpoint.
    pub replay_override: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ObserverStatus {
    pub messages: u64,
    pub checkpoints_saved: u64,
    pub checkpoint_failures: u64,
    pub last_error: Option<String>,
}

/// Handle on running topic subscriptions.
pub struct ObserverHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ObserverHandle {
    /// Stop every subscription; their sub-sources finish normally.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every subscription pump to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Subscription task ended abnormally: {}", e);
            }
        }
    }
}

/// Subscribes to live topics with replay checkpointing.
///
/// Every message is emitted first and checkpointed second. A crash between
/// the two replays the message on restart, so delivery is at-least-once and
/// sinks must tolerate duplicates.
pub struct ChangeObserver {
    connection: Arc<dyn Connection>,
    checkpoints: Arc<dyn CheckpointStore>,
    ctx: Context,
    options: ObserverOptions,
    status: Arc<Mutex<ObserverStatus>>,
}

impl ChangeObserver {
    pub fn new(
        connection: Arc<dyn Connection>,
        checkpoints: Arc<dyn CheckpointStore>,
        ctx: Context,
        options: ObserverOptions,
    ) -> Self {
        Self {
            connection,
            checkpoints,
            ctx,
            options,
            status: Arc::new(Mutex::new(ObserverStatus::default())),
        }
    }

    pub fn status(&self) -> ObserverStatus {
        self.status
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Override token, else stored checkpoint, else none (start from now).
    pub async fn starting_replay_id(&self, topic: &str) -> Result<Option<i64>> {
        if let Some(replay_id) = self.options.replay_override {
            return Ok(Some(replay_id));
        }
        self.checkpoints
            .get(&checkpoint_key(topic))
            .await
            .map_err(|e| match e {
                Error::CheckpointStore(_) => e,
                other => Error::CheckpointStore(other.to_string()),
            })
    }

    /// Subscribe to every topic, feeding `output` through one sub-source per
    /// topic.
    ///
    /// Resolves once every subscription handshake succeeded. Does not seal
    /// `output`; other producers may share it. On error, subscriptions that
    /// were already opened are stopped.
    pub async fn observe(&self, topics: &[String], output: &Multiplexer) -> Result<ObserverHandle> {
        if topics.is_empty() {
            return Err(Error::Configuration("no topics to observe".to_string()));
        }

        let mut handle = ObserverHandle {
            cancel: CancellationToken::new(),
            tasks: Vec::with_capacity(topics.len()),
        };

        for topic in topics {
            match self.subscribe_topic(topic, output, &handle.cancel).await {
                Ok(task) => handle.tasks.push(task),
                Err(e) => {
                    handle.stop();
                    return Err(e);
                }
            }
        }

        Ok(handle)
    }

    async fn subscribe_topic(
        &self,
        topic: &str,
        output: &Multiplexer,
        cancel: &CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let span = tracing::info_span!(parent: self.ctx.span(), "observe", topic = %topic);

        let replay_id = self.starting_replay_id(topic).await?;
        span.in_scope(|| match replay_id {
            Some(id) => info!("Subscribing, replaying from {}", id),
            None => info!("Subscribing from now"),
        });

        let frames = self.connection.subscribe(topic, replay_id).await?;
        span.in_scope(|| info!("Streaming changes"));

        let pump = TopicPump {
            topic: topic.to_string(),
            key: checkpoint_key(topic),
            checkpoints: self.checkpoints.clone(),
            status: self.status.clone(),
        };
        let source = output.source(topic);
        let cancel = cancel.clone();
        Ok(tokio::spawn(pump.run(frames, source, cancel).instrument(span)))
    }
}

struct TopicPump {
    topic: String,
    key: String,
    checkpoints: Arc<dyn CheckpointStore>,
    status: Arc<Mutex<ObserverStatus>>,
}

impl TopicPump {
    async fn run(self, mut frames: FrameReceiver, source: SourceHandle, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Subscription stopped");
                    break;
                }
                frame = frames.recv() => frame,
            };

            match frame {
                None => {
                    info!("Subscription transport closed");
                    break;
                }
                Some(StreamingFrame::Meta(meta)) => {
                    if meta.is_auth_failure() {
                        let reason = meta.error.unwrap_or_else(|| meta.channel.clone());
                        error!("Authentication was lost: {}", reason);
                        source.fail(Error::Authentication(format!(
                            "authentication lost on {}: {}",
                            self.topic, reason
                        )));
                        return;
                    }
                    debug!(channel = %meta.channel, "Meta frame");
                }
                Some(StreamingFrame::Message { data, .. }) => self.deliver(&source, data).await,
            }
        }

        source.finish();
    }

    async fn deliver(&self, source: &SourceHandle, data: serde_json::Value) {
        let replay_id = replay_id_of(&data);
        let envelope = Envelope::from_stream_message(&self.topic, data);
        debug!(replay_id = ?replay_id, "{}/{}", envelope.kind, envelope.name);

        if !source.emit(envelope) {
            return;
        }
        self.update(|s| s.messages += 1);

        let Some(replay_id) = replay_id else {
            return;
        };
        match self.checkpoints.set(&self.key, replay_id).await {
            Ok(()) => {
                debug!("Saved checkpoint {}", replay_id);
                self.update(|s| s.checkpoints_saved += 1);
            }
            Err(e) => {
                // Already delivered; the next restart may deliver it again.
                warn!("Failed to save checkpoint {}: {}", replay_id, e);
                self.update(|s| {
                    s.checkpoint_failures += 1;
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut ObserverStatus)) {
        f(&mut self.status.lock().unwrap_or_else(|p| p.into_inner()));
    }
}
