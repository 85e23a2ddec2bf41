use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::bulk::{BulkExtractor, BulkOptions, ExtractorStatus};
use crate::checkpoint::CheckpointStore;
use crate::connection::{Authenticator, Connection};
use crate::connector::pump_connector;
use crate::multiplexer::Multiplexer;
use crate::notification::{NoOpNotifier, Notifier};
use crate::observer::{ChangeObserver, ObserverOptions, ObserverStatus};
use crate::plugin::{PluginContext, SinkPlugin};
use crate::settings::{RunMode, RunSettings};
use crate::stream::EnvelopeStream;
use crate::{Connector, Context, Error, Registry, Result};

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// Objects the bulk extractor was asked to export.
    pub objects: Vec<String>,
    pub bulk: Option<ExtractorStatus>,
    pub changes: Option<ObserverStatus>,
}

struct RunStreams {
    bulk: EnvelopeStream,
    changes: EnvelopeStream,
}

impl RunStreams {
    /// A stream the mode excludes is complete from the outset.
    fn new(settings: &RunSettings) -> Self {
        let stream = |name: &str, enabled: bool| {
            if enabled {
                EnvelopeStream::new(name)
            } else {
                EnvelopeStream::completed(name)
            }
        };
        Self {
            bulk: stream("bulk", settings.mode.reads_records()),
            changes: stream("changes", settings.mode.reads_changes()),
        }
    }

    fn abort(&self, error: &Error) {
        let reason = format!("run aborted: {}", error);
        self.bulk.fail(Error::Stream(reason.clone()));
        self.changes.fail(Error::Stream(reason));
    }
}

/// Runs one extraction: loads sinks, authenticates, feeds the bulk and
/// change streams and waits for both to end.
pub struct Orchestrator {
    settings: Arc<RunSettings>,
    registry: Arc<Registry>,
    ctx: Context,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    pub fn new(settings: RunSettings, registry: Arc<Registry>, ctx: Context) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            ctx,
            checkpoints: None,
            notifier: Arc::new(NoOpNotifier),
        }
    }

    /// Store for replay checkpoints; required when topics are observed.
    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Resolve every configured plugin. Duplicates load once.
    pub fn load_plugins(&self) -> Result<Vec<Box<dyn SinkPlugin>>> {
        let mut seen = HashSet::new();
        let mut plugins = Vec::new();
        for plugin in &self.settings.plugins {
            if !seen.insert(plugin.name.as_str()) {
                continue;
            }
            let factory = self.registry.resolve_sink(&plugin.name)?;
            plugins.push(factory.create(plugin.config.clone())?);
            info!(parent: self.ctx.span(), "Loaded plugin {}", plugin.name);
        }
        Ok(plugins)
    }

    fn build_connectors(&self) -> Result<Vec<Box<dyn Connector>>> {
        if !self.settings.mode.reads_changes() {
            return Ok(Vec::new());
        }
        self.settings
            .change_sources
            .iter()
            .map(|source| {
                let factory = self.registry.get_connector_factory(&source.connector_type)?;
                factory.create(source.config.clone())
            })
            .collect()
    }

    /// Execute the run. `shutdown` stops live change observation; the
    /// change stream then completes normally.
    pub async fn run(
        &self,
        authenticator: &dyn Authenticator,
        shutdown: CancellationToken,
    ) -> Result<RunSummary> {
        let result = self
            .execute(authenticator, shutdown)
            .instrument(self.ctx.span().clone())
            .await;

        if let Err(e) = &result {
            error!(parent: self.ctx.span(), "Run failed: {}", e);
            let run_name = self.ctx.run_id().to_string();
            if let Err(notify_err) = self
                .notifier
                .send_error_notification(&run_name, &e.to_string())
                .await
            {
                warn!(parent: self.ctx.span(), "Failed to send failure notification: {}", notify_err);
            }
        }
        result
    }

    async fn execute(
        &self,
        authenticator: &dyn Authenticator,
        shutdown: CancellationToken,
    ) -> Result<RunSummary> {
        self.settings.validate()?;
        info!("Read mode: {}", self.settings.mode);

        let plugins = self.load_plugins()?;
        let connectors = self.build_connectors()?;

        info!("Authenticating");
        let connection = authenticator.authenticate().await?;
        info!("Connected to {}", connection.instance_url());

        let streams = RunStreams::new(&self.settings);
        let stop = shutdown.child_token();

        let outcome = self
            .drive(connection, &plugins, connectors, &streams, &stop)
            .await;
        if let Err(e) = &outcome {
            streams.abort(e);
        }
        stop.cancel();
        outcome
    }

    async fn drive(
        &self,
        connection: Arc<dyn Connection>,
        plugins: &[Box<dyn SinkPlugin>],
        connectors: Vec<Box<dyn Connector>>,
        streams: &RunStreams,
        stop: &CancellationToken,
    ) -> Result<RunSummary> {
        // Plugins subscribe before any source emits.
        let context = PluginContext {
            settings: self.settings.clone(),
            connection: connection.clone(),
            ctx: self.ctx.clone(),
        };
        for plugin in plugins {
            plugin
                .observe(streams.bulk.clone(), streams.changes.clone(), context.clone())
                .await
                .map_err(|e| {
                    error!("[{}] Plugin setup failed: {}", plugin.name(), e);
                    e
                })?;
            info!("[{}] Plugin observing", plugin.name());
        }

        let observer = self
            .start_changes(connection.clone(), &streams.changes, connectors, stop)
            .await?;
        let extraction = self.start_bulk(connection, &streams.bulk).await?;

        let mode = self.settings.mode;
        let bulk_done = async {
            streams.bulk.wait().await?;
            if mode.reads_records() {
                info!("Read all completed");
            }
            Ok::<_, Error>(())
        };
        let changes_done = async {
            streams.changes.wait().await?;
            if mode.reads_changes() {
                info!("Changes completed");
            }
            Ok::<_, Error>(())
        };
        let joined = futures::future::try_join(bulk_done, changes_done).await;

        let (objects, bulk_status) = match extraction {
            Some((extractor, objects)) => {
                let status = extractor.status();
                log_extraction(&status);
                (objects, Some(status))
            }
            None => (Vec::new(), None),
        };
        joined?;

        Ok(RunSummary {
            run_id: self.ctx.run_id(),
            mode,
            objects,
            bulk: bulk_status,
            changes: observer.map(|o| o.status()),
        })
    }

    async fn start_changes(
        &self,
        connection: Arc<dyn Connection>,
        changes: &EnvelopeStream,
        connectors: Vec<Box<dyn Connector>>,
        stop: &CancellationToken,
    ) -> Result<Option<ChangeObserver>> {
        if !self.settings.mode.reads_changes() {
            return Ok(None);
        }

        let mux = Multiplexer::new(changes.clone());
        if !self.settings.has_change_source() {
            warn!("No change source configured");
            mux.fail(Error::Configuration(
                "no change topics or message-queue sources configured".to_string(),
            ));
            return Ok(None);
        }

        let mut observer = None;
        if !self.settings.topics.is_empty() {
            let checkpoints = self.checkpoints.clone().ok_or_else(|| {
                Error::Configuration("a checkpoint store is required to observe topics".to_string())
            })?;
            let change_observer = ChangeObserver::new(
                connection,
                checkpoints,
                self.ctx.clone(),
                ObserverOptions {
                    replay_override: self.settings.replay_id,
                },
            );
            let handle = change_observer.observe(&self.settings.topics, &mux).await?;

            let token = handle.cancellation_token();
            let stop = stop.clone();
            let output = changes.clone();
            tokio::spawn(
                async move {
                    tokio::select! {
                        _ = stop.cancelled() => {
                            info!("Stopping change observation");
                            token.cancel();
                        }
                        _ = output.wait() => {}
                    }
                }
                .in_current_span(),
            );
            observer = Some(change_observer);
        }

        for mut connector in connectors {
            connector.connect().await?;
            let source = mux.source(connector.name().to_string());
            let span = tracing::info_span!("change_source", source = %source.name());
            tokio::spawn(pump_connector(connector, source, stop.child_token()).instrument(span));
        }

        mux.seal();
        Ok(observer)
    }

    async fn start_bulk(
        &self,
        connection: Arc<dyn Connection>,
        bulk: &EnvelopeStream,
    ) -> Result<Option<(BulkExtractor, Vec<String>)>> {
        if !self.settings.mode.reads_records() {
            return Ok(None);
        }

        let extractor = BulkExtractor::new(
            connection,
            self.ctx.clone(),
            BulkOptions {
                poll_interval: self.settings.poll_interval(),
            },
        );
        let mux = Multiplexer::new(bulk.clone());
        let objects = extractor
            .extract_all(self.settings.objects.as_deref(), &mux)
            .await?;
        Ok(Some((extractor, objects)))
    }
}

fn log_extraction(status: &ExtractorStatus) {
    info!(
        "Bulk extraction: {} of {} objects completed, {} record batches ({} records)",
        status.objects_completed, status.objects_started, status.record_batches, status.records
    );
    for failure in &status.failures {
        warn!(object = %failure.object, "Export failure: {}", failure.message);
    }
}
