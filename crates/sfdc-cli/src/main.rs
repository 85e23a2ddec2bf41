use clap::{Args, Parser, Subcommand};
use sfdc_config::{AppConfig, LoggingConfig, RunOverrides};
use sfdc_console_sink::ConsoleOutputFactory;
use sfdc_core::{
    CheckpointStore, Context, EmailNotifier, NoOpNotifier, Notifier, Orchestrator, Registry,
    RunSummary,
};
use sfdc_nats_connector::NatsConnectorFactory;
use sfdc_nats_sink::NatsOutputFactory;
use sfdc_redis_checkpoint::RedisCheckpointStore;
use sfdc_salesforce::SalesforceAuthenticator;
use sfdc_uuid_sink::UuidWriterFactory;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sfdc-cli")]
#[command(about = "Salesforce data connector CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export records and/or observe changes, fanning them out to sink plugins
    Run(RunArgs),

    /// Validate configuration without contacting Salesforce
    Validate(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to configuration directory
    #[arg(short, long, default_value = "config")]
    config_dir: String,

    /// all, records or changes
    #[arg(long, env = "READ_MODE")]
    read_mode: Option<String>,

    /// Objects to export, comma or space separated
    #[arg(long, env = "SELECT_SOBJECTS")]
    select_sobjects: Option<String>,

    /// Sink plugins, comma or space separated
    #[arg(long, env = "PLUGIN_NAMES")]
    plugin_names: Option<String>,

    /// Streaming topics to observe, comma or space separated
    #[arg(long, env = "OBSERVE_SALESFORCE_TOPIC_NAMES")]
    topic_names: Option<String>,

    /// Replay token overriding stored checkpoints (-1 new events, -2 all retained)
    #[arg(long, env = "REPLAY_ID", allow_negative_numbers = true)]
    replay_id: Option<i64>,

    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "FORCE_API_VERSION")]
    api_version: Option<String>,

    #[arg(long, env = "SALESFORCE_USERNAME")]
    salesforce_username: Option<String>,

    #[arg(long, env = "SALESFORCE_PASSWORD", hide_env_values = true)]
    salesforce_password: Option<String>,

    #[arg(long, env = "SALESFORCE_LOGIN_URL")]
    salesforce_login_url: Option<String>,

    /// Debug logging
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

impl RunArgs {
    fn load(&self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::load(&self.config_dir)?;
        self.overrides().apply(&mut config)?;
        Ok(config)
    }

    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            read_mode: self.read_mode.clone(),
            select_sobjects: self.select_sobjects.clone(),
            plugin_names: self.plugin_names.clone(),
            topic_names: self.topic_names.clone(),
            replay_id: self.replay_id,
            redis_url: self.redis_url.clone(),
            api_version: self.api_version.clone(),
            salesforce_username: self.salesforce_username.clone(),
            salesforce_password: self.salesforce_password.clone(),
            salesforce_login_url: self.salesforce_login_url.clone(),
            verbose: self.verbose,
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
    }
}

fn build_registry() -> Registry {
    let mut registry = Registry::new();

    // Register change-source connectors
    registry.register_connector(Arc::new(NatsConnectorFactory));
    info!("Registered connector: nats");

    // Register sink plugins
    registry.register_sink(Arc::new(ConsoleOutputFactory));
    info!("Registered sink: console-output");
    registry.register_sink(Arc::new(NatsOutputFactory));
    info!("Registered sink: nats-output");
    registry.register_sink(Arc::new(UuidWriterFactory));
    info!("Registered sink: generate-uuid");

    registry
}

fn notifier() -> Arc<dyn Notifier> {
    match EmailNotifier::from_env() {
        Ok(notifier) => {
            info!("Failure notifications enabled");
            Arc::new(notifier)
        }
        Err(e) => {
            info!("Failure notifications disabled: {}", e);
            Arc::new(NoOpNotifier)
        }
    }
}

fn report(summary: &RunSummary) {
    info!("Run {} finished (mode: {})", summary.run_id, summary.mode);
    if let Some(bulk) = &summary.bulk {
        info!(
            "Exported {} record(s) in {} batch(es) from {}/{} object(s)",
            bulk.records, bulk.record_batches, bulk.objects_completed, bulk.objects_started
        );
        for failure in &bulk.failures {
            warn!("Export of {} failed: {}", failure.object, failure.message);
        }
    }
    if let Some(changes) = &summary.changes {
        info!(
            "Observed {} change message(s), saved {} checkpoint(s)",
            changes.messages, changes.checkpoints_saved
        );
        if let Some(e) = &changes.last_error {
            warn!("Last change observation error: {}", e);
        }
    }
}

/// Redis checkpoint store, needed only when topics are observed.
async fn checkpoint_store(config: &AppConfig) -> sfdc_core::Result<Option<Arc<dyn CheckpointStore>>> {
    if !config.run.mode.reads_changes() || config.run.topics.is_empty() {
        return Ok(None);
    }
    let store: Arc<dyn CheckpointStore> =
        Arc::new(RedisCheckpointStore::connect(&config.checkpoint).await?);
    info!("✓ Connected to checkpoint store");
    Ok(Some(store))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let registry = Arc::new(build_registry());
    info!("Available sinks: {:?}", registry.list_sinks());
    info!("Available connectors: {:?}", registry.list_connectors());

    let authenticator = SalesforceAuthenticator::new(config.salesforce.clone())?;

    let mut orchestrator = Orchestrator::new(config.run.clone(), registry, Context::new())
        .with_notifier(notifier());

    if let Some(store) = checkpoint_store(&config).await? {
        orchestrator = orchestrator.with_checkpoint_store(store);
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down change observation...");
            signal.cancel();
        }
    });

    let summary = orchestrator.run(&authenticator, shutdown).await?;
    report(&summary);
    Ok(())
}

fn validate(config: &AppConfig) -> anyhow::Result<()> {
    let registry = build_registry();
    let mut valid = true;

    println!("Mode: {}", config.run.mode);

    match config.salesforce.validate() {
        Ok(()) if config.salesforce.uses_access_token() => {
            println!("✓ Salesforce: access token (API v{})", config.salesforce.api_version)
        }
        Ok(()) => println!(
            "✓ Salesforce: password login via {} (API v{})",
            config.salesforce.login_url, config.salesforce.api_version
        ),
        Err(e) => {
            valid = false;
            println!("✗ Salesforce: {}", e);
        }
    }

    match &config.run.objects {
        Some(objects) => println!("\n📦 Objects: {}", objects.join(", ")),
        None => println!("\n📦 Objects: every exportable object"),
    }

    println!("\n📍 Plugins: {}", config.run.plugins.len());
    for plugin in &config.run.plugins {
        let created = registry
            .resolve_sink(&plugin.name)
            .and_then(|factory| factory.create(plugin.config.clone()));
        match created {
            Ok(_) => println!("  ✓ {}", plugin.name),
            Err(e) => {
                valid = false;
                println!("  ✗ {}: {}", plugin.name, e);
            }
        }
    }

    println!("\n🔄 Topics: {}", config.run.topics.len());
    for topic in &config.run.topics {
        println!("  • {}", topic);
    }
    if config.run.mode.reads_changes() && !config.run.topics.is_empty() {
        match config.checkpoint.validate() {
            Ok(url) => println!("  ✓ checkpoints: {}", url),
            Err(e) => {
                valid = false;
                println!("  ✗ checkpoints: {}", e);
            }
        }
    }

    for source in &config.run.change_sources {
        let created = registry
            .get_connector_factory(&source.connector_type)
            .and_then(|factory| factory.create(source.config.clone()));
        match created {
            Ok(connector) => println!("  ✓ {}", connector.name()),
            Err(e) => {
                valid = false;
                println!("  ✗ {}: {}", source.connector_type, e);
            }
        }
    }

    if let Err(e) = config.run.validate() {
        valid = false;
        println!("\n✗ {}", e);
    }

    if valid {
        println!("\n✓ Configuration is valid");
        Ok(())
    } else {
        anyhow::bail!("Configuration is invalid")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = args.load()?;
            init_tracing(&config.logging)?;
            info!("Starting Salesforce data connector with config directory: {}", args.config_dir);
            run(config).await?;
        }

        Commands::Validate(args) => {
            let config = args.load()?;
            validate(&config)?;
        }
    }

    Ok(())
}
