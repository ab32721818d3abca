use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    wagate_common::Result,
    wagate_config::{GatewayConfig, Mode},
    wagate_gateway::{AppState, server},
    wagate_instance::{InstanceDeps, InstanceManager},
    wagate_plugins::PluginRegistry,
    wagate_storage::retention::RetentionSweeper,
    wagate_transport::bridge::BridgeConnector,
    wagate_webhooks::{DispatcherOptions, WebhookDispatcher},
};

#[derive(Parser)]
#[command(name = "wagate", about = "wagate — multi-tenant WhatsApp gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides WAGATE_BIND).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides WAGATE_PORT).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default when no subcommand is provided).
    Serve,
    /// Run database migrations and exit.
    Migrate,
    /// Print persisted instance counts and exit.
    Status,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = GatewayConfig::from_env();
    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Migrate => {
            wagate_storage::connect(&config.database_url).await?;
            info!("migrations applied");
            Ok(())
        },
        Commands::Status => status(config).await,
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let config = Arc::new(config);
    let pool = wagate_storage::connect(&config.database_url).await?;

    let instances = Arc::new(wagate_storage::SqliteInstanceStore::new(pool.clone()));
    let messages = Arc::new(wagate_storage::SqliteMessageStore::new(pool.clone()));
    let logs = Arc::new(wagate_storage::SqliteInstanceLogStore::new(pool.clone()));
    let webhooks = Arc::new(wagate_storage::SqliteWebhookStore::new(pool.clone()));
    let history = Arc::new(wagate_storage::SqliteWebhookHistoryStore::new(pool.clone()));

    let registry = Arc::new(PluginRegistry::builtin());
    let dispatcher = Arc::new(WebhookDispatcher::new(
        webhooks.clone(),
        history.clone(),
        DispatcherOptions {
            timeout: config.webhook.timeout(),
            ..Default::default()
        },
    ));
    let factory = Arc::new(BridgeConnector::new(
        config.bridge_url.clone(),
        config.group_query_timeout(),
    ));

    let deps = InstanceDeps {
        instances: instances.clone(),
        messages: messages.clone(),
        logs: logs.clone(),
        dispatcher,
        registry: Arc::clone(&registry),
        factory,
        config: Arc::clone(&config),
    };
    let manager = Arc::new(InstanceManager::new(deps));
    manager.init().await?;

    if matches!(config.mode, Mode::Single | Mode::Both) {
        match &config.default_phone {
            Some(phone) => {
                if let Err(e) = manager.ensure_default(phone).await {
                    warn!(error = %e, "failed to start default instance");
                }
            },
            None => warn!("single mode without WAGATE_DEFAULT_PHONE; no default instance"),
        }
    }

    let state = AppState {
        manager: Arc::clone(&manager),
        registry,
        instances,
        messages,
        logs,
        webhooks,
        history,
        sweeper: Arc::new(RetentionSweeper::new(pool, config.auth_root.clone())),
        config: Arc::clone(&config),
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    server::serve(state, &config.bind, config.port, shutdown).await?;

    manager.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

async fn status(config: GatewayConfig) -> Result<()> {
    use wagate_storage::InstanceStore as _;
    let pool = wagate_storage::connect(&config.database_url).await?;
    let store = wagate_storage::SqliteInstanceStore::new(pool);
    let counts = store.count_by_status().await?;
    if counts.is_empty() {
        println!("no instances");
        return Ok(());
    }
    for (status, count) in counts {
        println!("{status:>12}  {count}");
    }
    Ok(())
}
