//! Edupay Server
//!
//! Payment settlement for the e-learning platform: creates payment intents
//! at Paymob, PayPal and Kashier and settles their webhooks into the wallet
//! ledger and course enrollment exactly once.

mod api;
mod collaborators;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use collaborators::HttpCollaborators;
use config::{ConfigLoader, LoadedConfig, get_database_url};
use edupay_core::orchestrator::PaymentOrchestrator;
use edupay_core::registry::StrategyRegistry;
use edupay_core::settlement::{Downstream, SettlementDispatcher};
use edupay_core::store::PgSettlementStore;
use edupay_core::strategies::kashier::KashierStrategy;
use edupay_core::strategies::paymob::PaymobStrategy;
use edupay_core::strategies::paypal::PayPalStrategy;
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Edupay - payment settlement server
#[derive(Parser, Debug)]
#[command(name = "edupay-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./edupay-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "EDUPAY_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_json);

    tracing::info!("Starting edupay-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(&args.config, args.listen);
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let listen_addr = config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let dispatcher = build_dispatcher(&config, PgSettlementStore::new(db_pool.clone()))?;
    let state = AppState::new(Arc::new(dispatcher), config.gateway);

    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Wire strategies, collaborators and the settlement store together.
///
/// Refuses to start unless every provider has a strategy.
fn build_dispatcher(
    config: &LoadedConfig,
    store: PgSettlementStore,
) -> anyhow::Result<SettlementDispatcher> {
    let provider_timeout = config.timeouts.provider;

    let mut registry = StrategyRegistry::new();
    registry.register_strategy(Arc::new(PaymobStrategy::new(
        config.providers.paymob.clone(),
        provider_timeout,
    )));
    registry.register_strategy(Arc::new(PayPalStrategy::new(
        config.providers.paypal.clone(),
        provider_timeout,
    )));
    registry.register_strategy(Arc::new(KashierStrategy::new(
        config.providers.kashier.clone(),
        provider_timeout,
    )));
    if !registry.is_complete() {
        anyhow::bail!(
            "no strategy registered for providers {:?}",
            registry.missing_providers()
        );
    }
    tracing::info!(providers = ?registry.providers(), "Payment providers registered");

    let collaborators = HttpCollaborators::new(&config.collaborators, config.timeouts.downstream)?;
    let catalog = Arc::new(collaborators.catalog);
    let orchestrator = PaymentOrchestrator::new(registry, catalog.clone(), provider_timeout);

    Ok(SettlementDispatcher::new(
        Arc::new(orchestrator),
        Arc::new(store),
        Downstream {
            ledger: Arc::new(collaborators.ledger),
            enrollment: Arc::new(collaborators.enrollment),
            catalog,
        },
        &config.timeouts,
        &config.settlement,
    ))
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
