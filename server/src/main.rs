//! Coin rates service binary.
//!
//! Run with:
//! ```bash
//! COIN_RATES_API_KEY=... coin-rates --config config/coin-rates.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use coin_rates_common::config::{AppConfig, StorageBackend, DEFAULT_CONFIG_PATH};
use coin_rates_provider::{CryptoCompareClient, RateProvider};
use coin_rates_server::{router, RateService, RateUpdater};
use coin_rates_storage::{InMemoryPriceStore, PostgresPriceStore, PriceStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "coin-rates")]
#[command(about = "Periodic crypto rate fetcher with last/aggregate HTTP queries")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on, overrides server.listen
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// CryptoCompare API key
    #[arg(long, env = "COIN_RATES_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// PostgreSQL connection string
    #[arg(long, env = "COIN_RATES_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(key) = &self.api_key {
            config.provider.api_key = key.clone();
        }
        if let Some(url) = &self.database_url {
            config.storage.url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    args.apply(&mut config);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !args.config.exists() {
        warn!(
            "Config file {} not found, using defaults",
            args.config.display()
        );
    }
    config.validate()?;

    info!("Starting coin rates service");
    info!("  Listen: {}", config.server.listen);
    info!("  Storage: {:?}", config.storage.backend);
    info!("  Refresh interval: {:?}", config.refresh.interval());

    let store = open_store(&config).await?;
    let provider: Arc<dyn RateProvider> = Arc::new(CryptoCompareClient::new(
        &config.provider.base_url,
        &config.provider.api_key,
        &config.provider.currency,
        config.provider.request_timeout(),
    )?);
    let service = Arc::new(
        RateService::builder()
            .store(store)
            .provider(provider)
            .build()?,
    );

    let cancel = CancellationToken::new();
    let updater = RateUpdater::new(service.clone(), config.refresh.interval()).spawn(cancel.clone());

    let listener = TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    info!("HTTP server listening on http://{}", config.server.listen);
    info!("Available endpoints:");
    info!("  GET /rates/last?titles=BTC,ETH");
    info!("  GET /rates/agg?titles=BTC,ETH&aggFunc=MAX|MIN|AVG");
    info!("  GET /health");

    let served = axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    updater.await.context("rate updater task panicked")?;
    served.context("HTTP server failed")?;

    info!("Coin rates service stopped");
    Ok(())
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn PriceStore>> {
    let store: Arc<dyn PriceStore> = match config.storage.backend {
        StorageBackend::Postgres => Arc::new(
            PostgresPriceStore::connect(
                &config.storage.url,
                config.storage.max_connections,
                config.storage.acquire_timeout(),
                config.storage.statement_timeout(),
            )
            .await?,
        ),
        StorageBackend::Memory => {
            warn!("Using in-memory price store, history is lost on restart");
            Arc::new(InMemoryPriceStore::new())
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
