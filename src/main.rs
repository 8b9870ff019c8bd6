use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{error, info};
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;

use zq_collector::{
    collector::runner::start_subscriptions, config::Config, exchanges::get_collector,
    metrics::METRICS, service::DataService, storage::JsonLinesStorage,
};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls) and logging
// - Load configuration
// - Build the configured collector, register it with the data
//   service and start its streams
// - Run until Ctrl-C, then close everything
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, once and before any TLS connection.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = Config::load(&path)?;

    let service = DataService::new(Arc::new(JsonLinesStorage::new(&config.data_dir)));
    let collector = get_collector(&config)?;
    service.register_collector(collector.name(), collector.clone()).await;
    info!("starting {} collector, data in {}", collector.name(), config.data_dir);

    // --------------------------------------------------------
    // Metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let reporter = tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;
            info!("[METRICS] {}", METRICS.summary());
        }
    });

    start_subscriptions(collector.clone(), &config.subscriptions, config.debug_log()).await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    reporter.abort();
    service.close().await;
    info!("[METRICS] {}", METRICS.summary());

    Ok(())
}
