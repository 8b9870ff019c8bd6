//! Exchange collector registry and factory
//!
//! All exchange-specific logic lives in dedicated adapter modules.
//! The rest of the application interacts exclusively through the
//! `Collector` trait.

pub mod adapter;
pub mod binance;

use std::sync::Arc;

use anyhow::bail;

use crate::config::Config;
use adapter::Collector;

/// Builds the collector named by `config.exchange`.
///
/// CONTRACT:
/// - Names are lowercase and stable
/// - Unknown names are an error, not a silent no-op
///
pub fn get_collector(config: &Config) -> anyhow::Result<Arc<dyn Collector>> {
    match config.exchange.as_str() {
        "binance" => Ok(Arc::new(binance::BinanceCollector::new(config)?)),
        other => bail!("exchange '{other}' is not supported"),
    }
}
