use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use crate::{config::SubscriptionConfig, exchanges::adapter::Collector, ws::Callback};

/// Callback that logs every received event.
///
/// With `verbose` the full payload is logged at info level, otherwise
/// only at debug.
pub fn logging_callback(label: String, verbose: bool) -> Callback {
    let label = Arc::new(label);
    Callback::new(move |msg: Value| {
        let label = label.clone();
        async move {
            if verbose {
                info!("[{label}] {msg}");
            } else {
                log::debug!("[{label}] {msg}");
            }
            anyhow::Ok(())
        }
    })
}

/// Subscribes every configured stream on `collector`.
///
/// - Entries with `freq` subscribe to bars
/// - Entries without subscribe to trades
///
/// A failing entry is logged and skipped; the others still start.
/// Returns the number of streams that were registered.
///
pub async fn start_subscriptions(
    collector: Arc<dyn Collector>,
    subscriptions: &[SubscriptionConfig],
    verbose: bool,
) -> usize {
    let mut started = 0;

    for sub in subscriptions {
        let result = match &sub.freq {
            Some(freq) => {
                let label = format!("{} {} kline {}", collector.name(), sub.symbol, freq);
                collector
                    .subscribe_kline(&sub.symbol, freq, logging_callback(label, verbose))
                    .await
            }
            None => {
                let label = format!("{} {} trade", collector.name(), sub.symbol);
                collector
                    .subscribe_tick(&sub.symbol, logging_callback(label, verbose))
                    .await
            }
        };

        match result {
            Ok(()) => started += 1,
            Err(e) => warn!("subscription {} failed: {e}", sub.symbol),
        }
    }

    info!("{} of {} subscriptions started", started, subscriptions.len());
    started
}
