use chrono::{DateTime, Utc};

use crate::error::{ConnectionError, RequestError};
use crate::schema::{Bar, Trade};
use crate::ws::Callback;

/// Collector is the abstraction between the application and one
/// exchange's market-data APIs.
///
/// Each exchange implementation must:
/// - Fetch historical bars and trades over REST
/// - Map tick / bar subscriptions to exchange stream topics
/// - Hand raw stream events to the registered callbacks
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared across tasks behind an `Arc`
///
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Canonical exchange name, matching `exchange` in configuration.
    fn name(&self) -> &'static str;

    /// Market segment, used in the storage layout.
    fn market(&self) -> &'static str {
        "spot"
    }

    /// Bars of `freq` (e.g. "1m", "1h") covering `[start, end]`.
    async fn get_kline(
        &self,
        symbol: &str,
        freq: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, RequestError>;

    /// Recent trades whose execution time falls within `[start, end]`.
    ///
    /// NOTE:
    /// - Exchanges only serve a bounded window of recent trades;
    ///   older ranges yield an empty list rather than an error.
    async fn get_tick(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trade>, RequestError>;

    /// Streams every trade of `symbol` into `callback`.
    async fn subscribe_tick(&self, symbol: &str, callback: Callback) -> Result<(), ConnectionError>;

    /// Streams bar updates of `symbol` at `freq` into `callback`.
    async fn subscribe_kline(
        &self,
        symbol: &str,
        freq: &str,
        callback: Callback,
    ) -> Result<(), ConnectionError>;

    /// Releases the REST client and the stream connection.
    async fn close(&self);
}
