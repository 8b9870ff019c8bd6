use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    config::Config,
    error::{ConnectionError, RequestError},
    rest::{RequestDescriptor, RetryingRequestExecutor},
    schema::{Bar, Trade},
    util,
    ws::{Callback, Protocol, StreamClient, Topic},
};

use super::adapter::Collector;

pub const REST_HOST: &str = "https://api.binance.com";
pub const WS_HOST: &str = "wss://stream.binance.com:9443/ws";

/// Maximum rows Binance returns per history request.
const HISTORY_LIMIT: u32 = 1000;

/// Trade stream topic, e.g. `btcusdt@trade`.
pub fn trade_topic(symbol: &str) -> Topic {
    Topic::new(format!("{}@trade", util::compact_symbol(symbol).to_lowercase()))
}

/// Bar stream topic, e.g. `btcusdt@kline_1m`.
pub fn kline_topic(symbol: &str, freq: &str) -> Topic {
    Topic::new(format!(
        "{}@kline_{}",
        util::compact_symbol(symbol).to_lowercase(),
        freq
    ))
}

/// Binance spot stream framing
///
/// https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams
///
/// Raw streams deliver bare events (`{"e":"trade","s":"BTCUSDT",..}`);
/// combined streams wrap them as `{"stream":..,"data":{..}}`.
pub struct BinanceProtocol;

impl Protocol for BinanceProtocol {
    fn subscribe_frame(&self, topic: &Topic, request_id: u64) -> Value {
        json!({
            "method": "SUBSCRIBE",
            "params": [topic.as_str()],
            "id": request_id
        })
    }

    fn unsubscribe_frame(&self, topic: &Topic, request_id: u64) -> Value {
        json!({
            "method": "UNSUBSCRIBE",
            "params": [topic.as_str()],
            "id": request_id
        })
    }

    fn topic_of(&self, message: &Value) -> Option<Topic> {
        // {"result":null,"id":1}
        if message.get("result").is_some() && message.get("id").is_some() {
            return None;
        }

        if let Some(stream) = message.get("stream").and_then(Value::as_str) {
            return Some(Topic::new(stream));
        }

        let symbol = message.get("s")?.as_str()?;
        match message.get("e")?.as_str()? {
            "trade" => Some(trade_topic(symbol)),
            "kline" => {
                let freq = message.get("k")?.get("i")?.as_str()?;
                Some(kline_topic(symbol, freq))
            }
            _ => None,
        }
    }
}

/// One row of `/api/v3/klines`: a positional array whose last element
/// is unused.
#[derive(Deserialize)]
struct KlineRow(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    #[allow(dead_code)] Value,
);

impl From<KlineRow> for Bar {
    fn from(row: KlineRow) -> Self {
        Bar {
            open_time: row.0,
            open: row.1,
            high: row.2,
            low: row.3,
            close: row.4,
            volume: row.5,
            close_time: row.6,
            quote_volume: row.7,
            trades: row.8,
            taker_buy_base: row.9,
            taker_buy_quote: row.10,
        }
    }
}

/// Binance spot collector: history over REST, live data over one
/// shared stream connection.
pub struct BinanceCollector {
    rest_host: String,
    rest: RetryingRequestExecutor,
    stream: StreamClient,
}

impl BinanceCollector {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let rest = RetryingRequestExecutor::new(&config.rest)?;
        let stream = StreamClient::new(config.ws.clone(), Arc::new(BinanceProtocol))?;
        Ok(Self::with_parts(config.rest.host.clone(), rest, stream))
    }

    /// Assembles a collector from prebuilt clients.
    pub fn with_parts(
        rest_host: impl Into<String>,
        rest: RetryingRequestExecutor,
        stream: StreamClient,
    ) -> Self {
        Self {
            rest_host: rest_host.into().trim_end_matches('/').to_string(),
            rest,
            stream,
        }
    }

    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.rest_host, path)
    }
}

#[async_trait::async_trait]
impl Collector for BinanceCollector {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn get_kline(
        &self,
        symbol: &str,
        freq: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, RequestError> {
        let request = RequestDescriptor::get(self.endpoint("/api/v3/klines"))
            .query("symbol", util::compact_symbol(symbol))
            .query("interval", freq)
            .query("startTime", start.timestamp_millis())
            .query("endTime", end.timestamp_millis())
            .query("limit", HISTORY_LIMIT);

        let rows: Vec<KlineRow> = self.rest.execute_as(&request).await?;
        debug!("binance {symbol} {freq}: {} bars", rows.len());
        Ok(rows.into_iter().map(Bar::from).collect())
    }

    async fn get_tick(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trade>, RequestError> {
        let request = RequestDescriptor::get(self.endpoint("/api/v3/trades"))
            .query("symbol", util::compact_symbol(symbol))
            .query("limit", HISTORY_LIMIT);

        let trades: Vec<Trade> = self.rest.execute_as(&request).await?;
        let (from, to) = (start.timestamp_millis(), end.timestamp_millis());

        Ok(trades
            .into_iter()
            .filter(|t| (from..=to).contains(&t.time))
            .collect())
    }

    async fn subscribe_tick(&self, symbol: &str, callback: Callback) -> Result<(), ConnectionError> {
        self.stream.subscribe(trade_topic(symbol), callback).await
    }

    async fn subscribe_kline(
        &self,
        symbol: &str,
        freq: &str,
        callback: Callback,
    ) -> Result<(), ConnectionError> {
        self.stream.subscribe(kline_topic(symbol, freq), callback).await
    }

    async fn close(&self) {
        self.stream.close().await;
        self.rest.close().await;
    }
}
