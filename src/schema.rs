use serde::{Deserialize, Serialize};

// ------------------------------------------------------------
// Bar (candlestick)
// ------------------------------------------------------------
//
// One OHLCV interval as returned by an exchange history endpoint.
//
// DESIGN DECISION:
// Prices and volumes are kept as strings to avoid floating-point
// precision issues; conversion is left to the consumer.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Bar {
    /// Interval open time in milliseconds since Unix epoch
    pub open_time: i64,

    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,

    /// Base asset volume
    pub volume: String,

    /// Interval close time in milliseconds
    pub close_time: i64,

    /// Quote asset volume
    pub quote_volume: String,

    /// Number of trades in the interval
    pub trades: u64,

    pub taker_buy_base: String,
    pub taker_buy_quote: String,
}

// ------------------------------------------------------------
// Trade
// ------------------------------------------------------------
//
// A single executed trade from a recent-trades endpoint.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: u64,
    pub price: String,
    pub qty: String,
    pub quote_qty: String,

    /// Execution time in milliseconds
    pub time: i64,

    /// True when the buyer was the resting order (i.e. a sell aggressor)
    pub is_buyer_maker: bool,

    pub is_best_match: bool,
}
