// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// - config:    Configuration structs loaded from JSON + env overrides
// - error:     Typed errors of the REST and WebSocket layers
// - metrics:   Process-wide runtime counters
// - rest:      Retrying request executor, rate limiting, HTTP transport
// - ws:        Connection state machine, subscriptions, dispatch
// - schema:    Bar / trade records
// - util:      Symbol normalization
// - exchanges: Exchange collectors and the collector factory
// - collector: Startup orchestration of configured streams
// - service:   Named collector registry over shared storage
// - storage:   Dated file layout and record persistence
//
pub mod collector;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod metrics;
pub mod rest;
pub mod schema;
pub mod service;
pub mod storage;
pub mod util;
pub mod ws;
