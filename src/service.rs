use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use log::{debug, info};
use tokio::sync::RwLock;

use crate::error::{ArchiveError, ConnectionError, RequestError};
use crate::exchanges::adapter::Collector;
use crate::schema::{Bar, Trade};
use crate::storage::{DataKey, Storage};
use crate::ws::Callback;

// ------------------------------------------------------------
// Data service
// ------------------------------------------------------------
//
// Entry point for applications using several exchanges at once.
// Collectors are registered under a name and every call selects one.
//
// CONTRACT:
// - An absent or unknown collector name is not an error: reads yield
//   an empty list and subscriptions do nothing
// - Registering an existing name replaces the previous collector
//
pub struct DataService {
    storage: Arc<dyn Storage>,
    collectors: RwLock<HashMap<String, Arc<dyn Collector>>>,
}

impl DataService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            collectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Returns the collector previously registered under `name`, if any.
    pub async fn register_collector(
        &self,
        name: impl Into<String>,
        collector: Arc<dyn Collector>,
    ) -> Option<Arc<dyn Collector>> {
        let name = name.into();
        info!("registered collector '{}' ({})", name, collector.name());
        self.collectors.write().await.insert(name, collector)
    }

    pub async fn collector(&self, name: Option<&str>) -> Option<Arc<dyn Collector>> {
        let name = name?;
        let found = self.collectors.read().await.get(name).cloned();
        if found.is_none() {
            debug!("no collector registered as '{name}'");
        }
        found
    }

    /// Registered names, sorted.
    pub async fn collector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collectors.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_kline(
        &self,
        symbol: &str,
        freq: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        collector: Option<&str>,
    ) -> Result<Vec<Bar>, RequestError> {
        match self.collector(collector).await {
            Some(c) => c.get_kline(symbol, freq, start, end).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_tick(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        collector: Option<&str>,
    ) -> Result<Vec<Trade>, RequestError> {
        match self.collector(collector).await {
            Some(c) => c.get_tick(symbol, start, end).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn subscribe_tick(
        &self,
        symbol: &str,
        callback: Callback,
        collector: Option<&str>,
    ) -> Result<(), ConnectionError> {
        match self.collector(collector).await {
            Some(c) => c.subscribe_tick(symbol, callback).await,
            None => Ok(()),
        }
    }

    pub async fn subscribe_kline(
        &self,
        symbol: &str,
        freq: &str,
        callback: Callback,
        collector: Option<&str>,
    ) -> Result<(), ConnectionError> {
        match self.collector(collector).await {
            Some(c) => c.subscribe_kline(symbol, freq, callback).await,
            None => Ok(()),
        }
    }

    /// Fetches the bars of one UTC day and stores them under `collector`.
    pub async fn archive_kline(
        &self,
        symbol: &str,
        freq: &str,
        date: NaiveDate,
        collector: &str,
    ) -> Result<PathBuf, ArchiveError> {
        let source = self.require(collector).await?;
        let (start, end) = day_bounds(date);

        let bars = source.get_kline(symbol, freq, start, end).await?;
        let key = DataKey::kline(collector, source.market(), symbol, freq, date);
        Ok(self.storage.save_bars(&key, &bars).await?)
    }

    /// Fetches the trades of one UTC day and stores them under `collector`.
    pub async fn archive_tick(
        &self,
        symbol: &str,
        date: NaiveDate,
        collector: &str,
    ) -> Result<PathBuf, ArchiveError> {
        let source = self.require(collector).await?;
        let (start, end) = day_bounds(date);

        let trades = source.get_tick(symbol, start, end).await?;
        let key = DataKey::tick(collector, source.market(), symbol, date);
        Ok(self.storage.save_trades(&key, &trades).await?)
    }

    async fn require(&self, name: &str) -> Result<Arc<dyn Collector>, ArchiveError> {
        self.collector(Some(name))
            .await
            .ok_or_else(|| ArchiveError::UnknownCollector(name.to_string()))
    }

    /// Closes every registered collector.
    pub async fn close(&self) {
        let collectors: Vec<_> = self.collectors.read().await.values().cloned().collect();
        for collector in collectors {
            collector.close().await;
        }
    }
}

/// Inclusive millisecond bounds of a UTC day.
fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = start + TimeDelta::days(1) - TimeDelta::milliseconds(1);
    (start, end)
}
