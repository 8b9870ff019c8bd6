//! Dated file layout for collected market data.
//!
//! Every file holds one symbol, one data type and one UTC day:
//!
//! ```text
//! <data_dir>/<broker>/<market>/<data_type>/<symbol>[_<freq>]_<YYYYMMDD>.<ext>
//! ```
//!
//! The bundled backend stores one JSON record per line.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::error::StorageError;
use crate::schema::{Bar, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Kline,
    Tick,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Tick => "tick",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataKey {
    pub broker: String,
    pub market: String,
    pub data_type: DataType,
    pub symbol: String,
    /// Bar interval; only klines carry one
    pub freq: Option<String>,
    pub date: NaiveDate,
}

impl DataKey {
    pub fn kline(broker: &str, market: &str, symbol: &str, freq: &str, date: NaiveDate) -> Self {
        Self {
            broker: broker.to_string(),
            market: market.to_string(),
            data_type: DataType::Kline,
            symbol: symbol.to_string(),
            freq: Some(freq.to_string()),
            date,
        }
    }

    pub fn tick(broker: &str, market: &str, symbol: &str, date: NaiveDate) -> Self {
        Self {
            broker: broker.to_string(),
            market: market.to_string(),
            data_type: DataType::Tick,
            symbol: symbol.to_string(),
            freq: None,
            date,
        }
    }

    /// `<broker>/<market>/<data_type>/<file>` below a data root.
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        let day = self.date.format("%Y%m%d");
        let file = match self.freq.as_deref().filter(|f| !f.is_empty()) {
            Some(freq) => format!("{}_{}_{}.{}", self.symbol, freq, day, extension),
            None => format!("{}_{}.{}", self.symbol, day, extension),
        };

        [
            self.broker.as_str(),
            self.market.as_str(),
            self.data_type.as_str(),
            file.as_str(),
        ]
        .iter()
        .collect()
    }
}

/// Persists bars and trades under the dated layout.
///
/// Saving replaces the file for the key. Loading a key that was never
/// saved yields an empty list.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Absolute location of the file for `key`.
    fn path(&self, key: &DataKey) -> PathBuf;

    async fn save_bars(&self, key: &DataKey, bars: &[Bar]) -> Result<PathBuf, StorageError>;

    async fn load_bars(&self, key: &DataKey) -> Result<Vec<Bar>, StorageError>;

    async fn save_trades(&self, key: &DataKey, trades: &[Trade]) -> Result<PathBuf, StorageError>;

    async fn load_trades(&self, key: &DataKey) -> Result<Vec<Trade>, StorageError>;
}

/// `Storage` writing newline-delimited JSON.
#[derive(Debug, Clone)]
pub struct JsonLinesStorage {
    data_dir: PathBuf,
}

impl JsonLinesStorage {
    pub const EXTENSION: &'static str = "jsonl";

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn write_records<T: Serialize + Sync>(
        &self,
        key: &DataKey,
        records: &[T],
    ) -> Result<PathBuf, StorageError> {
        let path = self.path(key);

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record).map_err(|source| StorageError::Encode {
                path: path.clone(),
                source,
            })?;
            buf.push(b'\n');
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // readers never observe a half-written file
        let staging = path.with_extension(format!("{}.tmp", Self::EXTENSION));
        fs::write(&staging, &buf).await.map_err(|source| StorageError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).await.map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        debug!("stored {} records in {}", records.len(), path.display());
        Ok(path)
    }

    async fn read_records<T: DeserializeOwned>(&self, key: &DataKey) -> Result<Vec<T>, StorageError> {
        let path = self.path(key);

        let data = match fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        data.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|source| StorageError::Decode {
                    path: path.clone(),
                    line: n + 1,
                    source,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Storage for JsonLinesStorage {
    fn path(&self, key: &DataKey) -> PathBuf {
        self.data_dir.join(key.relative_path(Self::EXTENSION))
    }

    async fn save_bars(&self, key: &DataKey, bars: &[Bar]) -> Result<PathBuf, StorageError> {
        self.write_records(key, bars).await
    }

    async fn load_bars(&self, key: &DataKey) -> Result<Vec<Bar>, StorageError> {
        self.read_records(key).await
    }

    async fn save_trades(&self, key: &DataKey, trades: &[Trade]) -> Result<PathBuf, StorageError> {
        self.write_records(key, trades).await
    }

    async fn load_trades(&self, key: &DataKey) -> Result<Vec<Trade>, StorageError> {
        self.read_records(key).await
    }
}
