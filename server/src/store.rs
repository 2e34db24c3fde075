//! Durable storage of per-country scores
//!
//! The server only needs two primitives from a store: a bulk read used to
//! seed the cache at startup and a per-country upsert used by the periodic
//! flush. Records are `{ name, score }`, one per country, unique on `name`.

use crate::scores::CountryScore;
use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use shared::Scores;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Record shape as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub name: String,
    pub score: i64,
}

impl From<StoredRecord> for CountryScore {
    fn from(record: StoredRecord) -> Self {
        CountryScore::new(record.name, record.score)
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Every stored country score
    async fn read_all(&self) -> Result<Vec<CountryScore>, StoreError>;

    /// Overwrites the score of `country`, inserting it when missing
    ///
    /// Must be safe to call concurrently for different countries.
    async fn upsert(&self, country: &str, score: i64) -> Result<(), StoreError>;
}

/// Process-local store, used when no store file is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = CountryScore>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.country_code, record.score))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    pub async fn get(&self, country: &str) -> Option<i64> {
        self.records.read().await.get(country).copied()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn read_all(&self) -> Result<Vec<CountryScore>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .map(|(name, score)| CountryScore::new(name.clone(), *score))
            .collect())
    }

    async fn upsert(&self, country: &str, score: i64) -> Result<(), StoreError> {
        self.records.write().await.insert(country.to_string(), score);
        Ok(())
    }
}

/// Store backed by a JSON array of records on disk
///
/// Each upsert rewrites the file through a temporary sibling and a rename,
/// so a crash mid-write leaves the previous contents intact. Writers are
/// serialized; a missing file reads as an empty store.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_records(&self, records: &[StoredRecord]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");

        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn read_all(&self) -> Result<Vec<CountryScore>, StoreError> {
        let records = self.read_records().await?;
        Ok(records.into_iter().map(CountryScore::from).collect())
    }

    async fn upsert(&self, country: &str, score: i64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_records().await?;

        match records.iter_mut().find(|record| record.name == country) {
            Some(record) => record.score = score,
            None => records.push(StoredRecord {
                name: country.to_string(),
                score,
            }),
        }

        self.write_records(&records).await
    }
}

/// Outcome of one flush cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

/// Writes every country in `scores` to `store`
///
/// Each country is upserted on its own task; a failing country is logged
/// and counted without holding back the others.
pub async fn flush_scores(store: Arc<dyn PersistenceGateway>, scores: Scores) -> FlushReport {
    let mut tasks = JoinSet::new();
    for (country, score) in scores {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let result = store.upsert(&country, score).await;
            (country, result)
        });
    }

    let mut report = FlushReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => report.written += 1,
            Ok((country, Err(e))) => {
                warn!("Failed to persist score for {}: {}", country, e);
                report.failed += 1;
            }
            Err(e) => {
                error!("Flush task aborted: {}", e);
                report.failed += 1;
            }
        }
    }

    debug!(
        "Flush finished: {} written, {} failed",
        report.written, report.failed
    );
    report
}
