//! Versioned dataset cache.
//!
//! Entries are keyed by `DatasetKey`, so a source whose content changed gets
//! a fresh key and a fresh load. Stale versions age out through the TTL and
//! capacity bounds, or can be dropped explicitly.

use crate::{DataSource, Dataset, DatasetKey, SourceError};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cache bounds.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of datasets held
    pub max_datasets: u64,
    /// Time an entry lives after insertion
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_datasets: 8,
            ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct DatasetCache {
    datasets: Cache<DatasetKey, Arc<Dataset>>,
}

impl DatasetCache {
    pub fn new(config: CacheConfig) -> Self {
        let datasets = Cache::builder()
            .max_capacity(config.max_datasets)
            .time_to_live(config.ttl)
            .build();

        Self { datasets }
    }

    /// Return the cached dataset for the source's current version, loading it on a miss.
    pub async fn get_or_load<S>(&self, source: &S) -> Result<Arc<Dataset>, SourceError>
    where
        S: DataSource + Sync,
    {
        let key = source.fingerprint().await?;

        if let Some(dataset) = self.datasets.get(&key).await {
            debug!(source = source.name(), version = key.version, "Dataset cache hit");
            return Ok(dataset);
        }

        debug!(source = source.name(), version = key.version, "Dataset cache miss");
        let dataset = Arc::new(source.load().await?);
        self.datasets.insert(key, Arc::clone(&dataset)).await;

        Ok(dataset)
    }

    pub async fn get(&self, key: &DatasetKey) -> Option<Arc<Dataset>> {
        self.datasets.get(key).await
    }

    pub async fn invalidate(&self, key: &DatasetKey) {
        self.datasets.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.datasets.invalidate_all();
    }

    /// Number of cached datasets, after pending maintenance has run.
    pub async fn entry_count(&self) -> u64 {
        self.datasets.run_pending_tasks().await;
        self.datasets.entry_count()
    }
}

impl Default for DatasetCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
