//! ==============================================================================
//! store - persistence for readings, system status and alert settings
//! ==============================================================================
//!
//! three tables:
//! ```text
//!     - sensor readings (append only, ordered by timestamp)
//!     - system status   (single row, id "system-1")
//!     - alert settings  (single row, id "settings-1")
//! ```
//!
//! the single-row tables are get-or-create: reading them on a fresh store
//! inserts and returns the defaults.
//!
//! backends:
//! ```text
//!     - memory.rs  tokio RwLock over plain vectors (tests, demos)
//!     - sqlite.rs  rusqlite behind spawn_blocking (production)
//! ```
//!
//! ==============================================================================

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};
use crate::domain::{AlertSettings, NewSensorReading, SensorReading, SystemStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

/// inclusive time window query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// append a reading, assigning id and created_at
    async fn insert_reading(&self, reading: NewSensorReading) -> StoreResult<SensorReading>;

    /// bulk insert, used for history backfill and demo seeding
    async fn insert_readings(&self, readings: Vec<NewSensorReading>) -> StoreResult<usize> {
        let count = readings.len();
        for reading in readings {
            self.insert_reading(reading).await?;
        }
        Ok(count)
    }

    /// newest first
    async fn recent_readings(&self, limit: usize) -> StoreResult<Vec<SensorReading>>;

    async fn latest_reading(&self) -> StoreResult<Option<SensorReading>> {
        Ok(self.recent_readings(1).await?.into_iter().next())
    }

    async fn readings_in_range(&self, query: RangeQuery) -> StoreResult<Vec<SensorReading>>;

    async fn count_readings(&self) -> StoreResult<u64>;

    async fn system_status(&self) -> StoreResult<SystemStatus>;

    async fn save_system_status(&self, status: SystemStatus) -> StoreResult<SystemStatus>;

    async fn alert_settings(&self) -> StoreResult<AlertSettings>;

    async fn save_alert_settings(&self, settings: AlertSettings) -> StoreResult<AlertSettings>;
}

/// build the backend selected in host.toml
pub fn open(config: &StorageConfig) -> StoreResult<Arc<dyn Store>> {
    Ok(match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
    })
}
