use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{RangeQuery, SortOrder, Store, StoreResult};
use crate::domain::{
    AlertSettings, NewSensorReading, SensorReading, SystemStatus, ALERT_SETTINGS_ID,
    SYSTEM_STATUS_ID,
};

#[derive(Default)]
struct Tables {
    /// kept sorted by timestamp, oldest first
    readings: Vec<SensorReading>,
    status: Option<SystemStatus>,
    settings: Option<AlertSettings>,
}

/// In-memory implementation of Store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_reading(&self, reading: NewSensorReading) -> StoreResult<SensorReading> {
        let stored = reading.into_stored(Utc::now());
        let mut tables = self.tables.write().await;

        // after any equal timestamps, so insertion order breaks ties
        let index = tables.readings.partition_point(|r| r.timestamp <= stored.timestamp);
        tables.readings.insert(index, stored.clone());

        Ok(stored)
    }

    async fn recent_readings(&self, limit: usize) -> StoreResult<Vec<SensorReading>> {
        let tables = self.tables.read().await;
        Ok(tables.readings.iter().rev().take(limit).cloned().collect())
    }

    async fn readings_in_range(&self, query: RangeQuery) -> StoreResult<Vec<SensorReading>> {
        let tables = self.tables.read().await;
        let in_range = tables
            .readings
            .iter()
            .filter(|r| r.timestamp >= query.start && r.timestamp <= query.end);

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(match query.order {
            SortOrder::OldestFirst => in_range.take(limit).cloned().collect(),
            SortOrder::NewestFirst => in_range.rev().take(limit).cloned().collect(),
        })
    }

    async fn count_readings(&self) -> StoreResult<u64> {
        Ok(self.tables.read().await.readings.len() as u64)
    }

    async fn system_status(&self) -> StoreResult<SystemStatus> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .status
            .get_or_insert_with(|| SystemStatus::initial(Utc::now()))
            .clone())
    }

    async fn save_system_status(&self, mut status: SystemStatus) -> StoreResult<SystemStatus> {
        status.id = SYSTEM_STATUS_ID.to_string();
        self.tables.write().await.status = Some(status.clone());
        Ok(status)
    }

    async fn alert_settings(&self) -> StoreResult<AlertSettings> {
        let mut tables = self.tables.write().await;
        Ok(tables.settings.get_or_insert_with(AlertSettings::default).clone())
    }

    async fn save_alert_settings(&self, mut settings: AlertSettings) -> StoreResult<AlertSettings> {
        settings.id = ALERT_SETTINGS_ID.to_string();
        self.tables.write().await.settings = Some(settings.clone());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn readings_are_ordered() {
        conformance::readings_are_ordered(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn range_is_inclusive() {
        conformance::range_is_inclusive(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        conformance::equal_timestamps_keep_insertion_order(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn single_rows_are_get_or_create() {
        conformance::single_rows_are_get_or_create(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn clones_share_tables() {
        let store = MemoryStore::new();
        let other = store.clone();

        store
            .insert_reading(NewSensorReading {
                timestamp: Utc::now(),
                temperature: 25.0,
                ph: 7.0,
                tds_level: 450.0,
            })
            .await
            .unwrap();

        assert_eq!(other.count_readings().await.unwrap(), 1);
    }
}
