//! ==============================================================================
//! sync.rs - pull, decode and store telemetry from the node
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     one sync cycle is:
//!         fetch latest content -> decode -> store reading -> refresh status
//!
//!     the same cycle backs three callers:
//!         - POST /api/sync-antares        (manual)
//!         - POST /api/cron/sync-antares   (external scheduler)
//!         - run_periodic                  (in-process loop, sync.enabled)
//! ```
//!
//! relationships:
//! ```text
//!     - fetches via: antares.rs (TelemetrySource impl)
//!     - decodes via: decoder.rs
//!     - writes to: store/ (Store)
//! ```
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::antares::AntaresError;
use crate::decoder::{self, DecodeError, Decoded, RangeWarning};
use crate::domain::{format_uptime, ConnectionStatus, NewSensorReading, SensorReading};
use crate::store::{Store, StoreError};

/// where raw telemetry content comes from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// content of the newest instance
    async fn fetch_latest(&self) -> Result<Value, AntaresError>;

    /// content of up to `limit` recent instances, oldest first
    async fn fetch_history(&self, limit: u32) -> Result<Vec<Value>, AntaresError>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] AntaresError),

    #[error("failed to decode telemetry: {0}")]
    Decode(#[from] DecodeError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// true when the platform or payload was at fault rather than this host
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Decode(_))
    }
}

/// result of one successful cycle
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub reading: SensorReading,
    pub warnings: Vec<RangeWarning>,
}

#[derive(Clone)]
pub struct SyncService {
    source: Arc<dyn TelemetrySource>,
    store: Arc<dyn Store>,
    show_sensor_data: bool,
    /// reported as the status row's uptime
    started: DateTime<Utc>,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        store: Arc<dyn Store>,
        show_sensor_data: bool,
    ) -> Self {
        Self { source, store, show_sensor_data, started: Utc::now() }
    }

    pub fn started_at(mut self, started: DateTime<Utc>) -> Self {
        self.started = started;
        self
    }

    /// run one cycle. any failure leaves the status row at "error".
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        match self.try_sync().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "antares sync failed");
                self.mark_error().await;
                Err(e)
            }
        }
    }

    async fn try_sync(&self) -> Result<SyncReport, SyncError> {
        let content = self.source.fetch_latest().await?;
        let decoded = decoder::decode_value(&content)?;
        self.log_decoded(&decoded);

        let reading = self
            .store
            .insert_reading(NewSensorReading::from_decoded(&decoded.reading, Utc::now()))
            .await?;
        if self.show_sensor_data {
            info!(
                temperature = reading.temperature,
                ph = reading.ph,
                tds = reading.tds_level,
                "stored reading"
            );
        }

        self.mark_connected().await?;

        Ok(SyncReport { reading, warnings: decoded.warnings })
    }

    /// load up to `limit` historical instances, skipping ones that do not decode.
    /// returns how many readings were stored.
    pub async fn backfill(&self, limit: u32) -> Result<usize, SyncError> {
        if limit == 0 {
            return Ok(0);
        }

        let contents = match self.source.fetch_history(limit).await {
            Ok(contents) => contents,
            Err(e) => {
                error!(error = %e, "antares history fetch failed");
                self.mark_error().await;
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let total = contents.len();
        let readings: Vec<NewSensorReading> = contents
            .iter()
            .filter_map(|content| match decoder::decode_value(content) {
                Ok(decoded) => {
                    self.log_decoded(&decoded);
                    Some(NewSensorReading::from_decoded(&decoded.reading, now))
                }
                Err(e) => {
                    warn!(error = %e, "skipping undecodable history entry");
                    None
                }
            })
            .collect();

        let stored = self.store.insert_readings(readings).await?;
        self.mark_connected().await?;

        info!(stored, skipped = total - stored, "history backfill complete");
        Ok(stored)
    }

    /// sync on a fixed interval until the task is dropped
    pub async fn run_periodic(&self, period: Duration) {
        info!(interval_seconds = period.as_secs(), "starting periodic antares sync");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            // failures are already logged and recorded in the status row
            let _ = self.sync_once().await;
        }
    }

    fn log_decoded(&self, decoded: &Decoded) {
        debug!(
            source = ?decoded.diagnostics.source,
            input = %decoded.diagnostics.input,
            fields = ?decoded.diagnostics.fields,
            "decoded payload"
        );
        for warning in &decoded.warnings {
            warn!(%warning, "sensor not calibrated?");
        }
    }

    async fn mark_connected(&self) -> Result<(), StoreError> {
        let data_points = self.store.count_readings().await?;
        let now = Utc::now();
        let mut status = self.store.system_status().await?;
        status.connection_status = ConnectionStatus::Connected;
        status.last_update = now;
        status.data_points = data_points;
        status.uptime = format_uptime((now - self.started).num_seconds().max(0) as u64);
        self.store.save_system_status(status).await?;
        Ok(())
    }

    async fn mark_error(&self) {
        let result = async {
            let mut status = self.store.system_status().await?;
            status.connection_status = ConnectionStatus::Error;
            status.last_update = Utc::now();
            self.store.save_system_status(status).await
        }
        .await;

        if let Err(e) = result {
            error!(error = %e, "failed to record sync error in system status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service(source: MockTelemetrySource, store: Arc<MemoryStore>) -> SyncService {
        SyncService::new(Arc::new(source), store, false)
    }

    #[tokio::test]
    async fn sync_stores_reading_and_marks_connected() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_fetch_latest()
            .times(1)
            .returning(|| Ok(json!("{\"data\":\"010B004601F4\"}")));

        let store = Arc::new(MemoryStore::new());
        let report = service(source, store.clone()).sync_once().await.unwrap();

        assert_eq!(report.reading.temperature, 26.7);
        assert_eq!(report.reading.ph, 7.0);
        assert_eq!(report.reading.tds_level, 500.0);
        assert!(report.warnings.is_empty());

        let status = store.system_status().await.unwrap();
        assert_eq!(status.connection_status, ConnectionStatus::Connected);
        assert_eq!(status.data_points, 1);
    }

    #[tokio::test]
    async fn connected_status_reports_uptime() {
        let mut source = MockTelemetrySource::new();
        source.expect_fetch_latest().returning(|| Ok(json!("010B004601F4")));

        let store = Arc::new(MemoryStore::new());
        let started = Utc::now() - chrono::Duration::seconds(90_061 + 30);
        service(source, store.clone()).started_at(started).sync_once().await.unwrap();

        assert_eq!(store.system_status().await.unwrap().uptime, "1d 1h 1m");
    }

    #[tokio::test]
    async fn out_of_range_values_are_stored_with_warnings() {
        let mut source = MockTelemetrySource::new();
        source.expect_fetch_latest().returning(|| Ok(json!("0262004601F4")));

        let store = Arc::new(MemoryStore::new());
        let report = service(source, store.clone()).sync_once().await.unwrap();

        assert_eq!(report.reading.temperature, 61.0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(store.count_readings().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_marks_status_error() {
        let mut source = MockTelemetrySource::new();
        source.expect_fetch_latest().returning(|| Err(AntaresError::MissingContent));

        let store = Arc::new(MemoryStore::new());
        let err = service(source, store.clone()).sync_once().await.unwrap_err();

        assert!(matches!(err, SyncError::Fetch(AntaresError::MissingContent)));
        assert!(err.is_upstream());
        assert_eq!(
            store.system_status().await.unwrap().connection_status,
            ConnectionStatus::Error
        );
        assert_eq!(store.count_readings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn undecodable_content_stores_nothing() {
        let mut source = MockTelemetrySource::new();
        source.expect_fetch_latest().returning(|| Ok(json!("0102")));

        let store = Arc::new(MemoryStore::new());
        let err = service(source, store.clone()).sync_once().await.unwrap_err();

        assert!(matches!(err, SyncError::Decode(DecodeError::InvalidLength { len: 4 })));
        assert_eq!(store.count_readings().await.unwrap(), 0);
        assert_eq!(
            store.system_status().await.unwrap().connection_status,
            ConnectionStatus::Error
        );
    }

    #[tokio::test]
    async fn backfill_skips_bad_entries() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_fetch_history()
            .withf(|limit| *limit == 10)
            .returning(|_| {
                Ok(vec![
                    json!("010B004601F4"),
                    json!("not telemetry"),
                    json!({"temperature": 25.5, "ph": 6.8, "tds": 480}),
                ])
            });

        let store = Arc::new(MemoryStore::new());
        let stored = service(source, store.clone()).backfill(10).await.unwrap();

        assert_eq!(stored, 2);
        let status = store.system_status().await.unwrap();
        assert_eq!(status.connection_status, ConnectionStatus::Connected);
        assert_eq!(status.data_points, 2);
    }

    #[tokio::test]
    async fn zero_limit_backfill_does_not_fetch() {
        let mut source = MockTelemetrySource::new();
        source.expect_fetch_history().never();

        let store = Arc::new(MemoryStore::new());
        assert_eq!(service(source, store).backfill(0).await.unwrap(), 0);
    }

    #[test]
    fn store_errors_are_not_upstream() {
        assert!(!SyncError::Store(StoreError::Poisoned).is_upstream());
        assert!(SyncError::Decode(DecodeError::UnrecognizedFormat).is_upstream());
    }
}
