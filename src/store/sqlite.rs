use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use super::{RangeQuery, SortOrder, Store, StoreError, StoreResult};
use crate::domain::{
    AlertSettings, ConnectionStatus, NewSensorReading, SensorReading, SystemStatus,
    ALERT_SETTINGS_ID, SYSTEM_STATUS_ID,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sensor_readings (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        temperature REAL NOT NULL,
        ph REAL NOT NULL,
        tds_level REAL NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS sensor_readings_timestamp ON sensor_readings (timestamp);

    CREATE TABLE IF NOT EXISTS system_status (
        id TEXT PRIMARY KEY,
        connection_status TEXT NOT NULL,
        last_update TEXT NOT NULL,
        data_points INTEGER NOT NULL DEFAULT 0,
        cpu_usage INTEGER NOT NULL DEFAULT 0,
        memory_usage INTEGER NOT NULL DEFAULT 0,
        storage_usage INTEGER NOT NULL DEFAULT 0,
        uptime TEXT NOT NULL DEFAULT '0d 0h 0m'
    );

    CREATE TABLE IF NOT EXISTS alert_settings (
        id TEXT PRIMARY KEY,
        temperature_alerts INTEGER NOT NULL DEFAULT 1,
        ph_alerts INTEGER NOT NULL DEFAULT 1,
        tds_level_alerts INTEGER NOT NULL DEFAULT 0
    );
";

const READING_COLUMNS: &str = "id, timestamp, temperature, ph, tds_level, created_at";

/// sqlite implementation of Store.
///
/// one connection behind a mutex; every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> StoreResult<Self> {
        info!(path, "opening sqlite store");
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<T> {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            Ok(f(&mut *conn)?)
        })
        .await?
    }
}

// timestamps are stored as fixed width rfc3339 so text order is time order
fn to_sql_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_sql_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<SensorReading> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(SensorReading {
        id,
        timestamp: from_sql_time(row, 1)?,
        temperature: row.get(2)?,
        ph: row.get(3)?,
        tds_level: row.get(4)?,
        created_at: from_sql_time(row, 5)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<SystemStatus> {
    let connection_status: String = row.get(1)?;
    let connection_status = connection_status
        .parse::<ConnectionStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    let data_points: i64 = row.get(3)?;

    Ok(SystemStatus {
        id: row.get(0)?,
        connection_status,
        last_update: from_sql_time(row, 2)?,
        data_points: data_points.max(0) as u64,
        cpu_usage: row.get(4)?,
        memory_usage: row.get(5)?,
        storage_usage: row.get(6)?,
        uptime: row.get(7)?,
    })
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<AlertSettings> {
    Ok(AlertSettings {
        id: row.get(0)?,
        temperature_alerts: row.get(1)?,
        ph_alerts: row.get(2)?,
        tds_level_alerts: row.get(3)?,
    })
}

fn insert_reading(conn: &Connection, reading: &SensorReading) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sensor_readings (id, timestamp, temperature, ph, tds_level, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reading.id.to_string(),
            to_sql_time(&reading.timestamp),
            reading.temperature,
            reading.ph,
            reading.tds_level,
            to_sql_time(&reading.created_at),
        ],
    )?;
    Ok(())
}

fn upsert_status(conn: &Connection, status: &SystemStatus) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO system_status
            (id, connection_status, last_update, data_points, cpu_usage, memory_usage, storage_usage, uptime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            connection_status = excluded.connection_status,
            last_update = excluded.last_update,
            data_points = excluded.data_points,
            cpu_usage = excluded.cpu_usage,
            memory_usage = excluded.memory_usage,
            storage_usage = excluded.storage_usage,
            uptime = excluded.uptime",
        params![
            SYSTEM_STATUS_ID,
            status.connection_status.as_str(),
            to_sql_time(&status.last_update),
            status.data_points as i64,
            status.cpu_usage,
            status.memory_usage,
            status.storage_usage,
            status.uptime,
        ],
    )?;
    Ok(())
}

fn upsert_settings(conn: &Connection, settings: &AlertSettings) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO alert_settings (id, temperature_alerts, ph_alerts, tds_level_alerts)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            temperature_alerts = excluded.temperature_alerts,
            ph_alerts = excluded.ph_alerts,
            tds_level_alerts = excluded.tds_level_alerts",
        params![
            ALERT_SETTINGS_ID,
            settings.temperature_alerts,
            settings.ph_alerts,
            settings.tds_level_alerts,
        ],
    )?;
    Ok(())
}

fn limit_param(limit: Option<usize>) -> i64 {
    // sqlite treats a negative LIMIT as unbounded
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)).unwrap_or(-1)
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_reading(&self, reading: NewSensorReading) -> StoreResult<SensorReading> {
        let stored = reading.into_stored(Utc::now());
        let row = stored.clone();
        self.call(move |conn| insert_reading(conn, &row)).await?;
        Ok(stored)
    }

    async fn insert_readings(&self, readings: Vec<NewSensorReading>) -> StoreResult<usize> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let count = readings.len();
            for reading in readings {
                insert_reading(&tx, &reading.into_stored(now))?;
            }
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn recent_readings(&self, limit: usize) -> StoreResult<Vec<SensorReading>> {
        let limit = limit_param(Some(limit));
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS} FROM sensor_readings
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], reading_from_row)?;
            let readings = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(readings)
        })
        .await
    }

    async fn readings_in_range(&self, query: RangeQuery) -> StoreResult<Vec<SensorReading>> {
        let direction = match query.order {
            SortOrder::OldestFirst => "ASC",
            SortOrder::NewestFirst => "DESC",
        };
        let start = to_sql_time(&query.start);
        let end = to_sql_time(&query.end);
        let limit = limit_param(query.limit);

        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS} FROM sensor_readings
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp {direction}, rowid {direction} LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![start, end, limit], reading_from_row)?;
            let readings = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(readings)
        })
        .await
    }

    async fn count_readings(&self) -> StoreResult<u64> {
        let count: i64 = self
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0)))
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn system_status(&self) -> StoreResult<SystemStatus> {
        self.call(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, connection_status, last_update, data_points,
                            cpu_usage, memory_usage, storage_usage, uptime
                     FROM system_status WHERE id = ?1",
                    params![SYSTEM_STATUS_ID],
                    status_from_row,
                )
                .optional()?;

            match existing {
                Some(status) => Ok(status),
                None => {
                    let status = SystemStatus::initial(Utc::now());
                    upsert_status(conn, &status)?;
                    Ok(status)
                }
            }
        })
        .await
    }

    async fn save_system_status(&self, mut status: SystemStatus) -> StoreResult<SystemStatus> {
        status.id = SYSTEM_STATUS_ID.to_string();
        let row = status.clone();
        self.call(move |conn| upsert_status(conn, &row)).await?;
        Ok(status)
    }

    async fn alert_settings(&self) -> StoreResult<AlertSettings> {
        self.call(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, temperature_alerts, ph_alerts, tds_level_alerts
                     FROM alert_settings WHERE id = ?1",
                    params![ALERT_SETTINGS_ID],
                    settings_from_row,
                )
                .optional()?;

            match existing {
                Some(settings) => Ok(settings),
                None => {
                    let settings = AlertSettings::default();
                    upsert_settings(conn, &settings)?;
                    Ok(settings)
                }
            }
        })
        .await
    }

    async fn save_alert_settings(&self, mut settings: AlertSettings) -> StoreResult<AlertSettings> {
        settings.id = ALERT_SETTINGS_ID.to_string();
        let row = settings.clone();
        self.call(move |conn| upsert_settings(conn, &row)).await?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn readings_are_ordered() {
        conformance::readings_are_ordered(&store()).await;
    }

    #[tokio::test]
    async fn range_is_inclusive() {
        conformance::range_is_inclusive(&store()).await;
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        conformance::equal_timestamps_keep_insertion_order(&store()).await;
    }

    #[tokio::test]
    async fn single_rows_are_get_or_create() {
        conformance::single_rows_are_get_or_create(&store()).await;
    }

    #[tokio::test]
    async fn stored_rows_read_back_intact() {
        let store = store();
        let inserted = store
            .insert_reading(NewSensorReading {
                timestamp: "2026-10-17T08:15:30.123456Z".parse().unwrap(),
                temperature: 26.7,
                ph: 31.3,
                tds_level: 2035.0,
            })
            .await
            .unwrap();

        let latest = store.latest_reading().await.unwrap().unwrap();
        assert_eq!(latest.id, inserted.id);
        assert_eq!(latest.timestamp, inserted.timestamp);
        assert_eq!(latest.ph, 31.3);
        assert_eq!(latest.tds_level, 2035.0);
    }

    #[test]
    fn sql_time_is_fixed_width() {
        let early: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let late: DateTime<Utc> = "2026-01-01T00:00:00.5Z".parse().unwrap();

        assert_eq!(to_sql_time(&early), "2026-01-01T00:00:00.000000Z");
        assert!(to_sql_time(&early) < to_sql_time(&late));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("hydro-monitor-{}.db", Uuid::new_v4()));
        let path_str = path.to_string_lossy().to_string();

        {
            let store = SqliteStore::open(&path_str).unwrap();
            let mut status = store.system_status().await.unwrap();
            status.connection_status = ConnectionStatus::Error;
            store.save_system_status(status).await.unwrap();
        }

        let reopened = SqliteStore::open(&path_str).unwrap();
        assert_eq!(
            reopened.system_status().await.unwrap().connection_status,
            ConnectionStatus::Error
        );

        let _ = std::fs::remove_file(path);
    }
}
