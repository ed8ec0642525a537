use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decoder::DecodedReading;

/// fixed id of the single system status row
pub const SYSTEM_STATUS_ID: &str = "system-1";
/// fixed id of the single alert settings row
pub const ALERT_SETTINGS_ID: &str = "settings-1";

/// a persisted sensor reading
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: Uuid,
    /// when the node measured it (or when it was synced)
    pub timestamp: DateTime<Utc>,
    /// temperature in celsius
    pub temperature: f64,
    pub ph: f64,
    /// total dissolved solids in ppm
    pub tds_level: f64,
    pub created_at: DateTime<Utc>,
}

/// a reading that has not been stored yet
#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSensorReading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub ph: f64,
    pub tds_level: f64,
}

impl NewSensorReading {
    pub fn from_decoded(reading: &DecodedReading, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            temperature: reading.temperature,
            ph: reading.ph,
            tds_level: reading.tds_level,
        }
    }

    pub fn into_stored(self, created_at: DateTime<Utc>) -> SensorReading {
        SensorReading {
            id: Uuid::new_v4(),
            timestamp: self.timestamp,
            temperature: self.temperature,
            ph: self.ph,
            tds_level: self.tds_level,
            created_at,
        }
    }
}

/// outcome of the last sync with antares
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown connection status: {other}")),
        }
    }
}

/// the single status row shown in the dashboard header
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub id: String,
    pub connection_status: ConnectionStatus,
    pub last_update: DateTime<Utc>,
    /// number of stored readings at the last successful sync
    pub data_points: u64,
    pub cpu_usage: u32,
    pub memory_usage: u32,
    pub storage_usage: u32,
    /// e.g. "0d 0h 0m"
    pub uptime: String,
}

impl SystemStatus {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            id: SYSTEM_STATUS_ID.to_string(),
            connection_status: ConnectionStatus::Disconnected,
            last_update: now,
            data_points: 0,
            cpu_usage: 0,
            memory_usage: 0,
            storage_usage: 0,
            uptime: "0d 0h 0m".to_string(),
        }
    }
}

/// which alert classes the dashboard should raise
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettings {
    #[serde(default = "default_alert_settings_id")]
    pub id: String,
    pub temperature_alerts: bool,
    pub ph_alerts: bool,
    pub tds_level_alerts: bool,
}

fn default_alert_settings_id() -> String {
    ALERT_SETTINGS_ID.to_string()
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            id: ALERT_SETTINGS_ID.to_string(),
            temperature_alerts: true,
            ph_alerts: true,
            tds_level_alerts: false,
        }
    }
}

/// format an uptime duration the way the status row stores it
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_serializes_with_camel_case_fields() {
        let reading = NewSensorReading {
            timestamp: "2026-10-17T08:00:00Z".parse().unwrap(),
            temperature: 26.7,
            ph: 7.0,
            tds_level: 500.0,
        }
        .into_stored(Utc::now());

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["tdsLevel"], 500.0);
        assert_eq!(json["timestamp"], "2026-10-17T08:00:00Z");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn connection_status_round_trips_as_lowercase() {
        assert_eq!(serde_json::to_string(&ConnectionStatus::Error).unwrap(), "\"error\"");
        assert_eq!("connected".parse::<ConnectionStatus>(), Ok(ConnectionStatus::Connected));
        assert!("offline".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn default_rows_match_first_run_values() {
        let status = SystemStatus::initial(Utc::now());
        assert_eq!(status.id, SYSTEM_STATUS_ID);
        assert_eq!(status.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(status.uptime, "0d 0h 0m");

        let settings = AlertSettings::default();
        assert!(settings.temperature_alerts && settings.ph_alerts);
        assert!(!settings.tds_level_alerts);
    }

    #[test]
    fn uptime_is_days_hours_minutes() {
        assert_eq!(format_uptime(0), "0d 0h 0m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }
}
