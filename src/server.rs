//! ==============================================================================
//! server.rs - json api for the dashboard
//! ==============================================================================
//!
//! routes:
//! ```text
//!     GET  /api/sensor-readings?limit=N            newest first (default 50)
//!     POST /api/sensor-readings                    manual reading, 201
//!     GET  /api/sensor-reading/latest              newest or null
//!     GET  /api/sensor-reading/range?startTime&endTime
//!     GET  /api/system-status
//!     GET  /api/alert-settings
//!     PUT  /api/alert-settings
//!     GET  /api/export-data?format=json|csv[&startTime&endTime]
//!     POST /api/sync-antares                       one sync cycle
//!     POST /api/cron/sync-antares                  same, bearer token required
//!     GET  /health
//! ```
//!
//! every error body is {"error": summary, "message": detail}.
//!
//! ==============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::domain::{AlertSettings, NewSensorReading, SensorReading, SystemStatus};
use crate::store::{RangeQuery, SortOrder, Store, StoreError};
use crate::sync::{SyncError, SyncReport, SyncService};

const DEFAULT_READINGS_LIMIT: usize = 50;
const EXPORT_LIMIT: usize = 1000;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sync: SyncService,
    /// empty means the cron route rejects everything
    pub cron_secret: String,
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Unauthorized,
    Sync(SyncError),
    Store { context: &'static str, source: StoreError },
}

impl ApiError {
    fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { context, source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, summary, message) = match self {
            Self::BadRequest(summary) => (StatusCode::BAD_REQUEST, summary, None),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                Some("Invalid or missing authorization token".to_string()),
            ),
            Self::Sync(e) if e.is_upstream() => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Failed to fetch data from Antares API",
                Some(e.to_string()),
            ),
            Self::Sync(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to sync with Antares API",
                Some(e.to_string()),
            ),
            Self::Store { context, source } => {
                error!(error = %source, "{context}");
                (StatusCode::INTERNAL_SERVER_ERROR, context, Some(source.to_string()))
            }
        };

        let body = match message {
            Some(message) => json!({ "error": summary, "message": message }),
            None => json!({ "error": summary }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ==============================================================================
// router
// ==============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/sensor-readings", get(list_readings).post(create_reading))
        .route("/api/sensor-reading/latest", get(latest_reading))
        .route("/api/sensor-reading/range", get(readings_in_range))
        .route("/api/system-status", get(system_status))
        .route("/api/alert-settings", get(alert_settings).put(update_alert_settings))
        .route("/api/export-data", get(export_data))
        .route("/api/sync-antares", post(sync_antares))
        .route("/api/cron/sync-antares", post(cron_sync_antares))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==============================================================================
// readings
// ==============================================================================

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn list_readings(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Vec<SensorReading>>> {
    let limit = params.limit.unwrap_or(DEFAULT_READINGS_LIMIT);
    let readings = state
        .store
        .recent_readings(limit)
        .await
        .map_err(ApiError::store("Failed to fetch sensor readings"))?;
    Ok(Json(readings))
}

/// body of a manually posted reading. the server stamps the time.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualReading {
    temperature: f64,
    ph: f64,
    tds_level: f64,
}

async fn create_reading(
    State(state): State<AppState>,
    Json(body): Json<ManualReading>,
) -> ApiResult<(StatusCode, Json<SensorReading>)> {
    let reading = NewSensorReading {
        timestamp: Utc::now(),
        temperature: body.temperature,
        ph: body.ph,
        tds_level: body.tds_level,
    };
    let stored = state
        .store
        .insert_reading(reading)
        .await
        .map_err(ApiError::store("Internal server error"))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn latest_reading(State(state): State<AppState>) -> ApiResult<Json<Option<SensorReading>>> {
    let latest = state
        .store
        .latest_reading()
        .await
        .map_err(ApiError::store("Failed to fetch latest reading"))?;
    Ok(Json(latest))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeParams {
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

async fn readings_in_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Vec<SensorReading>>> {
    let (Some(start), Some(end)) = (params.start_time, params.end_time) else {
        return Err(ApiError::BadRequest("startTime and endTime are required"));
    };

    let readings = state
        .store
        .readings_in_range(RangeQuery { start, end, order: SortOrder::OldestFirst, limit: None })
        .await
        .map_err(ApiError::store("Failed to fetch sensor readings"))?;
    Ok(Json(readings))
}

// ==============================================================================
// status and settings
// ==============================================================================

async fn system_status(State(state): State<AppState>) -> ApiResult<Json<SystemStatus>> {
    let status = state
        .store
        .system_status()
        .await
        .map_err(ApiError::store("Failed to fetch system status"))?;
    Ok(Json(status))
}

async fn alert_settings(State(state): State<AppState>) -> ApiResult<Json<AlertSettings>> {
    let settings = state
        .store
        .alert_settings()
        .await
        .map_err(ApiError::store("Failed to process alert settings"))?;
    Ok(Json(settings))
}

async fn update_alert_settings(
    State(state): State<AppState>,
    Json(settings): Json<AlertSettings>,
) -> ApiResult<Json<AlertSettings>> {
    let saved = state
        .store
        .save_alert_settings(settings)
        .await
        .map_err(ApiError::store("Failed to process alert settings"))?;
    Ok(Json(saved))
}

// ==============================================================================
// export
// ==============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportParams {
    format: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

async fn export_data(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    let readings = match (params.start_time, params.end_time) {
        (Some(start), Some(end)) => {
            let query = RangeQuery { start, end, order: SortOrder::NewestFirst, limit: None };
            state.store.readings_in_range(query).await
        }
        _ => state.store.recent_readings(EXPORT_LIMIT).await,
    }
    .map_err(ApiError::store("Failed to export data"))?;

    // anything other than csv falls back to json
    if params.format.as_deref() == Some("csv") {
        let headers = [
            (header::CONTENT_TYPE, "text/csv"),
            (header::CONTENT_DISPOSITION, "attachment; filename=sensor-data.csv"),
        ];
        return Ok((headers, to_csv(&readings)).into_response());
    }

    let headers = [(header::CONTENT_DISPOSITION, "attachment; filename=sensor-data.json")];
    Ok((headers, Json(readings)).into_response())
}

fn to_csv(readings: &[SensorReading]) -> String {
    let rows: Vec<String> = readings
        .iter()
        .map(|r| {
            format!(
                "{},{},{},{}",
                r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                r.temperature,
                r.ph,
                r.tds_level
            )
        })
        .collect();

    format!("timestamp,temperature,ph,tdsLevel\n{}", rows.join("\n"))
}

// ==============================================================================
// sync
// ==============================================================================

#[derive(Serialize)]
struct SyncResponse {
    success: bool,
    #[serde(flatten)]
    report: SyncReport,
}

async fn sync_antares(State(state): State<AppState>) -> ApiResult<Json<SyncResponse>> {
    info!(triggered_by = "api", "syncing data from antares");
    let report = state.sync.sync_once().await.map_err(ApiError::Sync)?;
    Ok(Json(SyncResponse { success: true, report }))
}

async fn cron_sync_antares(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SyncResponse>> {
    if !cron_authorized(&headers, &state.cron_secret) {
        warn!("unauthorized cron attempt");
        return Err(ApiError::Unauthorized);
    }

    info!(triggered_by = "cron", "syncing data from antares");
    let report = state.sync.sync_once().await.map_err(ApiError::Sync)?;
    Ok(Json(SyncResponse { success: true, report }))
}

fn cron_authorized(headers: &HeaderMap, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn cron_requires_matching_bearer_token() {
        assert!(cron_authorized(&with_auth("Bearer s3cret"), "s3cret"));
        assert!(!cron_authorized(&with_auth("Bearer wrong"), "s3cret"));
        assert!(!cron_authorized(&with_auth("s3cret"), "s3cret"));
        assert!(!cron_authorized(&HeaderMap::new(), "s3cret"));
    }

    #[test]
    fn cron_is_closed_without_a_secret() {
        assert!(!cron_authorized(&with_auth("Bearer "), ""));
    }

    #[test]
    fn csv_has_header_and_one_row_per_reading() {
        let reading = SensorReading {
            id: Uuid::new_v4(),
            timestamp: "2026-10-17T08:00:00Z".parse().unwrap(),
            temperature: 26.7,
            ph: 7.0,
            tds_level: 500.0,
            created_at: Utc::now(),
        };

        assert_eq!(
            to_csv(&[reading]),
            "timestamp,temperature,ph,tdsLevel\n2026-10-17T08:00:00.000Z,26.7,7,500"
        );
        assert_eq!(to_csv(&[]), "timestamp,temperature,ph,tdsLevel\n");
    }
}
