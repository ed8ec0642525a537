//! ==============================================================================
//! antares.rs - client for the antares (oneM2M) iot platform
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     pulls content instances published by the hydroponic node.
//!
//!     latest:   GET {base}/{app}/{device}/la           -> m2m:cin.con
//!     history:  GET {base}/{app}/{device}?rcn=4&lim=N  -> m2m:cnt.m2m:cin[*].con
//!
//!     every request carries the access key as X-M2M-Origin.
//! ```
//!
//! relationships:
//! ```text
//!     - implements: sync.rs (TelemetrySource)
//!     - configured by: config.rs (AntaresConfig)
//! ```
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AntaresConfig;
use crate::sync::TelemetrySource;

// X-M2M-Origin, header names are case-insensitive
const ORIGIN_HEADER: &str = "x-m2m-origin";

#[derive(Debug, Error)]
pub enum AntaresError {
    #[error("antares request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("antares api error: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("invalid response format - missing m2m:cin.con")]
    MissingContent,

    #[error("invalid access key header: {0}")]
    InvalidAccessKey(#[from] reqwest::header::InvalidHeaderValue),
}

pub type Result<T> = std::result::Result<T, AntaresError>;

#[derive(Clone)]
pub struct AntaresClient {
    http: reqwest::Client,
    config: AntaresConfig,
}

impl AntaresClient {
    pub fn new(config: AntaresConfig) -> Result<Self> {
        if config.access_key.is_empty() {
            warn!("antares access key is empty, requests will be rejected by the platform");
        }

        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN_HEADER, HeaderValue::from_str(&config.access_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json;ty=4"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { http, config })
    }

    fn device_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.application_id,
            self.config.device_id
        )
    }

    pub fn latest_url(&self) -> String {
        format!("{}/la", self.device_url())
    }

    pub fn history_url(&self, limit: u32) -> String {
        format!("{}?rcn=4&lim={}", self.device_url(), limit)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url, "fetching from antares");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AntaresError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TelemetrySource for AntaresClient {
    async fn fetch_latest(&self) -> Result<Value> {
        let body = self.get_json(&self.latest_url()).await?;
        latest_content(&body)
    }

    async fn fetch_history(&self, limit: u32) -> Result<Vec<Value>> {
        let body = self.get_json(&self.history_url(limit)).await?;
        Ok(history_contents(&body))
    }
}

/// pull `m2m:cin.con` out of a latest-instance envelope
pub fn latest_content(body: &Value) -> Result<Value> {
    match body.get("m2m:cin").and_then(|cin| cin.get("con")) {
        None | Some(Value::Null) => Err(AntaresError::MissingContent),
        Some(Value::String(s)) if s.trim().is_empty() => Err(AntaresError::MissingContent),
        Some(content) => Ok(content.clone()),
    }
}

/// pull every `con` out of a container envelope, oldest first.
/// antares lists newest first.
pub fn history_contents(body: &Value) -> Vec<Value> {
    let Some(instances) = body
        .get("m2m:cnt")
        .and_then(|cnt| cnt.get("m2m:cin"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    instances
        .iter()
        .rev()
        .filter_map(|instance| instance.get("con"))
        .filter(|content| !content.is_null())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AntaresClient {
        AntaresClient::new(AntaresConfig {
            base_url: "https://platform.antares.id:8443/~/antares-cse/antares-id/".into(),
            access_key: "abc:def".into(),
            application_id: "DRTPM-Hidroponik".into(),
            device_id: "Monitoring_Hidroponik".into(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn builds_device_urls() {
        let client = client();

        assert_eq!(
            client.latest_url(),
            "https://platform.antares.id:8443/~/antares-cse/antares-id/DRTPM-Hidroponik/Monitoring_Hidroponik/la"
        );
        assert_eq!(
            client.history_url(25),
            "https://platform.antares.id:8443/~/antares-cse/antares-id/DRTPM-Hidroponik/Monitoring_Hidroponik?rcn=4&lim=25"
        );
    }

    #[test]
    fn rejects_unprintable_access_key() {
        let config = AntaresConfig { access_key: "bad\nkey".into(), ..AntaresConfig::default() };
        assert!(matches!(
            AntaresClient::new(config),
            Err(AntaresError::InvalidAccessKey(_))
        ));
    }

    #[test]
    fn extracts_latest_content() {
        let body = json!({
            "m2m:cin": {
                "rn": "cin_123",
                "con": "{\"data\":\"010B004601F4\"}"
            }
        });

        assert_eq!(latest_content(&body).unwrap(), json!("{\"data\":\"010B004601F4\"}"));
    }

    #[test]
    fn object_content_is_passed_through() {
        let body = json!({"m2m:cin": {"con": {"temperature": 25}}});
        assert_eq!(latest_content(&body).unwrap(), json!({"temperature": 25}));
    }

    #[test]
    fn missing_content_is_an_error() {
        for body in [json!({}), json!({"m2m:cin": {}}), json!({"m2m:cin": {"con": ""}})] {
            assert!(matches!(latest_content(&body), Err(AntaresError::MissingContent)));
        }
    }

    #[test]
    fn history_is_returned_oldest_first() {
        let body = json!({
            "m2m:cnt": {
                "m2m:cin": [
                    {"con": "newest"},
                    {"rn": "no-content"},
                    {"con": "oldest"}
                ]
            }
        });

        assert_eq!(history_contents(&body), vec![json!("oldest"), json!("newest")]);
        assert!(history_contents(&json!({"m2m:cnt": {}})).is_empty());
    }
}
