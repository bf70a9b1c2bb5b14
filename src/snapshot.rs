use crate::config::TrackingConfig;
use crate::entity::TrackingUpdate;
use crate::router::normalize_update;
use anyhow::Result;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

pub const TRACKING_PATH: &str = "/v1/tracking";

/// Read-only view of the session kept by the surrounding application.
pub trait SessionStore {
    fn token(&self) -> Option<String>;
}

pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.map(str::to_string),
        }
    }
}

impl SessionStore for StaticSession {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unauthorized, please login again")]
    Unauthorized,
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Body(String),
}

/// Fetches the current tracking data over REST, used to seed a view before
/// live updates arrive.
pub struct SnapshotClient {
    http: reqwest::Client,
    url: String,
}

impl SnapshotClient {
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            url: format!(
                "{}{}",
                config.api_base_url.trim_end_matches('/'),
                TRACKING_PATH
            ),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(
        &self,
        session: &dyn SessionStore,
    ) -> Result<Vec<TrackingUpdate>, SnapshotError> {
        let mut request = self
            .http
            .get(&self.url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = session.token() {
            request = request.header(AUTHORIZATION, bearer(&token));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("tracking snapshot request unauthorized");
            return Err(SnapshotError::Unauthorized);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SnapshotError::Status {
                status: status.as_u16(),
                message: error_message(&text).unwrap_or_else(|| status.to_string()),
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| SnapshotError::Body(e.to_string()))?;
        let updates = parse_snapshot(&body)?;
        info!("fetched tracking snapshot with {} entities", updates.len());
        Ok(updates)
    }
}

fn bearer(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

fn error_message(text: &str) -> Option<String> {
    let body: Value = serde_json::from_str(text).ok()?;
    ["responseMessage", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Accepts either a bare array or `{ "data": [...] }`. Malformed entries are
/// dropped.
pub fn parse_snapshot(body: &Value) -> Result<Vec<TrackingUpdate>, SnapshotError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(object) => object
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| SnapshotError::Body("missing `data` array".to_string()))?,
        other => return Err(SnapshotError::Body(format!("unexpected JSON: {other}"))),
    };

    Ok(items
        .iter()
        .filter_map(|item| match normalize_update(item) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!("skipping snapshot entry: {} ({})", e, item);
                None
            }
        })
        .collect())
}
