use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    pub manual_reconnect_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_retries: 3,
            manual_reconnect_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// `min(base * multiplier^retry_count, max)`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn manual_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.manual_reconnect_delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub duration_ms: u64,
    /// coordinate deltas at or below this (in degrees) are not animated
    pub epsilon: f64,
    pub frame_interval_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            duration_ms: 800,
            epsilon: 1e-9,
            frame_interval_ms: 16,
        }
    }
}

impl AnimationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Event names of the tracking channel. Incoming names are the only ones the
/// router acts upon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventNames {
    pub tracking_update: String,
    pub tracking_error: String,
    pub unauthorized: String,
    pub join_tracking_room: String,
    pub leave_tracking_room: String,
    pub send_tracking_update: String,
    pub send_tracking_history: String,
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            tracking_update: "fetch-tracking-update".to_string(),
            tracking_error: "tracking-error".to_string(),
            unauthorized: "unauthorized".to_string(),
            join_tracking_room: "join_tracking_room".to_string(),
            leave_tracking_room: "leave_tracking_room".to_string(),
            send_tracking_update: "tracking-update".to_string(),
            send_tracking_history: "tracking-history".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub socket_url: String,
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub animation: AnimationConfig,
    pub events: EventNames,
    pub debug: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            socket_url: "http://localhost:5005".to_string(),
            api_base_url: "http://localhost:5005".to_string(),
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            animation: AnimationConfig::default(),
            events: EventNames::default(),
            debug: false,
        }
    }
}

impl TrackingConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let mut config: TrackingConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        config.socket_url = trim_trailing_slash(&config.socket_url);
        config.api_base_url = trim_trailing_slash(&config.api_base_url);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.base_delay_ms == 0 {
            bail!("retry.base_delay_ms must be positive");
        }
        if !(self.retry.multiplier >= 1.0) {
            bail!(
                "retry.multiplier must be at least 1, got {}",
                self.retry.multiplier
            );
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            bail!("retry.max_delay_ms must not be smaller than retry.base_delay_ms");
        }
        if self.animation.duration_ms == 0 {
            bail!("animation.duration_ms must be positive");
        }
        if self.animation.frame_interval_ms == 0 {
            bail!("animation.frame_interval_ms must be positive");
        }
        if !(self.animation.epsilon > 0.0) {
            bail!("animation.epsilon must be positive");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn trim_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
