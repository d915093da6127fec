use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

/// Where the station lives.  All API URLs are derived from `base_url` and
/// `station_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_station_id")]
    pub station_id: String,
    /// Live mp3 stream, reloaded on every manual start.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Last entry of the artwork fallback chain.
    #[serde(default = "default_artwork_url")]
    pub default_artwork_url: String,
}

impl StationConfig {
    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn now_playing_url(&self) -> String {
        format!("{}/api/nowplaying/{}", self.base(), self.station_id)
    }

    pub fn on_demand_url(&self) -> String {
        format!("{}/api/station/{}/ondemand", self.base(), self.station_id)
    }

    pub fn station_art_url(&self, shortcode: &str) -> String {
        format!("{}/api/station/{}/art", self.base(), shortcode)
    }

    /// On-demand download paths come back relative to the host.
    pub fn absolute_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base(), path)
        } else {
            format!("{}/{}", self.base(), path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_now_playing_interval")]
    pub now_playing_interval_secs: u64,
    #[serde(default = "default_on_demand_interval")]
    pub on_demand_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl PollingConfig {
    pub fn now_playing_interval(&self) -> Duration {
        Duration::from_secs(self.now_playing_interval_secs.max(1))
    }

    pub fn on_demand_interval(&self) -> Duration {
        Duration::from_secs(self.on_demand_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Issue a fresh load+play after a live stream error instead of relying
    /// on the player's own retry.
    #[serde(default = "default_force_reload")]
    pub force_reload: bool,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl ReconnectConfig {
    /// `min(base * 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            station_id: default_station_id(),
            stream_url: default_stream_url(),
            default_artwork_url: default_artwork_url(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            now_playing_interval_secs: default_now_playing_interval(),
            on_demand_interval_secs: default_on_demand_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            force_reload: default_force_reload(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

fn default_base_url() -> String {
    "https://stream.casthost.net".to_string()
}

fn default_station_id() -> String {
    "4".to_string()
}

fn default_stream_url() -> String {
    "https://stream.casthost.net/listen/joel_jones/radio.mp3".to_string()
}

fn default_artwork_url() -> String {
    "https://static.wixstatic.com/media/sozo-logo.png".to_string()
}

fn default_now_playing_interval() -> u64 {
    5
}

fn default_on_demand_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_force_reload() -> bool {
    true
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.8
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
