//! Configuration Module
//!
//! Settings read from the environment, with defaults for local development.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_REFRESH_PATH: &str = "/refresh-jwt/";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST API
    pub api_base_url: String,

    /// Path of the token-refresh endpoint, relative to `api_base_url`
    pub refresh_path: String,

    /// Per-request HTTP timeout
    pub http_timeout: Duration,

    /// How long a scale scan runs before giving up
    pub scan_timeout: Duration,

    /// Directory holding the persisted token slots
    pub storage_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            scan_timeout: Duration::from_millis(DEFAULT_SCAN_TIMEOUT_MS),
            storage_dir: default_storage_dir(),
        }
    }
}

impl Config {
    /// Load from `DWW_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let api_base_url =
            std::env::var("DWW_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let refresh_path =
            std::env::var("DWW_REFRESH_PATH").unwrap_or_else(|_| DEFAULT_REFRESH_PATH.to_string());

        let http_timeout_secs: u64 = std::env::var("DWW_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        let scan_timeout_ms: u64 = std::env::var("DWW_SCAN_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SCAN_TIMEOUT_MS);

        let storage_dir = std::env::var("DWW_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_storage_dir());

        Self {
            api_base_url,
            refresh_path,
            http_timeout: Duration::from_secs(http_timeout_secs),
            scan_timeout: Duration::from_millis(scan_timeout_ms),
            storage_dir,
        }
    }

    /// Directory for the rolling log files
    pub fn log_dir(&self) -> PathBuf {
        self.storage_dir.join("logs")
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("DryWeightWatchers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_development() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.refresh_path, "/refresh-jwt/");
        assert_eq!(config.scan_timeout, Duration::from_millis(30_000));
        assert!(config.storage_dir.ends_with("DryWeightWatchers"));
    }

    #[test]
    fn join_url_avoids_double_slashes() {
        assert_eq!(join_url("https://api.example.com/", "/login/"), "https://api.example.com/login/");
        assert_eq!(join_url("https://api.example.com", "profile/"), "https://api.example.com/profile/");
    }

    #[test]
    fn logs_live_beside_the_token_store() {
        let config = Config {
            storage_dir: PathBuf::from("/tmp/dww"),
            ..Config::default()
        };
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/dww/logs"));
    }
}
