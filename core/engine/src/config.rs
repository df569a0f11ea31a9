//! Runtime configuration for the tracking engine.
//!
//! Loaded from `~/.runtrack/config.toml`. Every section has defaults, so a
//! missing file or a partial file is valid; a malformed file is an error.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".runtrack/config.toml";

pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_CAPTURE_WINDOW_SECS: u64 = 3;
pub const DEFAULT_CAPTURE_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_HORIZONTAL_ACCURACY_M: f64 = 40.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlushConfig {
    pub interval_secs: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub window_secs: u64,
    pub max_attempts: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_CAPTURE_WINDOW_SECS,
            max_attempts: DEFAULT_CAPTURE_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub max_horizontal_accuracy_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy_m: DEFAULT_MAX_HORIZONTAL_ACCURACY_M,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub auth_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TrackerConfig {
    pub flush: FlushConfig,
    pub capture: CaptureConfig,
    pub filter: FilterConfig,
    pub remote: RemoteConfig,
}

impl TrackerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush.interval_secs)
    }

    pub fn capture_window(&self) -> Duration {
        Duration::from_secs(self.capture.window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.flush.interval_secs == 0 {
            return Err("flush.interval_secs must be greater than zero".to_string());
        }
        if self.capture.window_secs == 0 {
            return Err("capture.window_secs must be greater than zero".to_string());
        }
        if self.capture.max_attempts == 0 {
            return Err("capture.max_attempts must be greater than zero".to_string());
        }
        let accuracy = self.filter.max_horizontal_accuracy_m;
        if !accuracy.is_finite() || accuracy <= 0.0 {
            return Err("filter.max_horizontal_accuracy_m must be positive".to_string());
        }
        if self.remote.request_timeout_secs == 0 {
            return Err("remote.request_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<TrackerConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read tracker config {}: {}",
            config_path.display(),
            err
        )
    })?;
    let config = toml::from_str::<TrackerConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse tracker config {}: {}",
            config_path.display(),
            err
        )
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.flush_interval(), Duration::from_secs(300));
        assert_eq!(config.capture_window(), Duration::from_secs(3));
        assert_eq!(config.capture.max_attempts, 3);
    }

    #[test]
    fn load_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[flush]
interval_secs = 60

[remote]
base_url = "https://api.example.test"
auth_token = "token"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.flush.interval_secs, 60);
        assert_eq!(config.capture, CaptureConfig::default());
        assert_eq!(config.remote.base_url, "https://api.example.test");
        assert_eq!(config.remote.auth_token.as_deref(), Some("token"));
        assert_eq!(
            config.remote.request_timeout_secs,
            DEFAULT_REQUEST_TIMEOUT_SECS
        );
    }

    #[test]
    fn load_config_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[flush\ninterval_secs = ").expect("write config");
        assert!(load_config(Some(path)).is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = TrackerConfig::default();
        config.capture.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
