//! Engine settings, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or none) is a valid config.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub accuracy: AccuracySettings,
    pub search: SearchSettings,
    pub wifi: WifiSettings,
    pub fallback: FallbackSettings,
    pub statsd: StatsdSettings,
    pub store: StoreSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }
}

/// Minimum accuracy (meters) reported per source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccuracySettings {
    pub wifi_min: f64,
    pub cell_min: f64,
    pub cell_area_min: f64,
    pub geoip_min: f64,
}

impl Default for AccuracySettings {
    fn default() -> Self {
        Self {
            wifi_min: 100.0,
            cell_min: 1000.0,
            cell_area_min: 10_000.0,
            geoip_min: 25_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub provider_timeout_ms: u64,
    /// Stop searching once an internal position at least this accurate is found.
    pub early_exit_accuracy: Option<f64>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 2000,
            early_exit_accuracy: None,
        }
    }
}

impl SearchSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WifiSettings {
    pub min_query_wifis: usize,
    pub min_cluster_size: usize,
    /// Meters
    pub max_cluster_distance: f64,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            min_query_wifis: 2,
            min_cluster_size: 2,
            max_cluster_distance: 500.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// External locate endpoint; the fallback provider is off without one.
    pub url: Option<String>,
    pub timeout_ms: u64,
    /// Only ask the external service while the best result is worse than this.
    pub accuracy_threshold: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 5000,
            accuracy_threshold: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsdSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub metric_prefix: String,
}

impl Default for StatsdSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".into(),
            port: 8125,
            metric_prefix: "location".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON network records
    pub path: Option<PathBuf>,
    /// MaxMind City database
    pub geoip_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.accuracy.wifi_min, 100.0);
        assert_eq!(settings.accuracy.geoip_min, 25_000.0);
        assert_eq!(settings.search.provider_timeout(), Duration::from_secs(2));
        assert!(settings.search.early_exit_accuracy.is_none());
        assert!(settings.fallback.url.is_none());
        assert_eq!(settings.statsd.port, 8125);
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml(
            r#"
            [accuracy]
            wifi_min = 30.0

            [search]
            early_exit_accuracy = 150.0

            [fallback]
            url = "https://locate.example.com/v1/geolocate"

            [statsd]
            enabled = true
            metric_prefix = "geo"
            "#,
        )
        .unwrap();
        assert_eq!(settings.accuracy.wifi_min, 30.0);
        assert_eq!(settings.accuracy.cell_min, 1000.0);
        assert_eq!(settings.search.early_exit_accuracy, Some(150.0));
        assert_eq!(settings.search.provider_timeout_ms, 2000);
        assert!(settings.fallback.url.is_some());
        assert!(settings.statsd.enabled);
        assert_eq!(settings.statsd.host, "localhost");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Settings::from_toml("[accuracy]\nwifi_min = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locus.toml");
        fs::write(&path, "[wifi]\nmin_cluster_size = 3\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.wifi.min_cluster_size, 3);

        assert!(matches!(
            Settings::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
