//! Configuration for the weather sensor agent.

use crate::error::ConfigError;
use crate::sensor::Locale;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the sensor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How often stale sensors are swept
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,

    /// Language for type labels and value translations
    pub locale: Locale,

    /// Timezone used to render last-update strings
    pub timezone: Tz,

    /// Path for settings and statistics
    pub data_path: PathBuf,

    /// Port for the HTTP query surface
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weather-sensor-agent");

        Self {
            sweep_interval: Duration::from_secs(1),
            locale: Locale::En,
            timezone: chrono_tz::UTC,
            data_path: data_dir,
            server_port: 8433,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_json(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a configuration document. Missing keys take their defaults.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let partial: PartialConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(partial.merge_into(Self::default()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weather-sensor-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_path.join("settings.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }
}

/// On-disk form where every key is optional.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    #[serde(default, with = "duration_millis::option")]
    sweep_interval: Option<Duration>,
    locale: Option<Locale>,
    timezone: Option<Tz>,
    data_path: Option<PathBuf>,
    server_port: Option<u16>,
}

impl PartialConfig {
    fn merge_into(self, defaults: Config) -> Config {
        Config {
            sweep_interval: self
                .sweep_interval
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.sweep_interval),
            locale: self.locale.unwrap_or(defaults.locale),
            timezone: self.timezone.unwrap_or(defaults.timezone),
            data_path: self.data_path.unwrap_or(defaults.data_path),
            server_port: self.server_port.unwrap_or(defaults.server_port),
        }
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer};
        use std::time::Duration;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.locale, Locale::En);
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.server_port, 8433);
        assert!(config.settings_path().ends_with("settings.json"));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config =
            Config::from_json(r#"{"locale": "nl", "timezone": "Europe/Amsterdam"}"#).unwrap();
        assert_eq!(config.locale, Locale::Nl);
        assert_eq!(config.timezone, chrono_tz::Europe::Amsterdam);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_sweep_interval_in_millis() {
        let config = Config::from_json(r#"{"sweep_interval": 250}"#).unwrap();
        assert_eq!(config.sweep_interval, Duration::from_millis(250));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["sweep_interval"], 250);

        let zero = Config::from_json(r#"{"sweep_interval": 0}"#).unwrap();
        assert_eq!(zero.sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::from_json(r#"{"timezone": "America/New_York"}"#).unwrap();
        config.server_port = 9000;

        config.save_to(&path).unwrap();

        let loaded = Config::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.timezone, chrono_tz::America::New_York);
        assert_eq!(loaded.server_port, 9000);
        assert_eq!(loaded.sweep_interval, config.sweep_interval);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Config::from_json(r#"{"locale": "fr"}"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
