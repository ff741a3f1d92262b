use crate::geo::{Coordinate, GeoError, ReferencePoint};
use crate::sensor::WatchOptions;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_SENSOR_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub reference: ReferenceSection,
    #[serde(default)]
    pub sensor: Option<SensorSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    pub session: SessionSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceSection {
    pub latitude: f64,
    pub longitude: f64,
    /// Allowed distance from the reference point, in meters. Must be > 0.
    pub radius_meters: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorSection {
    pub high_accuracy: Option<bool>,
    /// Acquisition timeout per fix (default: 10000)
    pub timeout_ms: Option<u64>,
    /// Oldest cached fix the platform may reuse (default: 0, always fresh)
    pub max_cached_age_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSection {
    pub user_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid reference point: {0}")]
    Reference(#[from] GeoError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

/// Parse and validate. A config that loads has a usable reference point.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.reference_point()?;
    if config.session.user_id.trim().is_empty() {
        return Err(ConfigError::Invalid("session.user_id is empty".to_string()));
    }
    Ok(config)
}

impl Config {
    pub fn reference_point(&self) -> Result<ReferencePoint, ConfigError> {
        let section = &self.reference;
        let point = Coordinate::new(section.latitude, section.longitude)?;
        Ok(ReferencePoint::new(point, section.radius_meters)?)
    }

    pub fn watch_options(&self) -> WatchOptions {
        let defaults = WatchOptions::default();
        let Some(section) = self.sensor.as_ref() else {
            return defaults;
        };
        WatchOptions {
            high_accuracy: section.high_accuracy.unwrap_or(defaults.high_accuracy),
            timeout: Duration::from_millis(
                section.timeout_ms.unwrap_or(DEFAULT_SENSOR_TIMEOUT_MS),
            ),
            max_cached_age: section
                .max_cached_age_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_cached_age),
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
