//! Runtime configuration: built-in defaults, then a JSON file, then
//! `OPENSENSOR_*` environment variables.

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compensation::{CompensationModel, DEFAULT_FACTOR, DEFAULT_FALLBACK_CELSIUS};
use crate::error::ConfigError;
use crate::writer::Compression;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "opensensor.json";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "OPENSENSOR_";

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Stable UUID of this station. Reused across restarts.
    pub station_id: String,
    pub read_interval_secs: u32,
    pub batch_duration_secs: u32,
    pub warmup_readings: u32,
    pub temp_compensation_enabled: bool,
    pub temp_compensation_factor: f64,
    /// Heat-source temperature assumed when the thermal zone cannot be read.
    pub temp_compensation_fallback_celsius: f64,
    pub output_dir: PathBuf,
    pub compression: Compression,
    pub pms5003_device: PathBuf,
    pub log_level: String,
    /// Record station health next to the sensor batches.
    pub health_enabled: bool,
    pub health_output_dir: PathBuf,
    pub health_interval_secs: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            station_id: String::new(),
            read_interval_secs: 5,
            batch_duration_secs: 900,
            warmup_readings: 10,
            temp_compensation_enabled: true,
            temp_compensation_factor: DEFAULT_FACTOR,
            temp_compensation_fallback_celsius: DEFAULT_FALLBACK_CELSIUS,
            output_dir: PathBuf::from("output"),
            compression: Compression::Snappy,
            pms5003_device: PathBuf::from("/dev/serial0"),
            log_level: "info".to_string(),
            health_enabled: true,
            health_output_dir: PathBuf::from("output-health"),
            health_interval_secs: 60,
        }
    }
}

impl CollectorConfig {
    pub fn compensation(&self) -> CompensationModel {
        CompensationModel::new(self.temp_compensation_enabled, self.temp_compensation_factor)
            .with_fallback(self.temp_compensation_fallback_celsius)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub sync_enabled: bool,
    pub sync_interval_minutes: u32,
    /// Destination root for the bundled mirror uploader.
    pub mirror_dir: Option<PathBuf>,
    pub storage_prefix: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_enabled: false,
            sync_interval_minutes: 15,
            mirror_dir: None,
            storage_prefix: None,
        }
    }
}

/// Everything, as one flat JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub collector: CollectorConfig,
    #[serde(flatten)]
    pub sync: SyncConfig,
}

/// A fresh station identifier (UUID v7, time-ordered).
pub fn generate_station_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Settings {
    /// Defaults, overlaid by `path` (or [`DEFAULT_CONFIG_FILE`] if present),
    /// overlaid by the process environment. Not validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json + "\n").map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `OPENSENSOR_*` overrides from `vars`. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let c = &mut self.collector;
        let s = &mut self.sync;
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match name {
                "STATION_ID" => c.station_id = value.to_string(),
                "READ_INTERVAL_SECS" => c.read_interval_secs = parse("read_interval_secs", value)?,
                "BATCH_DURATION_SECS" => c.batch_duration_secs = parse("batch_duration_secs", value)?,
                "WARMUP_READINGS" => c.warmup_readings = parse("warmup_readings", value)?,
                "TEMP_COMPENSATION_ENABLED" => {
                    c.temp_compensation_enabled = parse_bool("temp_compensation_enabled", value)?;
                }
                "TEMP_COMPENSATION_FACTOR" => {
                    c.temp_compensation_factor = parse("temp_compensation_factor", value)?;
                }
                "TEMP_COMPENSATION_FALLBACK_CELSIUS" => {
                    c.temp_compensation_fallback_celsius =
                        parse("temp_compensation_fallback_celsius", value)?;
                }
                "OUTPUT_DIR" => c.output_dir = PathBuf::from(value),
                "COMPRESSION" => {
                    c.compression = value
                        .parse()
                        .map_err(|e: String| ConfigError::invalid("compression", e))?;
                }
                "PMS5003_DEVICE" => c.pms5003_device = PathBuf::from(value),
                "LOG_LEVEL" => c.log_level = value.to_ascii_lowercase(),
                "HEALTH_ENABLED" => c.health_enabled = parse_bool("health_enabled", value)?,
                "HEALTH_OUTPUT_DIR" => c.health_output_dir = PathBuf::from(value),
                "HEALTH_INTERVAL_SECS" => {
                    c.health_interval_secs = parse("health_interval_secs", value)?;
                }
                "SYNC_ENABLED" => s.sync_enabled = parse_bool("sync_enabled", value)?,
                "SYNC_INTERVAL_MINUTES" => {
                    s.sync_interval_minutes = parse("sync_interval_minutes", value)?;
                }
                "MIRROR_DIR" => s.mirror_dir = non_empty(value).map(PathBuf::from),
                "STORAGE_PREFIX" => s.storage_prefix = non_empty(value).map(str::to_string),
                _ => {
                    debug!("ignoring unknown environment variable {key}");
                    continue;
                }
            }
            debug!("config override from {key}");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Range checks. An empty station id passes; see [`Self::require_station_id`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collector;
        if !(1..=60).contains(&c.read_interval_secs) {
            return Err(ConfigError::invalid(
                "read_interval_secs",
                format!("{} is outside 1..=60", c.read_interval_secs),
            ));
        }
        let d = c.batch_duration_secs;
        if !(60..=3600).contains(&d) {
            return Err(ConfigError::invalid(
                "batch_duration_secs",
                format!("{d} is outside 60..=3600"),
            ));
        }
        if !c.temp_compensation_factor.is_finite() || c.temp_compensation_factor <= 0.0 {
            return Err(ConfigError::invalid(
                "temp_compensation_factor",
                format!("{} must be a positive number", c.temp_compensation_factor),
            ));
        }
        if !c.temp_compensation_fallback_celsius.is_finite() {
            return Err(ConfigError::invalid(
                "temp_compensation_fallback_celsius",
                "must be a finite number",
            ));
        }
        if !(1..=3600).contains(&c.health_interval_secs) {
            return Err(ConfigError::invalid(
                "health_interval_secs",
                format!("{} is outside 1..=3600", c.health_interval_secs),
            ));
        }
        if !c.station_id.is_empty() && Uuid::parse_str(&c.station_id).is_err() {
            return Err(ConfigError::invalid(
                "station_id",
                format!("'{}' is not a UUID", c.station_id),
            ));
        }
        if !LOG_LEVELS.contains(&c.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "log_level",
                format!("'{}' is not one of {}", c.log_level, LOG_LEVELS.join(", ")),
            ));
        }

        let s = &self.sync;
        if s.sync_interval_minutes == 0 {
            return Err(ConfigError::invalid("sync_interval_minutes", "must be at least 1"));
        }
        if s.sync_enabled && s.mirror_dir.is_none() {
            return Err(ConfigError::invalid(
                "mirror_dir",
                "required when sync_enabled is true",
            ));
        }
        Ok(())
    }

    /// Collection needs a station id to name its partitions.
    pub fn require_station_id(&self) -> Result<&str, ConfigError> {
        if self.collector.station_id.is_empty() {
            return Err(ConfigError::invalid(
                "station_id",
                "not set (run `opensensor init` or set OPENSENSOR_STATION_ID)",
            ));
        }
        Ok(&self.collector.station_id)
    }
}

fn parse<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("cannot parse '{value}'")))
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(field, format!("'{value}' is not a boolean"))),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}
