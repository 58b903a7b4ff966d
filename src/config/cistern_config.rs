//! Cistern configuration using Figment
//!
//! Strongly-typed configuration for the measurement pipeline. Every section except the
//! selected sink's has defaults matching the deployed installation, so a minimal file
//! only needs the sink credentials:
//!
//! ```toml
//! sink = "mqtt"
//!
//! [mqtt]
//! host = "tcp://192.168.1.10:1883"
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument::ads1115::{DataRate, Gain};
use crate::measurement::TankParams;

/// Path used when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "cistern.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be parsed or a required key is absent
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Configuration file does not exist
    #[error("Configuration file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// Section or key required by the selected sink is absent
    #[error("Missing configuration key '{0}'")]
    MissingKey(&'static str),
    /// Values parsed but are inconsistent
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Which sink the run reports to. Also selects the poll loop shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Publish to an MQTT topic, polling forever.
    Mqtt,
    /// Insert one row into a database, then exit.
    Database,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CisternConfig {
    /// Where measurements go
    #[serde(default = "default_sink")]
    pub sink: SinkKind,
    /// I2C node and converter address
    #[serde(default)]
    pub bus: BusConfig,
    /// Converter settings
    #[serde(default)]
    pub adc: AdcConfig,
    /// Sensor calibration and tank geometry
    #[serde(default)]
    pub tank: TankParams,
    /// Loop timing
    #[serde(default)]
    pub poll: PollConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Required when `sink = "mqtt"`
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    /// Required when `sink = "database"`
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// I2C bus and converter addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Device node (e.g., "/dev/i2c-1")
    #[serde(default = "default_bus_device")]
    pub device: PathBuf,
    /// 7-bit converter address
    #[serde(default = "default_adc_address")]
    pub address: u8,
    /// Single-ended input the level sensor is wired to
    #[serde(default)]
    pub channel: u8,
}

/// ADS1115 conversion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdcConfig {
    /// Full-scale range
    #[serde(default)]
    pub gain: Gain,
    /// Samples per second
    #[serde(default)]
    pub data_rate: DataRate,
    /// Upper bound on the conversion-complete wait. Raised to the data rate's
    /// conversion time plus tolerance when that is longer.
    #[serde(default = "default_conversion_timeout")]
    pub conversion_timeout_ms: u64,
}

/// Poll loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between continuous cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Consecutive read failures tolerated before the continuous loop gives up
    #[serde(default = "default_max_read_failures")]
    pub max_consecutive_read_failures: u32,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// MQTT sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker address (e.g., "tcp://192.168.1.10:1883")
    pub host: String,
    /// Topic the volume is published to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// MQTT client identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Bound on establishing the broker connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Reconnect attempts allowed within one publish after the broker acknowledged us
    #[serde(default = "default_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Keep-alive interval (minimum 5 s)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// Database sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (e.g., "postgresql://db.local:5432/home")
    pub url: String,
    /// Login role
    pub user: String,
    /// Password for `user`
    pub password: String,
    /// Target table, a plain SQL identifier
    #[serde(default = "default_table")]
    pub table: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_sink() -> SinkKind {
    SinkKind::Mqtt
}

fn default_bus_device() -> PathBuf {
    PathBuf::from("/dev/i2c-1")
}

fn default_adc_address() -> u8 {
    0x48
}

fn default_conversion_timeout() -> u64 {
    100
}

fn default_interval() -> u64 {
    30
}

fn default_max_read_failures() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_topic() -> String {
    "/home/sensor/cistern/volume".to_string()
}

fn default_client_id() -> String {
    "cistern".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_keep_alive() -> u64 {
    30
}

fn default_table() -> String {
    "cistern_volume".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: default_bus_device(),
            address: default_adc_address(),
            channel: 0,
        }
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            gain: Gain::default(),
            data_rate: DataRate::default(),
            conversion_timeout_ms: default_conversion_timeout(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_consecutive_read_failures: default_max_read_failures(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl CisternConfig {
    /// Load configuration from the default location (`cistern.toml`)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns `MissingFile` if the file does not exist, `LoadError` if it cannot be parsed
    /// or lacks a required key, and `ValidationError` if values are inconsistent.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CISTERN_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - The selected sink has its section
    /// - Log level is valid
    /// - Tank calibration is usable (`voltage_max > voltage_min`, positive geometry)
    /// - Bus address fits in 7 bits and the channel exists on the converter
    /// - The database table name is a plain identifier
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.sink {
            SinkKind::Mqtt => {
                let mqtt = self.mqtt_config()?;
                if mqtt.host.trim().is_empty() {
                    return Err(ConfigError::MissingKey("mqtt.host"));
                }
                if mqtt.topic.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "mqtt.topic must not be empty".to_string(),
                    ));
                }
            }
            SinkKind::Database => {
                let db = self.database_config()?;
                if db.url.trim().is_empty() {
                    return Err(ConfigError::MissingKey("database.url"));
                }
                if !is_sql_identifier(&db.table) {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid database.table '{}'. Must be a plain SQL identifier",
                        db.table
                    )));
                }
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let tank = &self.tank;
        if !(tank.voltage_max > tank.voltage_min) {
            return Err(ConfigError::ValidationError(format!(
                "tank.voltage_max ({}) must be greater than tank.voltage_min ({})",
                tank.voltage_max, tank.voltage_min
            )));
        }
        if !(tank.max_height > 0.0) || !(tank.radius > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "tank.max_height ({}) and tank.radius ({}) must be positive",
                tank.max_height, tank.radius
            )));
        }

        if self.bus.address > 0x7f {
            return Err(ConfigError::ValidationError(format!(
                "bus.address {:#04x} is not a 7-bit I2C address",
                self.bus.address
            )));
        }
        if self.bus.channel > crate::instrument::ads1115::MAX_CHANNEL {
            return Err(ConfigError::ValidationError(format!(
                "bus.channel {} does not exist on the ADS1115",
                self.bus.channel
            )));
        }

        if self.adc.conversion_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "adc.conversion_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll.interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// The `[mqtt]` section, required when `sink = "mqtt"`
    pub fn mqtt_config(&self) -> Result<&MqttConfig, ConfigError> {
        self.mqtt.as_ref().ok_or(ConfigError::MissingKey("mqtt.host"))
    }

    /// The `[database]` section, required when `sink = "database"`
    pub fn database_config(&self) -> Result<&DatabaseConfig, ConfigError> {
        self.database
            .as_ref()
            .ok_or(ConfigError::MissingKey("database.url"))
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
