//! Configuration System
//!
//! Configuration is loaded with Figment from (in order of precedence):
//! 1. Environment variables prefixed with `CISTERN_`
//! 2. TOML configuration file (default: `cistern.toml`)
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! CISTERN_MQTT__HOST=tcp://broker.local:1883
//! CISTERN_DATABASE__PASSWORD=secret
//! CISTERN_POLL__INTERVAL_SECS=60
//! ```

pub mod cistern_config;

pub use cistern_config::{
    AdcConfig, BusConfig, CisternConfig, ConfigError, DatabaseConfig, LoggingConfig, MqttConfig,
    PollConfig, SinkKind, DEFAULT_CONFIG_PATH,
};
