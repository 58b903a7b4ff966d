//! Core library for the cistern volume monitor.
//!
//! Reads a liquid-level sensor through an ADS1115 converter on a Linux I2C bus,
//! turns the voltage into a volume for a cylindrical tank and hands the result to a
//! sink: an MQTT broker (continuous polling) or a PostgreSQL table (one shot).
//!
//! The `cistern` binary wires these pieces together from a TOML configuration.

pub mod config;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod poll_loop;
pub mod sink;
pub mod traits;

pub use config::CisternConfig;
pub use error::{AppResult, CisternError};
pub use measurement::{estimate, TankParams, VoltageReading, VolumeMeasurement};
pub use poll_loop::{shutdown_channel, CycleReport, PollLoop, ShutdownToken, ShutdownTrigger};
