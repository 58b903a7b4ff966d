//! Custom error types for the application.
//!
//! This module defines the primary error type, `CisternError`, shared by every stage of
//! the measurement pipeline. Using the `thiserror` crate, it gives each failure a stable
//! kind so callers can decide what is fatal and what is recovered.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigLoad`**: the configuration file is missing, unreadable or lacks a required key.
//! - **`ConfigValidation`**: the configuration parsed but holds values that make no sense
//!   (e.g. `voltage_max <= voltage_min`).
//! - **`BusUnavailable`**: the bus node could not be acquired (missing device, permission
//!   denied, already held exclusively).
//! - **`BusIo`**: a register transfer failed, or the handle was already closed.
//! - **`ConversionTimeout`**: the ADC never signalled conversion-complete.
//! - **`InvalidChannel`**: precondition violation, raised before any bus transfer.
//! - **`DeliveryFailed`**: the sink could not take the measurement.
//!
//! Whether an error ends the run is decided by the poll loop, not here.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, CisternError>;

/// Failure kinds across the measurement pipeline
#[derive(Error, Debug)]
pub enum CisternError {
    /// Configuration missing, unreadable or incomplete
    #[error("Configuration error: {0}")]
    ConfigLoad(String),

    /// Configuration values that make no sense
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    /// Bus node could not be acquired
    #[error("Bus node {} unavailable: {reason}", .node.display())]
    BusUnavailable {
        /// Device node that was requested
        node: PathBuf,
        /// Why acquisition failed
        reason: String,
    },

    /// Register transfer failed or the handle is closed
    #[error("Bus I/O error: {0}")]
    BusIo(String),

    /// Conversion-complete never signalled within the bound
    #[error("ADC conversion did not complete within {0:?}")]
    ConversionTimeout(Duration),

    /// Channel outside the converter's inputs
    #[error("Invalid ADC channel {channel} (valid: 0..={max})")]
    InvalidChannel {
        /// Requested channel
        channel: u8,
        /// Highest valid channel
        max: u8,
    },

    /// Sink did not accept the measurement
    #[error("Delivery to {sink} failed: {cause}")]
    DeliveryFailed {
        /// Sink name
        sink: String,
        /// Underlying transport or protocol error
        cause: String,
    },
}

impl CisternError {
    /// Builds a `DeliveryFailed` from any displayable cause.
    pub fn delivery(sink: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::DeliveryFailed {
            sink: sink.into(),
            cause: cause.to_string(),
        }
    }

    /// True for failures of the read stage (bus, ADC), as opposed to config or delivery.
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            Self::BusUnavailable { .. }
                | Self::BusIo(_)
                | Self::ConversionTimeout(_)
                | Self::InvalidChannel { .. }
        )
    }
}

impl From<ConfigError> for CisternError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(msg) => Self::ConfigValidation(msg),
            other => Self::ConfigLoad(other.to_string()),
        }
    }
}
