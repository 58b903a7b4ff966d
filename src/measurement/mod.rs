//! Measurement values flowing through one poll cycle.
//!
//! A [`VoltageReading`] comes off the ADC, [`volume::estimate`] turns it into a
//! [`VolumeMeasurement`], and a publisher delivers that. Nothing here is persisted.

pub mod volume;

use serde::{Deserialize, Serialize};

pub use volume::{estimate, TankParams};

/// Voltage sampled on one ADC channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageReading {
    /// Input the reading came from
    pub channel: u8,
    /// Measured voltage
    pub volts: f64,
}

impl VoltageReading {
    /// Tag `volts` with its channel
    pub fn new(channel: u8, volts: f64) -> Self {
        Self { channel, volts }
    }
}

/// Estimated liquid volume, derived from one [`VoltageReading`]
///
/// Immutable once produced. The timestamp is not part of the value; sinks attach
/// their own at delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeMeasurement {
    liters: f64,
    height_m: f64,
}

impl VolumeMeasurement {
    pub(crate) fn new(liters: f64, height_m: f64) -> Self {
        Self { liters, height_m }
    }

    /// Volume in liters, never negative
    pub fn liters(&self) -> f64 {
        self.liters
    }

    /// Liquid height the volume was computed from, in meters
    pub fn height_m(&self) -> f64 {
        self.height_m
    }

    /// Liters truncated toward zero, the value sinks publish as text
    pub fn whole_liters(&self) -> i64 {
        self.liters.trunc() as i64
    }

    /// True when the sensor reported more than the calibrated tank height.
    pub fn exceeds(&self, max_height_m: f64) -> bool {
        self.height_m > max_height_m
    }
}
