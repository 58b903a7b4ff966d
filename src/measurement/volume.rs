//! Voltage to volume conversion for a right-cylinder tank.
//!
//! The level sensor is linear between `voltage_min` (empty) and `voltage_max`
//! (`max_height` of liquid). Readings below the calibrated minimum are a valid empty
//! tank, not an error. Readings above `max_height` are passed through unclamped; see
//! [`VolumeMeasurement::exceeds`].

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::{VoltageReading, VolumeMeasurement};

const LITERS_PER_CUBIC_METER: f64 = 1000.0;

/// Sensor calibration and tank geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankParams {
    /// Sensor output with an empty tank (volts)
    #[serde(default = "default_voltage_min")]
    pub voltage_min: f64,
    /// Sensor output at `max_height` (volts)
    #[serde(default = "default_voltage_max")]
    pub voltage_max: f64,
    /// Height covered by the sensor span (meters)
    #[serde(default = "default_max_height")]
    pub max_height: f64,
    /// Tank radius (meters)
    #[serde(default = "default_radius")]
    pub radius: f64,
}

fn default_voltage_min() -> f64 {
    0.48
}

fn default_voltage_max() -> f64 {
    2.4
}

fn default_max_height() -> f64 {
    3.0
}

fn default_radius() -> f64 {
    1.25
}

impl Default for TankParams {
    fn default() -> Self {
        Self {
            voltage_min: default_voltage_min(),
            voltage_max: default_voltage_max(),
            max_height: default_max_height(),
            radius: default_radius(),
        }
    }
}

impl TankParams {
    /// Liquid height for a sensor voltage; negative below the calibrated minimum.
    pub fn height(&self, volts: f64) -> f64 {
        ((volts - self.voltage_min) / (self.voltage_max - self.voltage_min)) * self.max_height
    }
}

/// Estimate the liquid volume for one reading.
pub fn estimate(reading: VoltageReading, params: &TankParams) -> VolumeMeasurement {
    let height = params.height(reading.volts);

    // NaN heights fall through to empty as well.
    if height > 0.0 {
        let liters = PI * params.radius.powi(2) * height * LITERS_PER_CUBIC_METER;
        VolumeMeasurement::new(liters, height)
    } else {
        VolumeMeasurement::new(0.0, height.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(volts: f64) -> VoltageReading {
        VoltageReading::new(0, volts)
    }

    #[test]
    fn test_reference_tank() {
        let params = TankParams::default();
        let m = estimate(reading(1.44), &params);
        assert!((m.height_m() - 1.5).abs() < 1e-9);
        assert!((m.liters() - 7363.107).abs() < 0.01, "got {}", m.liters());
        assert_eq!(m.whole_liters(), 7363);
    }

    #[test]
    fn test_small_tank() {
        let params = TankParams {
            radius: 0.14,
            ..TankParams::default()
        };
        let m = estimate(reading(1.44), &params);
        assert!((m.liters() - 92.363).abs() < 0.01, "got {}", m.liters());
    }

    #[test]
    fn test_at_or_below_minimum_is_empty() {
        let params = TankParams::default();
        for volts in [0.48, 0.47, 0.2, 0.0, -1.0] {
            let m = estimate(reading(volts), &params);
            assert_eq!(m.liters(), 0.0, "volts {volts}");
            assert_eq!(m.height_m(), 0.0);
        }
    }

    #[test]
    fn test_nan_reading_is_empty() {
        let m = estimate(reading(f64::NAN), &TankParams::default());
        assert_eq!(m.liters(), 0.0);
    }

    #[test]
    fn test_monotonic_above_minimum() {
        let params = TankParams::default();
        let mut previous = 0.0;
        for step in 1..=40 {
            let volts = 0.48 + f64::from(step) * 0.06;
            let liters = estimate(reading(volts), &params).liters();
            assert!(liters > previous, "not increasing at {volts} V");
            previous = liters;
        }
    }

    #[test]
    fn test_no_upper_clamp() {
        let params = TankParams::default();
        let full = estimate(reading(2.4), &params);
        let over = estimate(reading(2.88), &params);
        assert!(over.liters() > full.liters());
        assert!(over.exceeds(params.max_height));
        assert!(!full.exceeds(params.max_height));
    }

    #[test]
    fn test_estimate_is_pure() {
        let params = TankParams::default();
        let before = params;
        let a = estimate(reading(1.9), &params);
        let b = estimate(reading(1.9), &params);
        assert_eq!(a, b);
        assert_eq!(params, before);
    }
}
