//! TI ADS1115 16-bit I2C ADC driver
//!
//! Single-shot conversions on the single-ended inputs AIN0..AIN3.
//!
//! ## Register map
//!
//! | Pointer | Register   | Notes                                  |
//! |---------|------------|----------------------------------------|
//! | `0x00`  | Conversion | 16-bit two's complement, big-endian    |
//! | `0x01`  | Config     | OS, MUX, PGA, MODE, DR, comparator     |
//!
//! Config register layout (MSB first):
//!
//! ```text
//! 15    14..12  11..9  8     7..5  4         3        2        1..0
//! OS    MUX     PGA    MODE  DR    COMP_MODE COMP_POL COMP_LAT COMP_QUE
//! ```
//!
//! Writing OS=1 in single-shot mode starts a conversion; reading OS=1 back means the
//! device is idle and the conversion register holds the result.
//!
//! ## Configuration
//!
//! ```toml
//! [bus]
//! address = 0x48
//! channel = 0
//!
//! [adc]
//! gain = "1"        # +/-4.096 V full scale
//! data_rate = 128   # samples per second
//! conversion_timeout_ms = 100
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};

use crate::config::{AdcConfig, BusConfig};
use crate::error::{AppResult, CisternError};
use crate::hardware::BusHandle;
use crate::measurement::VoltageReading;
use crate::traits::Adc;

/// Conversion result register
pub const REG_CONVERSION: u8 = 0x00;
/// Config register
pub const REG_CONFIG: u8 = 0x01;

/// Operational status / single-shot start bit
pub const CONFIG_OS: u16 = 1 << 15;
const CONFIG_MODE_SINGLE_SHOT: u16 = 1 << 8;
const CONFIG_COMP_QUE_DISABLE: u16 = 0b11;
const MUX_SINGLE_ENDED_BASE: u16 = 0b100;

/// Highest single-ended input (AIN3)
pub const MAX_CHANNEL: u8 = 3;

const FULL_SCALE_CODE: f64 = 32768.0;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Internal oscillator accuracy is +/-10 %
const CLOCK_TOLERANCE_DIVISOR: u32 = 10;

/// Programmable gain amplifier setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gain {
    /// +/-6.144 V
    #[serde(rename = "2/3")]
    TwoThirds,
    /// +/-4.096 V
    #[default]
    #[serde(rename = "1")]
    One,
    /// +/-2.048 V
    #[serde(rename = "2")]
    Two,
    /// +/-1.024 V
    #[serde(rename = "4")]
    Four,
    /// +/-0.512 V
    #[serde(rename = "8")]
    Eight,
    /// +/-0.256 V
    #[serde(rename = "16")]
    Sixteen,
}

impl Gain {
    /// Full-scale range in volts
    pub fn full_scale_volts(self) -> f64 {
        match self {
            Gain::TwoThirds => 6.144,
            Gain::One => 4.096,
            Gain::Two => 2.048,
            Gain::Four => 1.024,
            Gain::Eight => 0.512,
            Gain::Sixteen => 0.256,
        }
    }

    fn pga_bits(self) -> u16 {
        match self {
            Gain::TwoThirds => 0b000,
            Gain::One => 0b001,
            Gain::Two => 0b010,
            Gain::Four => 0b011,
            Gain::Eight => 0b100,
            Gain::Sixteen => 0b101,
        }
    }

    /// Scale a raw conversion code to volts
    pub fn to_volts(self, raw: i16) -> f64 {
        f64::from(raw) * self.full_scale_volts() / FULL_SCALE_CODE
    }
}

/// Conversion data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum DataRate {
    /// 8 SPS
    Sps8,
    /// 16 SPS
    Sps16,
    /// 32 SPS
    Sps32,
    /// 64 SPS
    Sps64,
    /// 128 SPS
    #[default]
    Sps128,
    /// 250 SPS
    Sps250,
    /// 475 SPS
    Sps475,
    /// 860 SPS
    Sps860,
}

impl DataRate {
    /// Nominal samples per second
    pub fn samples_per_second(self) -> u16 {
        match self {
            DataRate::Sps8 => 8,
            DataRate::Sps16 => 16,
            DataRate::Sps32 => 32,
            DataRate::Sps64 => 64,
            DataRate::Sps128 => 128,
            DataRate::Sps250 => 250,
            DataRate::Sps475 => 475,
            DataRate::Sps860 => 860,
        }
    }

    fn dr_bits(self) -> u16 {
        match self {
            DataRate::Sps8 => 0b000,
            DataRate::Sps16 => 0b001,
            DataRate::Sps32 => 0b010,
            DataRate::Sps64 => 0b011,
            DataRate::Sps128 => 0b100,
            DataRate::Sps250 => 0b101,
            DataRate::Sps475 => 0b110,
            DataRate::Sps860 => 0b111,
        }
    }

    /// Nominal time for one conversion
    pub fn conversion_time(self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.samples_per_second()) + 1)
    }
}

impl TryFrom<u16> for DataRate {
    type Error = String;

    fn try_from(sps: u16) -> Result<Self, Self::Error> {
        Ok(match sps {
            8 => DataRate::Sps8,
            16 => DataRate::Sps16,
            32 => DataRate::Sps32,
            64 => DataRate::Sps64,
            128 => DataRate::Sps128,
            250 => DataRate::Sps250,
            475 => DataRate::Sps475,
            860 => DataRate::Sps860,
            other => {
                return Err(format!(
                    "unsupported data rate {other} SPS (8, 16, 32, 64, 128, 250, 475, 860)"
                ))
            }
        })
    }
}

impl From<DataRate> for u16 {
    fn from(rate: DataRate) -> u16 {
        rate.samples_per_second()
    }
}

/// ADS1115 at a fixed bus address
#[derive(Debug, Clone)]
pub struct Ads1115 {
    address: u8,
    gain: Gain,
    data_rate: DataRate,
    conversion_timeout: Duration,
}

impl Ads1115 {
    /// Driver with default gain (+/-4.096 V), 128 SPS and a 100 ms conversion timeout
    ///
    /// # Arguments
    /// * `address` - 7-bit I2C address (0x48..=0x4B depending on ADDR wiring)
    pub fn new(address: u8) -> Self {
        Self {
            address,
            gain: Gain::default(),
            data_rate: DataRate::default(),
            conversion_timeout: Duration::from_millis(100),
        }
    }

    /// Driver for the converter described by the `[bus]` and `[adc]` sections
    pub fn from_config(bus: &BusConfig, adc: &AdcConfig) -> Self {
        Self::new(bus.address)
            .with_gain(adc.gain)
            .with_data_rate(adc.data_rate)
            .with_conversion_timeout(Duration::from_millis(adc.conversion_timeout_ms))
    }

    /// Set the full-scale range
    pub fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    /// Set the conversion rate
    pub fn with_data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    /// Set the conversion-complete bound
    pub fn with_conversion_timeout(mut self, timeout: Duration) -> Self {
        self.conversion_timeout = timeout;
        self
    }

    /// 7-bit bus address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Config word starting a single-shot conversion of `channel` against GND
    pub fn config_word(&self, channel: u8) -> u16 {
        CONFIG_OS
            | (MUX_SINGLE_ENDED_BASE + u16::from(channel)) << 12
            | self.gain.pga_bits() << 9
            | CONFIG_MODE_SINGLE_SHOT
            | self.data_rate.dr_bits() << 5
            | CONFIG_COMP_QUE_DISABLE
    }

    /// Bound on one conversion: the configured timeout, but never less than the data
    /// rate's nominal conversion time plus the oscillator tolerance.
    pub fn effective_timeout(&self) -> Duration {
        let nominal = self.data_rate.conversion_time();
        let slowest = nominal + nominal / CLOCK_TOLERANCE_DIVISOR + READY_POLL_INTERVAL;
        self.conversion_timeout.max(slowest)
    }

    async fn wait_for_conversion(&self, bus: &mut BusHandle) -> AppResult<()> {
        let timeout = self.effective_timeout();
        let deadline = Instant::now() + timeout;
        sleep(self.data_rate.conversion_time()).await;

        loop {
            let mut config = [0u8; 2];
            bus.read_register(self.address, REG_CONFIG, &mut config)?;
            if u16::from_be_bytes(config) & CONFIG_OS != 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CisternError::ConversionTimeout(timeout));
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Adc for Ads1115 {
    fn name(&self) -> &str {
        "ads1115"
    }

    fn max_channel(&self) -> u8 {
        MAX_CHANNEL
    }

    async fn read_voltage(&self, bus: &mut BusHandle, channel: u8) -> AppResult<VoltageReading> {
        if channel > MAX_CHANNEL {
            return Err(CisternError::InvalidChannel {
                channel,
                max: MAX_CHANNEL,
            });
        }

        let config = self.config_word(channel);
        bus.write_register(self.address, REG_CONFIG, &config.to_be_bytes())?;
        self.wait_for_conversion(bus).await?;

        let mut result = [0u8; 2];
        bus.read_register(self.address, REG_CONVERSION, &mut result)?;
        let raw = i16::from_be_bytes(result);
        let volts = self.gain.to_volts(raw);

        tracing::trace!(
            address = self.address,
            channel,
            raw,
            volts,
            "ADS1115 conversion complete"
        );
        Ok(VoltageReading::new(channel, volts))
    }
}
