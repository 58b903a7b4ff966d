//! Adc trait
//!
//! Capability "read a voltage on a given channel" over an already-open bus.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::hardware::BusHandle;
use crate::measurement::VoltageReading;

/// Analog-to-digital converter reachable over a [`BusHandle`]
#[async_trait]
pub trait Adc: Send + Sync {
    /// Short driver name for logs
    fn name(&self) -> &str;

    /// Highest valid channel index
    fn max_channel(&self) -> u8;

    /// Run one conversion on `channel` and return it in volts.
    ///
    /// Fails with `InvalidChannel` before touching the bus when `channel` is out of
    /// range, `BusIo` on a failed transfer, and `ConversionTimeout` when the chip does
    /// not finish in time.
    async fn read_voltage(&self, bus: &mut BusHandle, channel: u8) -> AppResult<VoltageReading>;
}
