//! Bus Hardware
//!
//! Exclusive access to the I2C bus the level-sensor ADC hangs off.
//! Includes a mock node for running the pipeline without hardware.

pub mod bus;
pub mod linux_i2c;
pub mod mock;

pub use bus::{BusDevice, BusHandle, RegisterTransport};
pub use linux_i2c::LinuxI2cDevice;
pub use mock::MockBusDevice;
