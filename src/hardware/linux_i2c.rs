//! Linux `i2c-dev` bus node
//!
//! Acquisition takes an exclusive, non-blocking `flock` on the device node before the
//! adapter is opened through `linux-embedded-hal`. The lock lives as long as the
//! transport, so a second process (or a second handle in this one) is refused until the
//! holder closes.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{AppResult, CisternError};
use crate::hardware::bus::{unavailable, BusDevice, RegisterTransport};

/// I2C adapter exposed as a `/dev/i2c-N` character device
#[derive(Debug, Clone)]
pub struct LinuxI2cDevice {
    node: PathBuf,
}

impl LinuxI2cDevice {
    /// # Arguments
    /// * `node` - Device path (e.g., "/dev/i2c-1")
    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }

    fn lock_node(&self) -> AppResult<Flock<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.node)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::NotFound => "device node does not exist".to_string(),
                    ErrorKind::PermissionDenied => "permission denied".to_string(),
                    _ => e.to_string(),
                };
                unavailable(&self.node, reason)
            })?;

        Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            let reason = if errno == Errno::EWOULDBLOCK {
                "locked by another process".to_string()
            } else {
                format!("flock failed: {errno}")
            };
            unavailable(&self.node, reason)
        })
    }
}

impl BusDevice for LinuxI2cDevice {
    fn node(&self) -> &Path {
        &self.node
    }

    fn connect(&self) -> AppResult<Box<dyn RegisterTransport>> {
        let lock = self.lock_node()?;
        let i2c = I2cdev::new(&self.node).map_err(|e| unavailable(&self.node, e.to_string()))?;

        Ok(Box::new(LinuxI2cTransport { i2c, _lock: lock }))
    }
}

/// Open adapter plus the lock that keeps it ours
struct LinuxI2cTransport {
    i2c: I2cdev,
    _lock: Flock<File>,
}

impl RegisterTransport for LinuxI2cTransport {
    fn write_register(&mut self, address: u8, register: u8, value: &[u8]) -> AppResult<()> {
        let mut frame = Vec::with_capacity(value.len() + 1);
        frame.push(register);
        frame.extend_from_slice(value);

        self.i2c.write(address, &frame).map_err(|e| {
            CisternError::BusIo(format!(
                "write to {address:#04x} register {register:#04x} failed: {e:?}"
            ))
        })
    }

    fn read_register(&mut self, address: u8, register: u8, buf: &mut [u8]) -> AppResult<()> {
        self.i2c.write_read(address, &[register], buf).map_err(|e| {
            CisternError::BusIo(format!(
                "read from {address:#04x} register {register:#04x} failed: {e:?}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::bus;

    #[test]
    fn test_missing_node_is_unavailable() {
        let device = LinuxI2cDevice::new("/dev/i2c-does-not-exist");
        let err = bus::open(&device).expect_err("missing node");
        match err {
            CisternError::BusUnavailable { node, reason } => {
                assert_eq!(node, PathBuf::from("/dev/i2c-does-not-exist"));
                assert!(reason.contains("does not exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!bus::is_claimed(Path::new("/dev/i2c-does-not-exist")));
    }

    #[test]
    fn test_flock_is_exclusive() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let device = LinuxI2cDevice::new(file.path());

        let _held = device.lock_node().expect("first lock");
        let err = device.lock_node().expect_err("second lock must fail");
        assert!(err.to_string().contains("locked by another process"));
    }
}
