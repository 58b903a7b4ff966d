//! Exclusive bus access
//!
//! A [`BusHandle`] is the only way to talk to a bus node. Opening one claims the node in
//! a process-wide registry before the device itself is acquired, so at most one live
//! handle per node exists in the process; the device implementation adds its own
//! OS-level claim (see [`LinuxI2cDevice`](super::LinuxI2cDevice)). The claim is released
//! by [`BusHandle::close`] or, on any other exit path, when the handle is dropped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::{AppResult, CisternError};

/// Nodes with a live handle in this process
static CLAIMED_NODES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Raw register access on an acquired bus
///
/// Transfers are all-or-nothing: a failed transfer reports `BusIo` and the caller
/// retries the whole logical operation.
pub trait RegisterTransport: Send {
    /// Write `value` to `register` of the target at `address`
    fn write_register(&mut self, address: u8, register: u8, value: &[u8]) -> AppResult<()>;

    /// Fill `buf` from `register` of the target at `address`
    fn read_register(&mut self, address: u8, register: u8, buf: &mut [u8]) -> AppResult<()>;
}

/// A physical bus node that can be acquired exclusively
pub trait BusDevice: Send + Sync {
    /// Device node identifying the bus (e.g., "/dev/i2c-1")
    fn node(&self) -> &Path;

    /// Acquire the device and return a transport bound to it.
    ///
    /// Called with the node already claimed in-process. Dropping the transport must
    /// release whatever the device acquired.
    fn connect(&self) -> AppResult<Box<dyn RegisterTransport>>;
}

/// Open an exclusive handle on `device`
///
/// # Errors
///
/// `BusUnavailable` if the node already has a live handle in this process or the
/// device refuses acquisition.
pub fn open(device: &dyn BusDevice) -> AppResult<BusHandle> {
    let node = device.node().to_path_buf();
    claim(&node)?;

    match device.connect() {
        Ok(transport) => {
            tracing::debug!(node = %node.display(), "Bus node opened");
            Ok(BusHandle {
                node,
                transport: Some(transport),
            })
        }
        Err(err) => {
            release(&node);
            Err(err)
        }
    }
}

fn claim(node: &Path) -> AppResult<()> {
    let mut claimed = CLAIMED_NODES
        .lock()
        .map_err(|_| unavailable(node, "node registry poisoned"))?;

    if !claimed.insert(node.to_path_buf()) {
        return Err(unavailable(node, "already held by this process"));
    }
    Ok(())
}

fn release(node: &Path) {
    match CLAIMED_NODES.lock() {
        Ok(mut claimed) => {
            claimed.remove(node);
        }
        Err(_) => {
            tracing::warn!(node = %node.display(), "Failed to release bus claim: registry poisoned");
        }
    }
}

/// Whether `node` currently has a live handle in this process
pub fn is_claimed(node: &Path) -> bool {
    CLAIMED_NODES
        .lock()
        .map(|claimed| claimed.contains(node))
        .unwrap_or(false)
}

pub(crate) fn unavailable(node: &Path, reason: impl Into<String>) -> CisternError {
    CisternError::BusUnavailable {
        node: node.to_path_buf(),
        reason: reason.into(),
    }
}

/// RAII handle for exclusive bus access
///
/// Owned by whoever opened it; not `Clone`. Releases the device and the in-process claim
/// exactly once, on the first `close()` or on drop.
pub struct BusHandle {
    node: PathBuf,
    transport: Option<Box<dyn RegisterTransport>>,
}

impl BusHandle {
    /// Device node this handle was opened on
    pub fn node(&self) -> &Path {
        &self.node
    }

    /// False once `close()` has run
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Write `value` to `register` of the device at `address`
    pub fn write_register(&mut self, address: u8, register: u8, value: &[u8]) -> AppResult<()> {
        self.transport()?.write_register(address, register, value)
    }

    /// Fill `buf` from `register` of the device at `address`
    pub fn read_register(&mut self, address: u8, register: u8, buf: &mut [u8]) -> AppResult<()> {
        self.transport()?.read_register(address, register, buf)
    }

    /// Release the device and the claim. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            drop(transport);
            release(&self.node);
            tracing::debug!(node = %self.node.display(), "Bus node closed");
        }
    }

    fn transport(&mut self) -> AppResult<&mut Box<dyn RegisterTransport>> {
        let node = self.node.display().to_string();
        self.transport
            .as_mut()
            .ok_or_else(|| CisternError::BusIo(format!("handle on {node} is closed")))
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle")
            .field("node", &self.node)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockBusDevice;

    #[test]
    fn test_open_claims_node() {
        let device = MockBusDevice::new("/dev/test-bus-open");
        let handle = open(&device).expect("open");
        assert!(handle.is_open());
        assert!(is_claimed(Path::new("/dev/test-bus-open")));
        drop(handle);
        assert!(!is_claimed(Path::new("/dev/test-bus-open")));
    }

    #[test]
    fn test_second_open_is_refused() {
        let device = MockBusDevice::new("/dev/test-bus-twice");
        let _first = open(&device).expect("first open");

        let err = open(&device).expect_err("second open must fail");
        assert!(matches!(err, CisternError::BusUnavailable { .. }));
        assert!(err.to_string().contains("already held"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let device = MockBusDevice::new("/dev/test-bus-close");
        let mut handle = open(&device).expect("open");

        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(device.releases(), 1);
        assert!(!is_claimed(Path::new("/dev/test-bus-close")));
    }

    #[test]
    fn test_reopen_after_close() {
        let device = MockBusDevice::new("/dev/test-bus-reopen");
        for _ in 0..3 {
            let mut handle = open(&device).expect("open");
            handle.close();
        }
        assert_eq!(device.opens(), 3);
        assert_eq!(device.releases(), 3);
    }

    #[test]
    fn test_transfer_on_closed_handle() {
        let device = MockBusDevice::new("/dev/test-bus-closed-io");
        let mut handle = open(&device).expect("open");
        handle.close();

        let mut buf = [0u8; 2];
        let err = handle.read_register(0x48, 0x00, &mut buf).expect_err("closed");
        assert!(matches!(err, CisternError::BusIo(_)));
    }

    #[test]
    fn test_failed_connect_releases_claim() {
        let device = MockBusDevice::new("/dev/test-bus-refused");
        device.refuse_connect(true);

        let err = open(&device).expect_err("connect refused");
        assert!(matches!(err, CisternError::BusUnavailable { .. }));
        assert!(!is_claimed(Path::new("/dev/test-bus-refused")));

        device.refuse_connect(false);
        assert!(open(&device).is_ok());
    }
}
