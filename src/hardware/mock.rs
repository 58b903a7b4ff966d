//! Mock Hardware Implementations
//!
//! Simulated bus devices for testing without an I2C adapter attached.
//!
//! # Available Mocks
//!
//! - `MockBusDevice` - Bus node with open/release counters and connect refusal
//! - `MockTransport` - Register-level ADS1115 model behind the node
//!
//! # ADS1115 Model
//!
//! Writing the config register with OS=1 starts a conversion. The next
//! `ready_after_polls` reads of the config register report OS=0 (busy), after which OS
//! reads back 1 and the conversion register holds the scripted raw code.
//!
//! With `set_conversion_time`, readiness follows the tokio clock instead: OS reads
//! back 1 once that much time has passed since the start. Pair it with a paused clock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppResult, CisternError};
use crate::hardware::bus::{unavailable, BusDevice, RegisterTransport};
use crate::instrument::ads1115::{CONFIG_OS, REG_CONFIG, REG_CONVERSION};

// =============================================================================
// Shared state
// =============================================================================

#[derive(Debug, Default)]
struct MockState {
    opens: u32,
    releases: u32,
    refuse_connect: bool,
    transfers: u32,
    fail_transfers: u32,
    last_config: Option<u16>,
    raw_code: i16,
    ready_after_polls: u32,
    polls_remaining: u32,
    never_ready: bool,
    conversion_time: Option<Duration>,
    started_at: Option<Instant>,
}

// =============================================================================
// MockBusDevice
// =============================================================================

/// Mock bus node
///
/// Clones share state, so a test can keep one clone for assertions while the poll
/// loop owns another.
///
/// # Example
///
/// ```rust,ignore
/// let device = MockBusDevice::new("/dev/i2c-test");
/// device.set_raw_code(11_520); // 1.44 V at +/-4.096 V
/// let mut handle = bus::open(&device)?;
/// ```
#[derive(Clone)]
pub struct MockBusDevice {
    node: PathBuf,
    state: Arc<Mutex<MockState>>,
}

impl MockBusDevice {
    /// Create a mock node whose converter is ready on the first poll
    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Number of successful `connect` calls
    pub fn opens(&self) -> u32 {
        self.state().opens
    }

    /// Number of transports released
    pub fn releases(&self) -> u32 {
        self.state().releases
    }

    /// Number of register transfers attempted, failed ones included
    pub fn transfers(&self) -> u32 {
        self.state().transfers
    }

    /// Last value written to the config register
    pub fn last_config(&self) -> Option<u16> {
        self.state().last_config
    }

    /// Make `connect` fail as if the node were missing or locked elsewhere
    pub fn refuse_connect(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    /// Code returned from the conversion register
    pub fn set_raw_code(&self, raw: i16) {
        self.state().raw_code = raw;
    }

    /// Config-register polls reporting "busy" after each conversion start
    pub fn set_ready_after_polls(&self, polls: u32) {
        self.state().ready_after_polls = polls;
    }

    /// Report conversion complete only after `time` has elapsed since the start
    pub fn set_conversion_time(&self, time: Duration) {
        self.state().conversion_time = Some(time);
    }

    /// Never report conversion complete
    pub fn set_never_ready(&self, never: bool) {
        self.state().never_ready = never;
    }

    /// Fail the next `count` register transfers with `BusIo`
    pub fn fail_next_transfers(&self, count: u32) {
        self.state().fail_transfers = count;
    }
}

impl BusDevice for MockBusDevice {
    fn node(&self) -> &Path {
        &self.node
    }

    fn connect(&self) -> AppResult<Box<dyn RegisterTransport>> {
        let mut state = self.state();
        if state.refuse_connect {
            return Err(unavailable(&self.node, "mock device refused"));
        }
        state.opens += 1;

        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
        }))
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// Transport handed out by [`MockBusDevice`]; counts a release when dropped
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn begin_transfer(state: &mut MockState) -> AppResult<()> {
        state.transfers += 1;
        if state.fail_transfers > 0 {
            state.fail_transfers -= 1;
            return Err(CisternError::BusIo("mock transfer failed".to_string()));
        }
        Ok(())
    }
}

impl RegisterTransport for MockTransport {
    fn write_register(&mut self, _address: u8, register: u8, value: &[u8]) -> AppResult<()> {
        let mut state = lock(&self.state);
        Self::begin_transfer(&mut state)?;

        if register == REG_CONFIG && value.len() == 2 {
            let config = u16::from_be_bytes([value[0], value[1]]);
            state.last_config = Some(config);
            if config & CONFIG_OS != 0 {
                state.polls_remaining = state.ready_after_polls;
                state.started_at = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn read_register(&mut self, _address: u8, register: u8, buf: &mut [u8]) -> AppResult<()> {
        let mut state = lock(&self.state);
        Self::begin_transfer(&mut state)?;

        let word = match register {
            REG_CONFIG => {
                let config = state.last_config.unwrap_or(0) & !CONFIG_OS;
                let converting = match (state.conversion_time, state.started_at) {
                    (Some(time), Some(started)) => started.elapsed() < time,
                    _ => false,
                };
                if state.never_ready || converting {
                    config
                } else if state.polls_remaining > 0 {
                    state.polls_remaining -= 1;
                    config
                } else {
                    config | CONFIG_OS
                }
            }
            REG_CONVERSION => state.raw_code as u16,
            _ => 0,
        };

        for (dst, src) in buf.iter_mut().zip(word.to_be_bytes()) {
            *dst = src;
        }
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        lock(&self.state).releases += 1;
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
