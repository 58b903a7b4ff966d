//! In-memory publisher
//!
//! Records every delivered measurement and can be told to fail. Used to exercise the
//! poll loop without a broker or database.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{AppResult, CisternError};
use crate::measurement::VolumeMeasurement;
use crate::traits::MeasurementPublisher;

#[derive(Debug, Default)]
struct Recorded {
    delivered: Vec<VolumeMeasurement>,
    attempts: u32,
    fail_next: u32,
}

/// Publisher double; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    inner: Arc<Mutex<Recorded>>,
}

impl MemoryPublisher {
    /// Publisher that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Recorded> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Measurements accepted so far
    pub fn delivered(&self) -> Vec<VolumeMeasurement> {
        self.inner().delivered.clone()
    }

    /// Calls to `deliver`, failed ones included
    pub fn attempts(&self) -> u32 {
        self.inner().attempts
    }

    /// Fail the next `count` deliveries with `DeliveryFailed`
    pub fn fail_next(&self, count: u32) {
        self.inner().fail_next = count;
    }
}

#[async_trait]
impl MeasurementPublisher for MemoryPublisher {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, measurement: &VolumeMeasurement) -> AppResult<()> {
        let mut inner = self.inner();
        inner.attempts += 1;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(CisternError::delivery("memory", "injected failure"));
        }
        inner.delivered.push(*measurement);
        Ok(())
    }
}
