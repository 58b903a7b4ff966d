//! MeasurementPublisher trait
//!
//! Capability "deliver a measurement". Implementations own their connection lifecycle
//! for the duration of one call and never retry; retry policy belongs to the caller.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::measurement::VolumeMeasurement;

/// Sink for volume measurements
#[async_trait]
pub trait MeasurementPublisher: Send + Sync {
    /// Short sink name for logs and `DeliveryFailed`
    fn name(&self) -> &str;

    /// Deliver one measurement, failing with `DeliveryFailed` on any transport error
    async fn deliver(&self, measurement: &VolumeMeasurement) -> AppResult<()>;
}
