//! Measurement cycle orchestration
//!
//! Two shapes, selected by the sink:
//!
//! - **Continuous** ([`PollLoop::run_continuous`]): the bus is opened once and held
//!   across cycles. Each cycle reads, estimates and delivers, then sleeps the poll
//!   interval. A delivery failure is logged and the loop carries on. A
//!   [`ShutdownToken`] ends the loop during the sleep; that is a normal exit.
//! - **Single-shot** ([`PollLoop::run_single_shot`]): open, read, close, then deliver.
//!   Every failure is returned to the caller.
//!
//! In both shapes the bus handle is released on every exit path.
//!
//! ## Read failures in the continuous loop
//!
//! A failed read is logged and retried on the next cycle with the bus kept open. After
//! `max_consecutive_read_failures` failures in a row (0 = never give up) the loop
//! ends with the last error. `InvalidChannel` ends it immediately, since retrying
//! cannot fix a wrong channel.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::CisternConfig;
use crate::error::{AppResult, CisternError};
use crate::hardware::{bus, BusDevice, BusHandle, LinuxI2cDevice};
use crate::instrument::Ads1115;
use crate::measurement::{estimate, TankParams, VolumeMeasurement};
use crate::traits::{Adc, MeasurementPublisher};

// =============================================================================
// Shutdown signalling
// =============================================================================

/// Trips the paired [`ShutdownToken`]
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Repeat calls are harmless.
    pub fn trigger(&self) {
        // No receivers left means nobody is waiting; nothing to do.
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation checked at the loop's suspension point
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if the trigger was dropped
    /// without firing.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected trigger/token pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownToken { rx })
}

// =============================================================================
// PollLoop
// =============================================================================

/// Counters for one continuous run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycles started
    pub cycles: u64,
    /// Measurements the sink accepted
    pub delivered: u64,
    /// Deliveries that failed and were skipped
    pub delivery_failures: u64,
    /// Reads that failed, transient or final
    pub read_failures: u64,
}

/// Drives bus, converter, estimator and sink through measurement cycles
pub struct PollLoop {
    device: Box<dyn BusDevice>,
    adc: Box<dyn Adc>,
    channel: u8,
    tank: TankParams,
    interval: Duration,
    max_consecutive_read_failures: u32,
}

impl PollLoop {
    /// Loop with a 30 s interval, giving up after 5 consecutive read failures
    pub fn new(
        device: Box<dyn BusDevice>,
        adc: Box<dyn Adc>,
        channel: u8,
        tank: TankParams,
    ) -> Self {
        Self {
            device,
            adc,
            channel,
            tank,
            interval: Duration::from_secs(30),
            max_consecutive_read_failures: 5,
        }
    }

    /// Linux I2C bus and ADS1115 as described by `config`
    pub fn from_config(config: &CisternConfig) -> Self {
        Self::new(
            Box::new(LinuxI2cDevice::new(&config.bus.device)),
            Box::new(Ads1115::from_config(&config.bus, &config.adc)),
            config.bus.channel,
            config.tank,
        )
        .with_interval(Duration::from_secs(config.poll.interval_secs))
        .with_max_consecutive_read_failures(config.poll.max_consecutive_read_failures)
    }

    /// Delay between cycles
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Read failures in a row before giving up (0 = never)
    pub fn with_max_consecutive_read_failures(mut self, max: u32) -> Self {
        self.max_consecutive_read_failures = max;
        self
    }

    async fn measure(&self, bus: &mut BusHandle) -> AppResult<VolumeMeasurement> {
        let reading = self.adc.read_voltage(bus, self.channel).await?;
        let measurement = estimate(reading, &self.tank);

        if measurement.exceeds(self.tank.max_height) {
            tracing::warn!(
                volts = reading.volts,
                height_m = measurement.height_m(),
                max_height_m = self.tank.max_height,
                "Level above calibrated tank height; check sensor calibration"
            );
        }

        tracing::info!(
            liters = measurement.whole_liters(),
            volts = reading.volts,
            "Liters in cistern"
        );
        Ok(measurement)
    }

    /// Poll until `shutdown` fires, holding the bus open throughout.
    ///
    /// # Errors
    ///
    /// Fails if the bus cannot be opened, or when read failures exceed the configured
    /// limit. Delivery failures never end the loop.
    pub async fn run_continuous(
        &self,
        publisher: &dyn MeasurementPublisher,
        mut shutdown: ShutdownToken,
    ) -> AppResult<CycleReport> {
        let mut bus = bus::open(self.device.as_ref())?;
        let mut report = CycleReport::default();
        let mut consecutive_read_failures = 0u32;

        tracing::info!(
            node = %bus.node().display(),
            adc = self.adc.name(),
            channel = self.channel,
            max_channel = self.adc.max_channel(),
            sink = publisher.name(),
            interval_secs = self.interval.as_secs(),
            "Starting continuous polling"
        );

        while !shutdown.is_triggered() {
            report.cycles += 1;

            match self.measure(&mut bus).await {
                Ok(measurement) => {
                    consecutive_read_failures = 0;
                    match publisher.deliver(&measurement).await {
                        Ok(()) => report.delivered += 1,
                        Err(e) => {
                            report.delivery_failures += 1;
                            tracing::error!(sink = publisher.name(), error = %e, "Error publishing measurement");
                        }
                    }
                }
                Err(e) => {
                    report.read_failures += 1;
                    consecutive_read_failures += 1;

                    let limit = self.max_consecutive_read_failures;
                    let give_up = matches!(e, CisternError::InvalidChannel { .. })
                        || (limit > 0 && consecutive_read_failures >= limit);
                    if give_up {
                        tracing::error!(
                            error = %e,
                            consecutive = consecutive_read_failures,
                            "Giving up on sensor reads"
                        );
                        bus.close();
                        return Err(e);
                    }
                    tracing::warn!(
                        error = %e,
                        consecutive = consecutive_read_failures,
                        "Sensor read failed, retrying next cycle"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(self.interval) => {}
            }
        }

        tracing::info!(
            cycles = report.cycles,
            delivered = report.delivered,
            delivery_failures = report.delivery_failures,
            read_failures = report.read_failures,
            "Polling stopped"
        );
        bus.close();
        Ok(report)
    }

    /// Take one reading, release the bus, then deliver.
    ///
    /// # Errors
    ///
    /// Any bus, conversion or delivery failure.
    pub async fn run_single_shot(
        &self,
        publisher: &dyn MeasurementPublisher,
    ) -> AppResult<VolumeMeasurement> {
        let measurement = {
            let mut bus = bus::open(self.device.as_ref())?;
            let measured = self.measure(&mut bus).await;
            bus.close();
            measured?
        };

        publisher.deliver(&measurement).await?;
        tracing::info!(sink = publisher.name(), liters = measurement.whole_liters(), "Measurement delivered");
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockBusDevice;
    use crate::sink::MemoryPublisher;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    const RAW_1_44_V: i16 = 11_520;

    fn poll_loop(device: &MockBusDevice) -> PollLoop {
        PollLoop::new(
            Box::new(device.clone()),
            Box::new(Ads1115::new(0x48)),
            0,
            TankParams::default(),
        )
    }

    /// Records whether the bus node was still claimed at delivery time
    struct ClaimProbe {
        node: PathBuf,
        claimed_at_delivery: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl MeasurementPublisher for ClaimProbe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn deliver(&self, _measurement: &VolumeMeasurement) -> AppResult<()> {
            let claimed = bus::is_claimed(&self.node);
            if let Ok(mut slot) = self.claimed_at_delivery.lock() {
                *slot = Some(claimed);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_releases_bus_before_delivery() {
        let device = MockBusDevice::new("/dev/test-loop-single");
        device.set_raw_code(RAW_1_44_V);
        let probe = ClaimProbe {
            node: PathBuf::from("/dev/test-loop-single"),
            claimed_at_delivery: Mutex::new(None),
        };

        let measurement = poll_loop(&device)
            .run_single_shot(&probe)
            .await
            .expect("single shot");

        assert_eq!(measurement.whole_liters(), 7363);
        assert_eq!(*probe.claimed_at_delivery.lock().expect("probe"), Some(false));
        assert_eq!(device.opens(), 1);
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_read_failure_releases_once() {
        let device = MockBusDevice::new("/dev/test-loop-single-fail");
        device.fail_next_transfers(1);
        let publisher = MemoryPublisher::new();

        let err = poll_loop(&device)
            .run_single_shot(&publisher)
            .await
            .expect_err("read fails");

        assert!(matches!(err, CisternError::BusIo(_)));
        assert_eq!(device.releases(), 1);
        assert!(!bus::is_claimed(Path::new("/dev/test-loop-single-fail")));
        assert_eq!(publisher.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_delivery_failure_is_fatal() {
        let device = MockBusDevice::new("/dev/test-loop-single-deliver");
        device.set_raw_code(RAW_1_44_V);
        let publisher = MemoryPublisher::new();
        publisher.fail_next(1);

        let err = poll_loop(&device)
            .run_single_shot(&publisher)
            .await
            .expect_err("delivery fails");

        assert!(matches!(err, CisternError::DeliveryFailed { .. }));
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_unavailable_bus() {
        let device = MockBusDevice::new("/dev/test-loop-single-refused");
        device.refuse_connect(true);

        let err = poll_loop(&device)
            .run_single_shot(&MemoryPublisher::new())
            .await
            .expect_err("bus unavailable");
        assert!(matches!(err, CisternError::BusUnavailable { .. }));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_continuous_survives_delivery_failure() {
        let device = MockBusDevice::new("/dev/test-loop-continuous");
        device.set_raw_code(RAW_1_44_V);
        let publisher = MemoryPublisher::new();
        publisher.fail_next(1);
        let (trigger, token) = shutdown_channel();

        let poll = poll_loop(&device).with_interval(Duration::from_secs(30));
        let stopper = async {
            sleep(Duration::from_secs(65)).await;
            assert!(bus::is_claimed(Path::new("/dev/test-loop-continuous")));
            trigger.trigger();
        };
        let (report, ()) = tokio::join!(poll.run_continuous(&publisher, token), stopper);
        let report = report.expect("loop ends cleanly");

        assert_eq!(report.cycles, 3);
        assert_eq!(report.delivery_failures, 1);
        assert_eq!(report.delivered, 2);
        assert_eq!(publisher.attempts(), 3);
        assert_eq!(device.opens(), 1);
        assert_eq!(device.releases(), 1);
        assert!(logs_contain("Error publishing measurement"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_retries_transient_read_failure() {
        let device = MockBusDevice::new("/dev/test-loop-read-retry");
        device.set_raw_code(RAW_1_44_V);
        device.fail_next_transfers(1);
        let publisher = MemoryPublisher::new();
        let (trigger, token) = shutdown_channel();

        let poll = poll_loop(&device).with_interval(Duration::from_secs(10));
        let stopper = async {
            sleep(Duration::from_secs(15)).await;
            trigger.trigger();
        };
        let (report, ()) = tokio::join!(poll.run_continuous(&publisher, token), stopper);
        let report = report.expect("loop ends cleanly");

        assert_eq!(report.read_failures, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(device.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_gives_up_after_repeated_read_failures() {
        let device = MockBusDevice::new("/dev/test-loop-read-giveup");
        device.set_never_ready(true);
        let publisher = MemoryPublisher::new();
        let (_trigger, token) = shutdown_channel();

        let err = poll_loop(&device)
            .with_interval(Duration::from_secs(1))
            .with_max_consecutive_read_failures(3)
            .run_continuous(&publisher, token)
            .await
            .expect_err("gives up");

        assert!(matches!(err, CisternError::ConversionTimeout(_)));
        assert_eq!(device.releases(), 1);
        assert!(!bus::is_claimed(Path::new("/dev/test-loop-read-giveup")));
        assert_eq!(publisher.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_invalid_channel_is_immediately_fatal() {
        let device = MockBusDevice::new("/dev/test-loop-bad-channel");
        let (_trigger, token) = shutdown_channel();
        let poll = PollLoop::new(
            Box::new(device.clone()),
            Box::new(Ads1115::new(0x48)),
            7,
            TankParams::default(),
        );

        let err = poll
            .run_continuous(&MemoryPublisher::new(), token)
            .await
            .expect_err("invalid channel");

        assert!(matches!(err, CisternError::InvalidChannel { channel: 7, .. }));
        assert_eq!(device.transfers(), 0);
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_start_runs_no_cycle() {
        let device = MockBusDevice::new("/dev/test-loop-preempted");
        let publisher = MemoryPublisher::new();
        let (trigger, token) = shutdown_channel();
        trigger.trigger();

        let report = poll_loop(&device)
            .run_continuous(&publisher, token)
            .await
            .expect("clean exit");

        assert_eq!(report, CycleReport::default());
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test]
    async fn test_token_survives_dropped_trigger() {
        let (trigger, mut token) = shutdown_channel();
        drop(trigger);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
        assert!(!token.is_triggered());
    }
}
