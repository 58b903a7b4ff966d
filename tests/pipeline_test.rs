//! End-to-end measurement pipeline on the mock bus.
//!
//! Mock ADS1115 -> estimator -> in-memory sink, in both loop shapes.

use cistern_monitor::hardware::{bus, MockBusDevice};
use cistern_monitor::instrument::{Ads1115, Gain};
use cistern_monitor::sink::MemoryPublisher;
use cistern_monitor::{shutdown_channel, CisternError, PollLoop, TankParams};
use std::path::Path;
use std::time::Duration;

/// Raw code for 1.44 V at +/-4.096 V full scale
const RAW_1_44_V: i16 = 11_520;

fn pipeline(device: &MockBusDevice, adc: Ads1115) -> PollLoop {
    PollLoop::new(Box::new(device.clone()), Box::new(adc), 0, TankParams::default())
        .with_interval(Duration::from_secs(30))
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_half_full_tank() {
    let device = MockBusDevice::new("/dev/pipeline-half");
    device.set_raw_code(RAW_1_44_V);
    device.set_ready_after_polls(3);
    let publisher = MemoryPublisher::new();

    let measurement = pipeline(&device, Ads1115::new(0x48))
        .run_single_shot(&publisher)
        .await
        .expect("measurement");

    assert_eq!(measurement.whole_liters(), 7363);
    assert!((measurement.height_m() - 1.5).abs() < 1e-9);
    assert_eq!(device.last_config().map(|c| c & 0x7fff), Some(0x4383));

    let delivered = publisher.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].whole_liters(), 7363);
    assert!(!bus::is_claimed(Path::new("/dev/pipeline-half")));
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_empty_tank_reports_zero() {
    let device = MockBusDevice::new("/dev/pipeline-empty");
    device.set_raw_code(0);
    let publisher = MemoryPublisher::new();

    let measurement = pipeline(&device, Ads1115::new(0x48))
        .run_single_shot(&publisher)
        .await
        .expect("measurement");

    assert_eq!(measurement.whole_liters(), 0);
    assert_eq!(measurement.liters(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_gain_changes_scaling() {
    let device = MockBusDevice::new("/dev/pipeline-gain");
    // 1.44 V at +/-2.048 V full scale
    device.set_raw_code(23_040);

    let measurement = pipeline(&device, Ads1115::new(0x48).with_gain(Gain::Two))
        .run_single_shot(&MemoryPublisher::new())
        .await
        .expect("measurement");

    assert_eq!(measurement.whole_liters(), 7363);
}

#[tokio::test(start_paused = true)]
async fn test_second_open_is_refused_while_loop_runs() {
    let device = MockBusDevice::new("/dev/pipeline-busy");
    device.set_raw_code(RAW_1_44_V);
    let publisher = MemoryPublisher::new();
    let (trigger, token) = shutdown_channel();

    let running = pipeline(&device, Ads1115::new(0x48));
    let intruder = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let err = bus::open(&device).expect_err("bus is held by the loop");
        assert!(matches!(err, CisternError::BusUnavailable { .. }));
        trigger.trigger();
    };

    let (report, ()) = tokio::join!(running.run_continuous(&publisher, token), intruder);
    let report = report.expect("clean shutdown");

    assert_eq!(report.cycles, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(device.opens(), 1);
    assert_eq!(device.releases(), 1);

    // Released: a fresh single shot can claim it again.
    pipeline(&device, Ads1115::new(0x48))
        .run_single_shot(&publisher)
        .await
        .expect("bus free after shutdown");
    assert_eq!(publisher.delivered().len(), 2);
}
