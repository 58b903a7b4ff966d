//! Measurement sinks implementing [`MeasurementPublisher`].

pub mod database;
pub mod memory;
pub mod mqtt;

pub use database::DatabaseWriter;
pub use memory::MemoryPublisher;
pub use mqtt::{MqttPublisher, VolumeMessage};

use crate::config::{CisternConfig, SinkKind};
use crate::error::AppResult;
use crate::traits::MeasurementPublisher;

/// Build the publisher selected by `config.sink`
pub fn build_publisher(config: &CisternConfig) -> AppResult<Box<dyn MeasurementPublisher>> {
    Ok(match config.sink {
        SinkKind::Mqtt => Box::new(MqttPublisher::new(config.mqtt_config()?)?),
        SinkKind::Database => Box::new(DatabaseWriter::new(config.database_config()?)?),
    })
}
