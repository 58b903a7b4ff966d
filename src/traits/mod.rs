//! Hardware-agnostic seams of the measurement pipeline
//!
//! The poll loop only sees these traits, so converters and sinks can be swapped
//! (or replaced by test doubles) without touching it.

pub mod adc;
pub mod publisher;

pub use self::adc::Adc;
pub use self::publisher::MeasurementPublisher;
