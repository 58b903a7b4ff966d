//! Converter drivers implementing [`Adc`](crate::traits::Adc).

pub mod ads1115;

pub use ads1115::{Ads1115, DataRate, Gain};
