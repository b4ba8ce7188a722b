//! `inferno-hal` – RTD sensing
//!
//! Samples the smoker's resistance-temperature detectors and turns raw ADC
//! codes into calibrated, smoothed temperatures.
//!
//! # Modules
//!
//! - [`adc`] – [`AnalogInput`][adc::AnalogInput]: the trait every ADC driver
//!   implements.  The rest of the crate only talks to the trait.
//! - [`rtd`] – voltage-divider resistance model and the
//!   [`RtdModel`][rtd::RtdModel] resistance-to-temperature conversions
//!   (Steinhart–Hart, Callendar–Van Dusen).
//! - [`channel`] – [`RtdChannel`][channel::RtdChannel]: a bounded sliding
//!   window of resistances with a smoothed [`Reading`][channel::Reading].
//! - [`array`] – [`RtdArray`][array::RtdArray]: the five smoker channels and
//!   the fixed-period sampling loop.
//! - [`sim`] – [`SimAdc`][sim::SimAdc]: an in-process ADC for bench runs and
//!   tests without hardware.

pub mod adc;
pub mod array;
pub mod channel;
pub mod rtd;
pub mod sim;

pub use adc::AnalogInput;
pub use array::{RtdArray, SampleReport, SAMPLE_PERIOD};
pub use channel::{Reading, RtdChannel, SampleError, SampleOutcome, WINDOW_CAPACITY};
pub use rtd::{RtdModel, SteinhartHart};
pub use sim::SimAdc;
