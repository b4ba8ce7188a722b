//! Generic `AnalogInput` trait for multi-channel analog-to-digital converters.
//!
//! The smoker board uses a 10-bit, 8-input SPI converter, but the sensing
//! pipeline only ever talks to this trait so drivers can be swapped (or
//! simulated) without touching the conversion math.

use inferno_types::InfernoError;

/// Largest code a 10-bit converter can return.
pub const ADC_MAX_CODE: u16 = 1023;

/// A multi-input analog-to-digital converter.
pub trait AnalogInput: Send {
    /// Stable identifier for this converter, e.g. `"spi0.0"`.
    fn id(&self) -> &str;

    /// Perform one single-ended conversion on `input` and return the raw
    /// code (`0..=ADC_MAX_CODE` for a healthy driver).
    ///
    /// # Errors
    ///
    /// Returns [`InfernoError::Sensor`] if the conversion cannot be performed.
    fn read(&mut self, input: u8) -> Result<u16, InfernoError>;
}
