//! In-process ADC simulation for bench runs and tests without hardware.
//!
//! [`SimAdc`] returns the code a real divider would produce for a configured
//! probe resistance.  Inputs with no configured resistance read as open
//! circuit, exactly like an empty probe jack.
//!
//! # Example
//!
//! ```rust
//! use inferno_hal::{AnalogInput, SimAdc};
//! use inferno_types::ChannelId;
//!
//! let mut adc = SimAdc::new().with_resistance(ChannelId::Grill, 1008.0);
//! assert!(adc.read(0).unwrap() > 0);
//! assert_eq!(adc.read(1).unwrap(), 0); // unplugged
//! ```

use std::collections::{HashMap, HashSet};

use inferno_types::{ChannelId, InfernoError};

use crate::adc::AnalogInput;
use crate::rtd::{code_from_resistance, UNPLUGGED_CODE};

/// A simulated 10-bit converter with one probe resistance per input.
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    resistances: HashMap<u8, f64>,
    failing: HashSet<u8>,
}

impl SimAdc {
    /// Create a converter with every input open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a probe of `ohms` to `channel`.
    pub fn with_resistance(mut self, channel: ChannelId, ohms: f64) -> Self {
        self.set_resistance(channel, ohms);
        self
    }

    /// Make every conversion on `channel` fail.
    pub fn with_failing_input(mut self, channel: ChannelId) -> Self {
        self.failing.insert(channel.adc_input());
        self
    }

    pub fn set_resistance(&mut self, channel: ChannelId, ohms: f64) {
        self.resistances.insert(channel.adc_input(), ohms);
    }

    /// Remove the probe from `channel`.
    pub fn unplug(&mut self, channel: ChannelId) {
        self.resistances.remove(&channel.adc_input());
    }
}

impl AnalogInput for SimAdc {
    fn id(&self) -> &str {
        "sim"
    }

    fn read(&mut self, input: u8) -> Result<u16, InfernoError> {
        if self.failing.contains(&input) {
            return Err(InfernoError::Sensor {
                channel: input.to_string(),
                details: "simulated conversion failure".to_string(),
            });
        }
        Ok(self
            .resistances
            .get(&input)
            .map_or(UNPLUGGED_CODE, |&ohms| code_from_resistance(ohms)))
    }
}
