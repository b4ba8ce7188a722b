//! [`RtdChannel`] – one probe's sliding window of resistances.
//!
//! Each accepted sample's resistance is appended to a FIFO window of at most
//! [`WINDOW_CAPACITY`] entries.  The channel's temperature is the calibration
//! model applied to the window mean, rounded to whole degrees Fahrenheit.
//!
//! Averaging resistances rather than temperatures keeps a single noisy code
//! from dominating, and makes insertion order irrelevant to the result.

use std::collections::VecDeque;
use std::fmt;

use inferno_types::{ChannelId, UNAVAILABLE_TEMP};
use thiserror::Error;

use crate::rtd::{resistance_from_code, RtdModel, UNPLUGGED_CODE};

/// Number of resistances kept per channel (one second at the 10 ms period).
pub const WINDOW_CAPACITY: usize = 100;

/// Placeholder shown by displays and logs for a channel without a reading.
pub const UNPLUGGED_LABEL: &str = "Unplg";

/// Smoothed temperature of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// Whole degrees Fahrenheit.
    Fahrenheit(i32),
    /// The most recent sample was the open-circuit code: no probe attached.
    NotConnected,
    /// No samples yet, or the window mean is outside the model's domain.
    Unavailable,
}

impl Reading {
    /// Value used in the controller's JSON: the temperature, or
    /// [`UNAVAILABLE_TEMP`] when there is none.
    pub fn to_wire(self) -> f64 {
        match self {
            Reading::Fahrenheit(f) => f64::from(f),
            Reading::NotConnected | Reading::Unavailable => UNAVAILABLE_TEMP,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Reading::Fahrenheit(_))
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Fahrenheit(t) => write!(f, "{t}*F"),
            Reading::NotConnected | Reading::Unavailable => f.write_str(UNPLUGGED_LABEL),
        }
    }
}

/// A sample that could not be incorporated into the window.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SampleError {
    #[error("raw code {0} does not map to a physical resistance")]
    NonPhysical(u16),
}

/// What happened to a sample that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    Accepted { ohms: f64 },
    Unplugged,
}

/// One RTD input with its bounded resistance window.
#[derive(Debug, Clone)]
pub struct RtdChannel {
    id: ChannelId,
    model: RtdModel,
    window: VecDeque<f64>,
    capacity: usize,
    unplugged: bool,
    rejected: u64,
}

impl RtdChannel {
    /// Create an empty channel with the default window capacity.
    pub fn new(id: ChannelId, model: RtdModel) -> Self {
        Self::with_capacity(id, model, WINDOW_CAPACITY)
    }

    /// Create an empty channel holding at most `capacity` resistances.
    ///
    /// A zero capacity is raised to one.
    pub fn with_capacity(id: ChannelId, model: RtdModel, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            model,
            window: VecDeque::with_capacity(capacity),
            capacity,
            unplugged: false,
            rejected: 0,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Fold one raw ADC code into the channel.
    ///
    /// The open-circuit code clears the window and marks the channel
    /// unplugged until the next valid sample.  Codes that do not map to a
    /// positive, finite resistance are counted and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::NonPhysical`] for a rejected code.
    pub fn record(&mut self, code: u16) -> Result<SampleOutcome, SampleError> {
        if code == UNPLUGGED_CODE {
            self.window.clear();
            self.unplugged = true;
            return Ok(SampleOutcome::Unplugged);
        }
        let Some(ohms) = resistance_from_code(code) else {
            self.rejected += 1;
            return Err(SampleError::NonPhysical(code));
        };
        self.push_resistance(ohms);
        Ok(SampleOutcome::Accepted { ohms })
    }

    /// Append a resistance, evicting the oldest entry once the window is full.
    pub fn push_resistance(&mut self, ohms: f64) {
        while self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(ohms);
        self.unplugged = false;
    }

    /// Mean of the window, or `None` when it is empty.
    pub fn mean_resistance(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    /// Current smoothed reading.
    pub fn reading(&self) -> Reading {
        if self.unplugged {
            return Reading::NotConnected;
        }
        self.mean_resistance()
            .and_then(|ohms| self.model.fahrenheit(ohms))
            .map_or(Reading::Unavailable, |f| Reading::Fahrenheit(f.round() as i32))
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Number of samples rejected as non-physical since creation.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtd::code_from_resistance;

    fn channel() -> RtdChannel {
        RtdChannel::new(ChannelId::Grill, RtdModel::default())
    }

    #[test]
    fn empty_channel_is_unavailable() {
        let ch = channel();
        assert_eq!(ch.reading(), Reading::Unavailable);
        assert_eq!(ch.reading().to_wire(), UNAVAILABLE_TEMP);
        assert_eq!(ch.reading().to_string(), "Unplg");
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut ch = channel();
        for i in 0..250u16 {
            ch.record(400 + (i % 50)).unwrap();
            assert!(ch.len() <= WINDOW_CAPACITY);
        }
        assert_eq!(ch.len(), WINDOW_CAPACITY);
    }

    #[test]
    fn window_keeps_most_recent_samples() {
        let mut ch = RtdChannel::with_capacity(ChannelId::Probe1, RtdModel::default(), 3);
        for ohms in [1.0, 2.0, 3.0, 4.0, 5.0] {
            ch.push_resistance(ohms);
        }
        assert_eq!(ch.len(), 3);
        assert_eq!(ch.mean_resistance(), Some(4.0));
    }

    #[test]
    fn constant_mid_scale_code_reads_near_freezing() {
        let mut ch = channel();
        for _ in 0..WINDOW_CAPACITY {
            ch.record(512).unwrap();
        }
        match ch.reading() {
            Reading::Fahrenheit(f) => assert!((f - 32).abs() <= 4, "got {f}"),
            other => panic!("expected a temperature, got {other:?}"),
        }
    }

    #[test]
    fn reading_is_rounded_to_whole_degrees() {
        let mut ch = channel();
        ch.push_resistance(1208.0);
        // 53.4 °C = 128.12 °F
        assert_eq!(ch.reading(), Reading::Fahrenheit(128));
        assert_eq!(ch.reading().to_string(), "128*F");
    }

    #[test]
    fn unplugged_code_reports_not_connected() {
        let mut ch = channel();
        ch.record(code_from_resistance(1100.0)).unwrap();
        assert_eq!(ch.record(UNPLUGGED_CODE).unwrap(), SampleOutcome::Unplugged);
        assert_eq!(ch.reading(), Reading::NotConnected);
        assert!(ch.is_empty());

        ch.record(code_from_resistance(1100.0)).unwrap();
        assert!(ch.reading().is_available());
    }

    #[test]
    fn non_physical_sample_is_skipped_and_counted() {
        let mut ch = channel();
        ch.record(512).unwrap();
        assert_eq!(ch.record(1023), Err(SampleError::NonPhysical(1023)));
        assert_eq!(ch.record(5000), Err(SampleError::NonPhysical(5000)));
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.rejected(), 2);
        assert!(ch.reading().is_available());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut ch = RtdChannel::with_capacity(ChannelId::Probe4, RtdModel::default(), 0);
        ch.push_resistance(1000.0);
        ch.push_resistance(1100.0);
        assert_eq!(ch.len(), 1);
    }
}
