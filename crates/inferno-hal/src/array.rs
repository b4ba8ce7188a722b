//! [`RtdArray`] – the smoker's five RTD channels and their sampling loop.
//!
//! [`RtdArray::run_sampling`] reads every channel once per period and folds
//! the codes into the per-channel windows.  Readers call
//! [`RtdArray::temps`] or [`RtdArray::reading`] at any time; they only ever
//! observe complete samples because the windows sit behind a mutex that the
//! loop holds for the duration of one sample.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use inferno_types::{ChannelId, Temps};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adc::AnalogInput;
use crate::channel::{Reading, RtdChannel, SampleOutcome};
use crate::rtd::RtdModel;

/// Fixed sampling period of the background loop.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(10);

/// Tally of one [`RtdArray::sample`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleReport {
    pub accepted: usize,
    pub unplugged: usize,
    pub rejected: usize,
    pub read_errors: usize,
}

/// The five smoker channels.
pub struct RtdArray {
    channels: Mutex<Vec<RtdChannel>>,
}

impl RtdArray {
    /// Create an array with one empty channel per [`ChannelId`].
    pub fn new(model: RtdModel) -> Self {
        let channels = ChannelId::ALL
            .iter()
            .map(|&id| RtdChannel::new(id, model))
            .collect();
        Self {
            channels: Mutex::new(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RtdChannel>> {
        // A panic mid-sample leaves at worst one partially updated window,
        // which is still a valid window.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read every channel once and fold the codes into the windows.
    ///
    /// A failed conversion or a non-physical code only affects that one
    /// channel for this pass.
    pub fn sample(&self, adc: &mut dyn AnalogInput) -> SampleReport {
        let mut report = SampleReport::default();
        let mut channels = self.lock();
        for channel in channels.iter_mut() {
            let id = channel.id();
            let code = match adc.read(id.adc_input()) {
                Ok(code) => code,
                Err(e) => {
                    debug!(channel = %id, error = %e, "ADC read failed; skipping sample");
                    report.read_errors += 1;
                    continue;
                }
            };
            match channel.record(code) {
                Ok(SampleOutcome::Accepted { .. }) => report.accepted += 1,
                Ok(SampleOutcome::Unplugged) => report.unplugged += 1,
                Err(e) => {
                    debug!(channel = %id, error = %e, "rejected sample");
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Current smoothed reading of `channel`.
    pub fn reading(&self, channel: ChannelId) -> Reading {
        self.lock()
            .iter()
            .find(|c| c.id() == channel)
            .map_or(Reading::Unavailable, RtdChannel::reading)
    }

    /// Current readings of every channel in wire form.
    pub fn temps(&self) -> Temps {
        let mut temps = Temps::unavailable();
        for channel in self.lock().iter() {
            temps.set(channel.id(), channel.reading().to_wire());
        }
        temps
    }

    /// Number of samples in `channel`'s window.
    pub fn window_len(&self, channel: ChannelId) -> usize {
        self.lock()
            .iter()
            .find(|c| c.id() == channel)
            .map_or(0, RtdChannel::len)
    }

    /// Total non-physical samples rejected across all channels.
    pub fn rejected_samples(&self) -> u64 {
        self.lock().iter().map(RtdChannel::rejected).sum()
    }

    /// Sample every `period` until `cancelled` resolves.
    ///
    /// The loop never fails: conversion errors and rejected samples are
    /// logged at `debug` and a `warn` is emitted when every channel failed
    /// to convert, which usually means the converter itself is gone.
    pub async fn run_sampling<A, F>(self: Arc<Self>, mut adc: A, period: Duration, cancelled: F)
    where
        A: AnalogInput,
        F: Future<Output = ()>,
    {
        info!(adc = adc.id(), period_ms = period.as_millis() as u64, "RTD sampling started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                _ = &mut cancelled => break,
                _ = ticker.tick() => {
                    let report = self.sample(&mut adc);
                    if report.read_errors == ChannelId::ALL.len() {
                        warn!(adc = adc.id(), "every ADC conversion failed in this period");
                    }
                }
            }
        }
        info!(adc = adc.id(), "RTD sampling stopped");
    }
}

impl Default for RtdArray {
    fn default() -> Self {
        Self::new(RtdModel::default())
    }
}
