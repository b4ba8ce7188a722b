//! `inferno probe` – the sensor pipeline against the simulated ADC.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use inferno_hal::{RtdArray, RtdModel, SimAdc, SAMPLE_PERIOD};
use inferno_runtime::Shutdown;
use inferno_types::ChannelId;

/// How often the display line is refreshed.
pub const DISPLAY_PERIOD: Duration = Duration::from_secs(1);

/// Simulated converter with the given grill and probe resistances.  Probes
/// are assigned in order starting at probe1; missing ones stay unplugged.
pub fn sim_adc(grill_ohms: Option<f64>, probe_ohms: &[f64]) -> SimAdc {
    let mut adc = SimAdc::new();
    if let Some(ohms) = grill_ohms {
        adc.set_resistance(ChannelId::Grill, ohms);
    }
    let probes = ChannelId::ALL.iter().filter(|&&c| c != ChannelId::Grill);
    for (&channel, &ohms) in probes.zip(probe_ohms) {
        adc.set_resistance(channel, ohms);
    }
    adc
}

/// One display line: every channel as `<n>*F` or `Unplg`.
pub fn render(array: &RtdArray) -> String {
    ChannelId::ALL
        .iter()
        .map(|&channel| format!("{channel}: {}", array.reading(channel)))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Sample at the pipeline period and print [`render`] once per second until
/// `seconds` have passed or `shutdown` fires.
pub async fn run(adc: SimAdc, model: RtdModel, seconds: Option<u64>, shutdown: Shutdown) {
    let array = Arc::new(RtdArray::new(model));
    let sampler = tokio::spawn(array.clone().run_sampling(adc, SAMPLE_PERIOD, {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    }));

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + DISPLAY_PERIOD,
        DISPLAY_PERIOD,
    );
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            now = ticker.tick() => {
                println!("  {}", render(&array).bold());
                if deadline.is_some_and(|d| now >= d) {
                    break;
                }
            }
        }
    }

    sampler.abort();
    println!(
        "  {} {} non-physical sample(s) rejected",
        "✓".green(),
        array.rejected_samples()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_shows_readings_and_unplugged_channels() {
        let array = RtdArray::default();
        assert_eq!(
            render(&array),
            "grill: Unplg  probe1: Unplg  probe2: Unplg  probe3: Unplg  probe4: Unplg"
        );

        let mut adc = sim_adc(Some(1373.0), &[1208.0]);
        array.sample(&mut adc);
        let line = render(&array);
        assert!(line.starts_with("grill: 207*F  probe1: 129*F"), "{line}");
        assert!(line.ends_with("probe2: Unplg  probe3: Unplg  probe4: Unplg"), "{line}");
    }

    #[test]
    fn probes_are_assigned_in_order() {
        let array = RtdArray::default();
        let mut adc = sim_adc(None, &[1008.0, 1100.0]);
        array.sample(&mut adc);
        assert!(!array.reading(ChannelId::Grill).is_available());
        assert!(array.reading(ChannelId::Probe1).is_available());
        assert!(array.reading(ChannelId::Probe2).is_available());
        assert!(!array.reading(ChannelId::Probe3).is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_after_the_requested_seconds() {
        let (_trigger, shutdown) = Shutdown::new();
        let start = tokio::time::Instant::now();
        run(sim_adc(Some(1373.0), &[]), RtdModel::default(), Some(3), shutdown).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
