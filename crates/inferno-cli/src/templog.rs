//! `inferno templog` – CSV temperature log from the controller status.

use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inferno_runtime::{Shutdown, StatusSource};
use inferno_types::ControllerStatus;
use tracing::warn;

pub const HEADER: &str = "Timestamp,Setpoint,Grill,Probe1,Probe2,Probe3,Probe4";

/// One CSV row.  The controller's own timestamp is preferred; `polled_at`
/// stands in when the status carries none.
pub fn row(status: &ControllerStatus, polled_at: DateTime<Utc>) -> String {
    let t = &status.temps;
    format!(
        "{},{},{},{},{},{},{}",
        status.current_time.unwrap_or(polled_at).to_rfc3339(),
        status.set_point,
        t.grill_temp,
        t.probe1_temp,
        t.probe2_temp,
        t.probe3_temp,
        t.probe4_temp,
    )
}

/// Print [`HEADER`] and then one row per poll until `shutdown` fires.  A
/// failed poll is logged and skipped.
pub async fn run<W: Write>(
    source: &dyn StatusSource,
    interval: Duration,
    out: &mut W,
    shutdown: Shutdown,
) -> std::io::Result<()> {
    writeln!(out, "{HEADER}")?;
    loop {
        match source.status().await {
            Ok(status) => {
                writeln!(out, "{}", row(&status, Utc::now()))?;
                out.flush()?;
            }
            Err(e) => warn!(error = %e, "status poll failed"),
        }
        if !shutdown.sleep(interval).await {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use inferno_runtime::ControllerError;
    use inferno_types::{SmokerMode, Temps, UNAVAILABLE_TEMP};

    fn status(current_time: Option<DateTime<Utc>>) -> ControllerStatus {
        let mut temps = Temps::unavailable();
        temps.grill_temp = 224.0;
        temps.probe1_temp = 165.0;
        ControllerStatus {
            set_point: 225,
            mode: SmokerMode::Named("Smoke".into()),
            temps,
            current_time,
        }
    }

    #[test]
    fn row_matches_the_header_columns() {
        let at = Utc.with_ymd_and_hms(2024, 7, 4, 12, 30, 0).unwrap();
        let line = row(&status(Some(at)), Utc::now());
        assert_eq!(line, "2024-07-04T12:30:00+00:00,225,224,165,-1,-1,-1");
        assert_eq!(line.split(',').count(), HEADER.split(',').count());
    }

    #[test]
    fn row_falls_back_to_the_poll_time() {
        let polled = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let line = row(&status(None), polled);
        assert!(line.starts_with("2024-01-02T03:04:05+00:00,225,"), "{line}");
        assert!(line.ends_with(&format!(",{UNAVAILABLE_TEMP}")));
    }

    struct Flaky {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl StatusSource for Flaky {
        async fn status(&self) -> Result<ControllerStatus, ControllerError> {
            if self.polls.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(ControllerError::BadResponse("busy".into()))
            } else {
                Ok(status(None))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_interval_and_skips_failures() {
        let source = Flaky {
            polls: AtomicUsize::new(0),
        };
        let (trigger, shutdown) = Shutdown::new();
        let mut out = Vec::new();

        let stop = async {
            // Polls at 0 s, 5 s and 10 s; the one at 5 s fails.
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.trigger();
        };
        let (result, ()) = tokio::join!(
            run(&source, Duration::from_secs(5), &mut out, shutdown),
            stop
        );
        result.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.len(), 3);
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
    }
}
