//! [`TelemetryPublisher`] – the outbound telemetry loop.
//!
//! While the link is `Connected` the publisher polls the local controller,
//! stamps the status with the device id and send time, and publishes it.
//! Every failure is retried after a fixed delay, forever; the failure class
//! only changes how loudly it is logged.

use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use inferno_middleware::{is_network_chain, ConnectionManager, Message, Shutdown, TransportError};
use inferno_types::SmokerStatus;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::controller::{ControllerError, StatusSource};

/// Default wait between two published samples.
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait before retrying a failed step.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The publisher's inter-sample wait, adjustable while the loop runs.
#[derive(Debug)]
pub struct TelemetryInterval {
    secs: AtomicU64,
}

impl TelemetryInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            secs: AtomicU64::new(interval.as_secs().max(1)),
        }
    }

    pub fn get(&self) -> Duration {
        Duration::from_secs(self.secs.load(Ordering::Relaxed))
    }

    pub fn secs(&self) -> u64 {
        self.secs.load(Ordering::Relaxed)
    }

    /// Replace the interval.  Takes effect at the next inter-sample wait.
    pub fn set_secs(&self, secs: u64) {
        self.secs.store(secs, Ordering::Relaxed);
    }
}

impl Default for TelemetryInterval {
    fn default() -> Self {
        Self::new(DEFAULT_TELEMETRY_INTERVAL)
    }
}

/// A failed step of one publish cycle.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to fetch controller status: {0}")]
    Status(#[from] ControllerError),
    #[error("failed to serialize telemetry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish telemetry: {0}")]
    Send(#[from] TransportError),
    #[error("publish cancelled by shutdown")]
    Cancelled,
}

/// How a publish failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The endpoint reported a transient fault.
    TransientBroker,
    /// A networking fault anywhere in the cause chain.
    Network,
    /// Anything else.  Still retried.
    Unexpected,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::TransientBroker => "transient",
            FailureClass::Network => "network",
            FailureClass::Unexpected => "unexpected",
        }
    }
}

/// Classify `err` by walking its cause chain.
pub fn classify(err: &(dyn StdError + 'static)) -> FailureClass {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<TransportError>()
            .is_some_and(TransportError::is_transient)
        {
            return FailureClass::TransientBroker;
        }
        current = e.source();
    }

    if is_network_chain(err) || has_reqwest_network_error(err) {
        FailureClass::Network
    } else {
        FailureClass::Unexpected
    }
}

fn has_reqwest_network_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(r) = e.downcast_ref::<reqwest::Error>() {
            if r.is_connect() || r.is_timeout() {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Static settings of the publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub device_id: String,
    pub retry_delay: Duration,
    /// Time-to-live stamped on each record; omitted when `None`.
    pub time_to_live: Option<u64>,
}

/// Outbound telemetry loop.
pub struct TelemetryPublisher {
    source: Arc<dyn StatusSource>,
    link: Arc<ConnectionManager>,
    interval: Arc<TelemetryInterval>,
    config: PublisherConfig,
}

impl TelemetryPublisher {
    pub fn new(
        source: Arc<dyn StatusSource>,
        link: Arc<ConnectionManager>,
        interval: Arc<TelemetryInterval>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            source,
            link,
            interval,
            config,
        }
    }

    /// Fetch, stamp and serialize one snapshot.
    async fn build_message(&self) -> Result<(SmokerStatus, Message), PublishError> {
        let status = self.source.status().await?;
        let record = SmokerStatus::stamp(
            &self.config.device_id,
            status,
            Utc::now(),
            self.config.time_to_live,
        );
        let body = serde_json::to_string(&record)?;
        Ok((record, Message::json(body)))
    }

    /// Wait for `Connected`.  Returns `false` on shutdown.
    async fn until_connected(&self, shutdown: &Shutdown) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = self.link.wait_connected() => true,
        }
    }

    /// Build one snapshot and publish it, retrying the send until it
    /// succeeds.
    ///
    /// Returns the number of retries the send needed.
    ///
    /// # Errors
    ///
    /// A failed status fetch or serialization ends the cycle with an error;
    /// the caller decides when to try again.  [`PublishError::Cancelled`] on
    /// shutdown.
    pub async fn publish_once(&self, shutdown: &Shutdown) -> Result<u32, PublishError> {
        let (record, message) = self.build_message().await?;
        info!(summary = %record.summary(), "publishing telemetry");

        let mut retries = 0u32;
        let mut unexpected = 0u32;
        loop {
            if !self.until_connected(shutdown).await {
                return Err(PublishError::Cancelled);
            }
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return Err(PublishError::Cancelled),
                result = self.link.send_event(message.clone()) => result,
            };
            match attempt {
                Ok(()) => {
                    debug!(message_id = %message.id(), retries, "telemetry published");
                    return Ok(retries);
                }
                Err(e) => {
                    let err = PublishError::Send(e);
                    self.log_failure(&err, &mut unexpected);
                }
            }
            retries += 1;
            if !shutdown.sleep(self.config.retry_delay).await {
                return Err(PublishError::Cancelled);
            }
        }
    }

    fn log_failure(&self, err: &PublishError, unexpected: &mut u32) {
        let class = classify(err);
        let delay_secs = self.config.retry_delay.as_secs();
        match class {
            FailureClass::TransientBroker | FailureClass::Network => {
                *unexpected = 0;
                warn!(class = class.as_str(), error = %err, delay_secs, "telemetry step failed; retrying");
            }
            FailureClass::Unexpected => {
                *unexpected += 1;
                error!(
                    class = class.as_str(),
                    consecutive = *unexpected,
                    error = %err,
                    delay_secs,
                    "unexpected telemetry failure; retrying"
                );
            }
        }
    }

    /// Publish until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            device_id = %self.config.device_id,
            interval_secs = self.interval.secs(),
            "telemetry publisher started"
        );
        let mut unexpected = 0u32;
        loop {
            if !self.until_connected(&shutdown).await {
                break;
            }
            match self.publish_once(&shutdown).await {
                Ok(_) => {
                    unexpected = 0;
                    if !shutdown.sleep(self.interval.get()).await {
                        break;
                    }
                }
                Err(PublishError::Cancelled) => break,
                Err(e) => {
                    self.log_failure(&e, &mut unexpected);
                    if !shutdown.sleep(self.config.retry_delay).await {
                        break;
                    }
                }
            }
        }
        info!("telemetry publisher stopped");
    }
}
