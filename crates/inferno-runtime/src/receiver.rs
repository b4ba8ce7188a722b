//! Cloud-to-device message loop.
//!
//! Messages carry no commands the device acts on; they are logged and
//! acknowledged so the endpoint stops redelivering them.

use std::sync::Arc;
use std::time::Duration;

use inferno_middleware::{ConnectionManager, Shutdown};
use tracing::{debug, info, warn};

/// Default wait for one cloud-to-device message.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudToDeviceReceiver {
    link: Arc<ConnectionManager>,
    timeout: Duration,
    retry_delay: Duration,
}

impl CloudToDeviceReceiver {
    pub fn new(link: Arc<ConnectionManager>, timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            link,
            timeout,
            retry_delay,
        }
    }

    /// Receive, log and complete messages until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        info!(timeout_secs = self.timeout.as_secs(), "cloud-to-device receiver started");
        loop {
            let connected = tokio::select! {
                _ = shutdown.cancelled() => false,
                _ = self.link.wait_connected() => true,
            };
            if !connected {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.link.receive(self.timeout) => received,
            };
            match received {
                Ok(None) => debug!("no cloud-to-device message before timeout"),
                Ok(Some(message)) => {
                    info!(
                        message_id = %message.id(),
                        body = %message.body_text(),
                        properties = ?message.properties(),
                        "received cloud-to-device message"
                    );
                    if let Err(e) = self.link.complete(message.id()).await {
                        warn!(message_id = %message.id(), error = %e, "failed to complete message");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cloud-to-device receive failed");
                    if !shutdown.sleep(self.retry_delay).await {
                        break;
                    }
                }
            }
        }
        info!("cloud-to-device receiver stopped");
    }
}
