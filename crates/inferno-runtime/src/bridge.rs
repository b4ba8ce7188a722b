//! [`Bridge`] – wires the connection manager, publisher, dispatcher and
//! receiver together and runs them until shutdown.
//!
//! Startup order:
//!
//! 1. build the command table and the [`ConnectionManager`] around it;
//! 2. start the status supervisor;
//! 3. open the first client (a refused method registration aborts startup,
//!    any other failure is logged and retried by the connection manager);
//! 4. start the telemetry publisher and the cloud-to-device receiver.

use std::sync::Arc;
use std::time::Duration;

use inferno_middleware::{
    ConnectionError, ConnectionManager, ConnectionOptions, CredentialQueue, Shutdown,
    TransportFactory, DEFAULT_OPERATION_TIMEOUT,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::controller::SmokerController;
use crate::dispatcher::CommandDispatcher;
use crate::publisher::{
    PublisherConfig, TelemetryInterval, TelemetryPublisher, DEFAULT_RETRY_DELAY,
    DEFAULT_TELEMETRY_INTERVAL,
};
use crate::receiver::{CloudToDeviceReceiver, DEFAULT_RECEIVE_TIMEOUT};

/// Settings of one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device_id: String,
    pub telemetry_interval: Duration,
    pub retry_delay: Duration,
    pub operation_timeout: Duration,
    pub receive_timeout: Duration,
    pub time_to_live: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_id: "inferno1".to_string(),
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            time_to_live: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Direct methods could not be registered; the bridge cannot serve
    /// commands and refuses to start.
    #[error("startup failed: {0}")]
    Startup(#[source] ConnectionError),

    #[error("bridge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The device-cloud bridge.
pub struct Bridge {
    config: BridgeConfig,
    link: Arc<ConnectionManager>,
    controller: Arc<dyn SmokerController>,
    interval: Arc<TelemetryInterval>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        credentials: CredentialQueue,
        factory: Arc<dyn TransportFactory>,
        controller: Arc<dyn SmokerController>,
    ) -> Self {
        let interval = Arc::new(TelemetryInterval::new(config.telemetry_interval));
        let dispatcher = Arc::new(CommandDispatcher::new(controller.clone(), interval.clone()));
        let link = Arc::new(ConnectionManager::new(
            credentials,
            factory,
            dispatcher.method_table(),
            ConnectionOptions {
                operation_timeout: config.operation_timeout,
                retry_delay: config.retry_delay,
            },
        ));
        Self {
            config,
            link,
            controller,
            interval,
        }
    }

    /// The connection manager, for status reporting.
    pub fn link(&self) -> &Arc<ConnectionManager> {
        &self.link
    }

    pub fn interval(&self) -> &Arc<TelemetryInterval> {
        &self.interval
    }

    /// Run until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Startup`] when the command table cannot be installed,
    /// [`BridgeError::Task`] when a background task panicked.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), BridgeError> {
        info!(
            device_id = %self.config.device_id,
            credentials = ?self.link.credentials_snapshot(),
            "starting bridge"
        );

        let supervisor = tokio::spawn({
            let link = self.link.clone();
            let shutdown = shutdown.clone();
            async move { link.run(shutdown).await }
        });

        match self.link.initialize_client().await {
            Ok(()) => {}
            Err(e @ ConnectionError::Registration { .. }) => {
                error!(error = %e, "cannot register direct methods");
                supervisor.abort();
                return Err(BridgeError::Startup(e));
            }
            Err(e) => warn!(error = %e, "initial connection failed; the link retries on its own"),
        }

        let publisher = TelemetryPublisher::new(
            self.controller.clone(),
            self.link.clone(),
            self.interval.clone(),
            PublisherConfig {
                device_id: self.config.device_id.clone(),
                retry_delay: self.config.retry_delay,
                time_to_live: self.config.time_to_live,
            },
        );
        let receiver = CloudToDeviceReceiver::new(
            self.link.clone(),
            self.config.receive_timeout,
            self.config.retry_delay,
        );

        let publisher = tokio::spawn(publisher.run(shutdown.clone()));
        let receiver = tokio::spawn(receiver.run(shutdown.clone()));

        shutdown.cancelled().await;
        info!("shutting down bridge");
        publisher.await?;
        receiver.await?;
        supervisor.await?;
        info!("bridge stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use inferno_hal::{RtdArray, SimAdc};
    use inferno_middleware::{
        ChangeReason, CloudTransport, ConnectionStatus, LoopbackHub, MethodHandler, StatusSink,
        TransportError,
    };
    use inferno_types::{ChannelId, ConnectionState};
    use tokio::time::Instant;

    use crate::local::LocalController;

    const PRIMARY: &str = "HostName=hub;DeviceId=inferno1;SharedAccessKey=cHJpbWFyeQ==";
    const SECONDARY: &str = "HostName=hub;DeviceId=inferno1;SharedAccessKey=c2Vjb25kYXJ5";

    fn local_controller() -> Arc<LocalController> {
        let sensors = Arc::new(RtdArray::default());
        sensors.sample(&mut SimAdc::new().with_resistance(ChannelId::Grill, 1373.0));
        Arc::new(LocalController::new(sensors))
    }

    fn bridge(hub: &Arc<LoopbackHub>, credentials: &[&str]) -> Bridge {
        Bridge::new(
            BridgeConfig::default(),
            CredentialQueue::parse_all(credentials).unwrap(),
            Arc::new(hub.factory()),
            local_controller(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_and_answers_commands_end_to_end() {
        let hub = LoopbackHub::new();
        let (trigger, shutdown) = Shutdown::new();
        let bridge = bridge(&hub, &[PRIMARY]);
        let interval = bridge.interval().clone();
        let task = tokio::spawn(bridge.run(shutdown));

        hub.wait_for_published(1).await;
        let body: serde_json::Value =
            serde_json::from_slice(hub.published()[0].message.body()).unwrap();
        assert_eq!(body["smokerId"], "inferno1");
        assert_eq!(body["setPoint"], 225);

        let response = hub
            .invoke_method("SetTelemetryInterval", "60")
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(interval.secs(), 60);

        let response = hub.invoke_method("SmokerSetSetPoint", "250").await.unwrap();
        assert_eq!(response.status, 200);
        let response = hub.invoke_method("SmokerGetSetPoint", "").await.unwrap();
        assert_eq!(response.payload_text(), "250");

        trigger.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_primary_falls_back_to_secondary() {
        let hub = LoopbackHub::new();
        hub.reject_key("cHJpbWFyeQ==");
        let (trigger, shutdown) = Shutdown::new();
        let bridge = bridge(&hub, &[PRIMARY, SECONDARY]);
        let link = bridge.link().clone();
        let task = tokio::spawn(bridge.run(shutdown));

        hub.wait_for_published(1).await;
        assert_eq!(hub.opens(), 2);
        assert_eq!(link.credentials_snapshot().len(), 1);
        assert_eq!(link.state(), ConnectionState::Connected);
        // Commands survive the client swap.
        assert!(hub.invoke_method("SmokerGetTemps", "").await.is_some());

        trigger.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_is_rebuilt_and_publishing_resumes() {
        let hub = LoopbackHub::new();
        let (trigger, shutdown) = Shutdown::new();
        let bridge = bridge(&hub, &[PRIMARY]);
        let task = tokio::spawn(bridge.run(shutdown));

        hub.wait_for_published(1).await;
        assert!(hub.notify_status(
            ConnectionStatus::Disconnected,
            ChangeReason::CommunicationError
        ));

        let start = Instant::now();
        hub.wait_for_published(2).await;
        assert!(start.elapsed() <= Duration::from_secs(15));
        assert_eq!(hub.opens(), 2);

        trigger.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_credentials_stop_publishing_but_not_the_process() {
        let hub = LoopbackHub::new();
        hub.reject_key("cHJpbWFyeQ==");
        hub.reject_key("c2Vjb25kYXJ5");
        let (trigger, shutdown) = Shutdown::new();
        let bridge = bridge(&hub, &[PRIMARY, SECONDARY]);
        let link = bridge.link().clone();
        let task = tokio::spawn(bridge.run(shutdown));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hub.opens(), 2);
        assert_eq!(hub.published_count(), 0);
        assert!(link.halt_reason().is_some());
        assert_eq!(link.state(), ConnectionState::Disabled);

        trigger.trigger();
        task.await.unwrap().unwrap();
    }

    struct NoMethods;

    impl TransportFactory for NoMethods {
        fn create(
            &self,
            _credential: &inferno_middleware::ConnectionString,
            _status: StatusSink,
        ) -> Result<Arc<dyn CloudTransport>, TransportError> {
            Ok(Arc::new(NoMethodsClient))
        }
    }

    struct NoMethodsClient;

    #[async_trait]
    impl CloudTransport for NoMethodsClient {
        fn set_operation_timeout(&self, _timeout: Duration) {}

        async fn set_method_handler(
            &self,
            _name: &str,
            _handler: Arc<dyn MethodHandler>,
        ) -> Result<(), TransportError> {
            Err(TransportError::Broker {
                message: "methods unsupported".into(),
                transient: false,
            })
        }

        async fn open(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_event(
            &self,
            _message: inferno_middleware::Message,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(
            &self,
            _timeout: Duration,
        ) -> Result<Option<inferno_middleware::Message>, TransportError> {
            Ok(None)
        }

        async fn complete(&self, _message_id: uuid::Uuid) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refused_method_registration_aborts_startup() {
        let (_trigger, shutdown) = Shutdown::new();
        let bridge = Bridge::new(
            BridgeConfig::default(),
            CredentialQueue::parse_all([PRIMARY]).unwrap(),
            Arc::new(NoMethods),
            local_controller(),
        );
        assert!(matches!(
            bridge.run(shutdown).await,
            Err(BridgeError::Startup(ConnectionError::Registration { .. }))
        ));
    }

    #[test]
    fn default_config_matches_the_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.telemetry_interval, Duration::from_secs(15));
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.operation_timeout, Duration::from_secs(3600));
        assert_eq!(config.receive_timeout, Duration::from_secs(30));
    }
}
