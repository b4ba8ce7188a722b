//! [`LoopbackHub`] – an in-memory cloud endpoint.
//!
//! Stands in for the real message hub on the bench and in tests.  The hub
//! records every published event, queues cloud-to-device messages, invokes
//! direct methods the way the cloud would, and can be scripted to reject
//! keys, disable the device, fail sends or drop the link.
//!
//! # Example
//!
//! ```rust
//! use inferno_middleware::{
//!     ChangeReason, CloudTransport, ConnectionStatus, ConnectionString, LoopbackHub, StatusSink,
//!     TransportFactory,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = LoopbackHub::new();
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let cs: ConnectionString = "HostName=hub;DeviceId=inferno1;SharedAccessKey=a2V5".parse().unwrap();
//! let client = hub.factory().create(&cs, StatusSink::new(1, tx)).unwrap();
//!
//! client.open().await.unwrap();
//! let (_, change) = rx.recv().await.unwrap();
//! assert_eq!(change.status, ConnectionStatus::Connected);
//! assert_eq!(change.reason, ChangeReason::ConnectionOk);
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::connection::DEFAULT_OPERATION_TIMEOUT;
use crate::credentials::ConnectionString;
use crate::transport::{
    ChangeReason, CloudTransport, ConnectionStatus, Message, MethodHandler, MethodRequest,
    MethodResponse, StatusSink, TransportError, TransportFactory,
};

/// Scripted failure for the next `send_event` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// A retryable endpoint error.
    TransientBroker,
    /// A connection-level I/O failure.
    Network,
    /// A non-transient endpoint error.
    Fatal,
}

impl SendFailure {
    fn into_error(self) -> TransportError {
        match self {
            SendFailure::TransientBroker => TransportError::Broker {
                message: "loopback: server busy".to_string(),
                transient: true,
            },
            SendFailure::Network => TransportError::Network(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "loopback: connection reset",
            )),
            SendFailure::Fatal => TransportError::Broker {
                message: "loopback: message rejected".to_string(),
                transient: false,
            },
        }
    }
}

/// A message the hub accepted from a device.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub device_id: String,
    pub message: Message,
}

#[derive(Default)]
struct HubState {
    rejected_keys: HashSet<String>,
    disabled_devices: HashSet<String>,
    send_failures: VecDeque<SendFailure>,
    published: Vec<PublishedEvent>,
    cloud_to_device: VecDeque<Message>,
    completed: Vec<Uuid>,
    clients: Vec<Weak<LoopbackTransport>>,
    opens: usize,
}

/// In-memory endpoint shared by every [`LoopbackTransport`] it creates.
#[derive(Default)]
pub struct LoopbackHub {
    state: Mutex<HubState>,
    published_signal: Notify,
    inbox_signal: Notify,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A factory producing clients attached to this hub.
    pub fn factory(self: &Arc<Self>) -> LoopbackFactory {
        LoopbackFactory { hub: self.clone() }
    }

    // ── scripting ───────────────────────────────────────────────────────────

    /// Refuse `Open` for any credential carrying `key`.
    pub fn reject_key(&self, key: impl Into<String>) {
        self.state().rejected_keys.insert(key.into());
    }

    /// Report `device_id` as disabled on its next `Open`.
    pub fn disable_device(&self, device_id: impl Into<String>) {
        self.state().disabled_devices.insert(device_id.into());
    }

    /// Fail the next sends, in order.
    pub fn fail_next_sends(&self, failures: impl IntoIterator<Item = SendFailure>) {
        self.state().send_failures.extend(failures);
    }

    /// Deliver a status notification through the most recent open client.
    ///
    /// Returns `false` when no client is open.
    pub fn notify_status(&self, status: ConnectionStatus, reason: ChangeReason) -> bool {
        match self.open_client() {
            Some(client) => {
                if status != ConnectionStatus::Connected {
                    client.open.store(false, Ordering::SeqCst);
                }
                client.sink.notify(status, reason);
                true
            }
            None => false,
        }
    }

    /// Queue a cloud-to-device message.
    pub fn push_cloud_to_device(&self, message: Message) {
        self.state().cloud_to_device.push_back(message);
        self.inbox_signal.notify_one();
    }

    /// Invoke direct method `name` on the most recent open client.
    ///
    /// Returns `None` when no client is open or the method is not
    /// registered.
    pub async fn invoke_method(
        &self,
        name: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Option<MethodResponse> {
        let client = self.open_client()?;
        let handler = client.handler(name)?;
        Some(handler.handle(MethodRequest::new(name, payload)).await)
    }

    // ── observation ─────────────────────────────────────────────────────────

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.state().published.clone()
    }

    pub fn published_count(&self) -> usize {
        self.state().published.len()
    }

    /// Wait until at least `count` events were published.
    pub async fn wait_for_published(&self, count: usize) {
        loop {
            let signal = self.published_signal.notified();
            if self.published_count() >= count {
                return;
            }
            signal.await;
        }
    }

    /// Ids of the cloud-to-device messages the device acknowledged.
    pub fn completed(&self) -> Vec<Uuid> {
        self.state().completed.clone()
    }

    /// Number of successful and rejected `Open` calls.
    pub fn opens(&self) -> usize {
        self.state().opens
    }

    fn open_client(&self) -> Option<Arc<LoopbackTransport>> {
        let mut state = self.state();
        state.clients.retain(|c| c.strong_count() > 0);
        state
            .clients
            .iter()
            .rev()
            .filter_map(Weak::upgrade)
            .find(|c| c.open.load(Ordering::SeqCst))
    }
}

/// [`TransportFactory`] for a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackFactory {
    hub: Arc<LoopbackHub>,
}

impl TransportFactory for LoopbackFactory {
    fn create(
        &self,
        credential: &ConnectionString,
        status: StatusSink,
    ) -> Result<Arc<dyn CloudTransport>, TransportError> {
        let client = Arc::new(LoopbackTransport {
            hub: self.hub.clone(),
            device_id: credential.device_id().to_string(),
            secret: credential.secret().to_string(),
            sink: status,
            open: AtomicBool::new(false),
            methods: Mutex::new(HashMap::new()),
            operation_timeout: Mutex::new(DEFAULT_OPERATION_TIMEOUT),
        });
        self.hub.state().clients.push(Arc::downgrade(&client));
        Ok(client)
    }
}

/// One device session with a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    device_id: String,
    secret: String,
    sink: StatusSink,
    open: AtomicBool,
    methods: Mutex<HashMap<String, Arc<dyn MethodHandler>>>,
    operation_timeout: Mutex<Duration>,
}

impl LoopbackTransport {
    fn handler(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }

    fn operation_timeout(&self) -> Duration {
        *self
            .operation_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CloudTransport for LoopbackTransport {
    fn set_operation_timeout(&self, timeout: Duration) {
        *self
            .operation_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    async fn set_method_handler(
        &self,
        name: &str,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), TransportError> {
        self.methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handler);
        Ok(())
    }

    async fn open(&self) -> Result<(), TransportError> {
        let (rejected, disabled) = {
            let mut state = self.hub.state();
            state.opens += 1;
            (
                state.rejected_keys.contains(&self.secret),
                state.disabled_devices.contains(&self.device_id),
            )
        };
        if disabled {
            self.sink
                .notify(ConnectionStatus::Disconnected, ChangeReason::DeviceDisabled);
            return Err(TransportError::Unauthorized("device is disabled".to_string()));
        }
        if rejected {
            self.sink
                .notify(ConnectionStatus::Disconnected, ChangeReason::BadCredential);
            return Err(TransportError::Unauthorized("invalid shared access key".to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        debug!(device = %self.device_id, "loopback client opened");
        self.sink
            .notify(ConnectionStatus::Connected, ChangeReason::ConnectionOk);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.sink
                .notify(ConnectionStatus::Disabled, ChangeReason::ClientClose);
        }
        Ok(())
    }

    async fn send_event(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        {
            let mut state = self.hub.state();
            if let Some(failure) = state.send_failures.pop_front() {
                return Err(failure.into_error());
            }
            state.published.push(PublishedEvent {
                device_id: self.device_id.clone(),
                message,
            });
        }
        self.hub.published_signal.notify_waiters();
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        self.ensure_open()?;
        let deadline = tokio::time::Instant::now() + timeout.min(self.operation_timeout());
        loop {
            if let Some(message) = self.hub.state().cloud_to_device.pop_front() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, self.hub.inbox_signal.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, message_id: Uuid) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.hub.state().completed.push(message_id);
        Ok(())
    }
}
