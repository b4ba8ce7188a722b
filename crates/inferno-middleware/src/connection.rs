//! [`ConnectionManager`] – sole owner of the live cloud client.
//!
//! The manager holds the client handle, the remaining credentials and the
//! current [`ConnectionState`].  Transports report status changes through a
//! generation-tagged [`StatusSink`]; [`ConnectionManager::run`] consumes those
//! notifications one at a time and applies [`transition`].
//!
//! Client construction is serialised by an async lock so two failure events
//! arriving together never build two live clients.  Opening happens outside
//! that lock: a slow handshake must not block status processing.
//!
//! A build or open that fails without a credential verdict is retried after
//! [`ConnectionOptions::retry_delay`] by posting a synthetic
//! `Disconnected/CommunicationError` for the failed generation.  Only a halt
//! (credentials exhausted, device disabled) stops the retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use inferno_middleware::{
//!     ConnectionManager, ConnectionOptions, CredentialQueue, LoopbackHub, Shutdown,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = LoopbackHub::new();
//! let credentials = CredentialQueue::parse_all([
//!     "HostName=hub;DeviceId=inferno1;SharedAccessKey=a2V5",
//! ])?;
//! let manager = Arc::new(ConnectionManager::new(
//!     credentials,
//!     Arc::new(hub.factory()),
//!     Arc::new(HashMap::new()),
//!     ConnectionOptions::default(),
//! ));
//! let (_trigger, shutdown) = Shutdown::new();
//! tokio::spawn({
//!     let manager = manager.clone();
//!     async move { manager.run(shutdown).await }
//! });
//! manager.initialize_client().await?;
//! manager.wait_connected().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use inferno_types::ConnectionState;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::credentials::CredentialQueue;
use crate::fsm::{transition, HaltReason, Reaction};
use crate::shutdown::Shutdown;
use crate::transport::{
    ChangeReason, CloudTransport, ConnectionStatus, Message, MethodTable, StatusChange,
    StatusSink, TransportError, TransportFactory,
};

/// Default upper bound for a single transport operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default wait before rebuilding a client whose build or open failed.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Tunables for [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub operation_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            retry_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Failure to (re)build the cloud client.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection halted: {0}")]
    Halted(HaltReason),

    #[error("no credential left to connect with")]
    NoCredential,

    #[error("failed to create client: {0}")]
    Create(#[source] TransportError),

    /// The client refused a direct-method handler.  Fatal at startup.
    #[error("failed to register direct method {name}: {source}")]
    Registration {
        name: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to open client: {0}")]
    Open(#[source] TransportError),
}

struct Inner {
    client: Option<Arc<dyn CloudTransport>>,
    credentials: CredentialQueue,
    generation: u64,
    was_ever_connected: bool,
    halted: Option<HaltReason>,
}

/// Owns the cloud client and drives reconnection.
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    methods: MethodTable,
    options: ConnectionOptions,
    state: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    init_lock: tokio::sync::Mutex<()>,
    events_tx: mpsc::UnboundedSender<(u64, StatusChange)>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(u64, StatusChange)>>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.  No client exists until
    /// [`initialize_client`](Self::initialize_client) is called.
    ///
    /// `methods` is installed on every client the manager builds.
    pub fn new(
        credentials: CredentialQueue,
        factory: Arc<dyn TransportFactory>,
        methods: MethodTable,
        options: ConnectionOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            methods,
            options,
            state,
            inner: Mutex::new(Inner {
                client: None,
                credentials,
                generation: 0,
                was_ever_connected: false,
                halted: None,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolve once the state is `Connected`.
    pub async fn wait_connected(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Connected)
            .await;
    }

    /// Why the manager gave up, if it has.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.inner().halted
    }

    pub fn was_ever_connected(&self) -> bool {
        self.inner().was_ever_connected
    }

    /// Redacted view of the credentials not yet rejected.
    pub fn credentials_snapshot(&self) -> Vec<String> {
        self.inner().credentials.snapshot()
    }

    fn current_client(&self) -> Result<Arc<dyn CloudTransport>, TransportError> {
        self.inner().client.clone().ok_or(TransportError::NotOpen)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Client lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Build and open a client with the front credential.
    ///
    /// A no-op while `Connected` or `Connecting`.  A previous client is
    /// closed first.  An open rejected for its credential is not an error
    /// here: the matching `Disconnected/BadCredential` notification drives
    /// the rotation.  Any other build or open failure schedules a retry.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Registration`] if a method handler could not be
    /// installed; otherwise halts, creation or open failures.
    pub async fn initialize_client(&self) -> Result<(), ConnectionError> {
        let result = self.build_and_open().await;
        if let Err(
            ConnectionError::Create(_)
            | ConnectionError::Open(_)
            | ConnectionError::Registration { .. },
        ) = &result
        {
            self.schedule_retry();
        }
        result
    }

    fn busy(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        )
    }

    async fn build_and_open(&self) -> Result<(), ConnectionError> {
        if self.busy() {
            return Ok(());
        }

        let client = {
            let _guard = self.init_lock.lock().await;
            if self.busy() {
                return Ok(());
            }

            let (previous, credential, sink) = {
                let mut inner = self.inner();
                if let Some(reason) = inner.halted {
                    return Err(ConnectionError::Halted(reason));
                }
                let credential = inner
                    .credentials
                    .current()
                    .cloned()
                    .ok_or(ConnectionError::NoCredential)?;
                if inner.was_ever_connected && self.state() == ConnectionState::Disconnected {
                    debug!("disposing the previous client after disconnect");
                    inner.was_ever_connected = false;
                }
                inner.generation += 1;
                let sink = StatusSink::new(inner.generation, self.events_tx.clone());
                (inner.client.take(), credential, sink)
            };

            if let Some(previous) = previous {
                if let Err(e) = previous.close().await {
                    debug!(error = %e, "closing the previous client failed");
                }
            }

            debug!(credential = %credential, generation = sink.generation(), "initializing client");
            let client = self
                .factory
                .create(&credential, sink)
                .map_err(ConnectionError::Create)?;
            client.set_operation_timeout(self.options.operation_timeout);
            for (name, handler) in self.methods.iter() {
                client
                    .set_method_handler(name, handler.clone())
                    .await
                    .map_err(|source| ConnectionError::Registration {
                        name: name.clone(),
                        source,
                    })?;
            }

            self.inner().client = Some(client.clone());
            self.state.send_replace(ConnectionState::Connecting);
            client
        };

        match client.open().await {
            Ok(()) => {
                debug!("initialized the client instance");
                Ok(())
            }
            Err(TransportError::Unauthorized(details)) => {
                debug!(%details, "open rejected the credential; awaiting status notification");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to open the client");
                Err(ConnectionError::Open(e))
            }
        }
    }

    /// Post a rebuild of the current generation after the retry delay.
    fn schedule_retry(&self) {
        let generation = self.inner().generation;
        self.state.send_replace(ConnectionState::Disconnected);
        let delay = self.options.retry_delay;
        let events = self.events_tx.clone();
        warn!(generation, delay_secs = delay.as_secs(), "client unavailable; retrying later");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let change =
                StatusChange::new(ConnectionStatus::Disconnected, ChangeReason::CommunicationError);
            // The receiver only goes away with the manager.
            let _ = events.send((generation, change));
        });
    }

    /// Apply one status notification from the client of `generation`.
    ///
    /// Notifications from a replaced client, and every notification after a
    /// halt, are ignored.
    pub async fn handle_status(&self, generation: u64, change: StatusChange) {
        let (current_generation, halted) = {
            let inner = self.inner();
            (inner.generation, inner.halted)
        };
        if generation != current_generation {
            debug!(
                generation,
                current_generation,
                status = %change,
                "ignoring status from a replaced client"
            );
            return;
        }
        if let Some(reason) = halted {
            debug!(status = %change, %reason, "ignoring status after halt");
            return;
        }

        let (next, reaction) = transition(self.state(), change);
        self.state.send_replace(next);
        debug!(status = %change, state = %next, "connection status changed");

        match (change.status, change.reason) {
            (ConnectionStatus::Connected, _) => {
                self.inner().was_ever_connected = true;
                info!("connected to the cloud endpoint");
            }
            (ConnectionStatus::DisconnectedRetrying, _) => {
                debug!("client is retrying on its own; not closing it");
            }
            (ConnectionStatus::Disabled, ChangeReason::ClientClose) => {
                debug!("client closed gracefully");
            }
            _ => {}
        }

        match reaction {
            Reaction::None => {}
            Reaction::Reinitialize => {
                warn!(reason = ?change.reason, "connection lost; reinitializing the client");
                self.reinitialize().await;
            }
            Reaction::RotateCredential => self.rotate_credential().await,
            Reaction::Halt(reason) => self.halt(reason).await,
            Reaction::Unexpected => {
                warn!(status = %change, "unexpected connection status; no action taken");
            }
        }
    }

    async fn rotate_credential(&self) {
        let (rejected, remaining) = {
            let mut inner = self.inner();
            let rejected = inner.credentials.discard_current();
            (rejected, inner.credentials.len())
        };
        if let Some(rejected) = rejected {
            warn!(credential = %rejected, remaining, "credential rejected by the endpoint");
        }
        if remaining == 0 {
            self.halt(HaltReason::CredentialsExhausted).await;
            return;
        }
        self.reinitialize().await;
    }

    async fn reinitialize(&self) {
        if let Err(e) = self.initialize_client().await {
            warn!(error = %e, "client reinitialization failed");
        }
    }

    async fn halt(&self, reason: HaltReason) {
        let client = {
            let mut inner = self.inner();
            inner.halted = Some(reason);
            inner.client.take()
        };
        self.state.send_replace(ConnectionState::Disabled);
        error!(
            %reason,
            remedy = reason.remedy(),
            "giving up on the cloud connection: {reason}; {}",
            reason.remedy()
        );
        if let Some(client) = client
            && let Err(e) = client.close().await
        {
            debug!(error = %e, "closing the halted client failed");
        }
    }

    /// Consume status notifications until shutdown, then close the client.
    pub async fn run(&self, shutdown: Shutdown) {
        let mut events = self.events_rx.lock().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some((generation, change)) => self.handle_status(generation, change).await,
                    // Unreachable while `self.events_tx` exists.
                    None => break,
                },
            }
        }
        self.close().await;
    }

    /// Close the live client, if any.
    pub async fn close(&self) {
        let client = self.inner().client.take();
        if let Some(client) = client {
            if let Err(e) = client.close().await {
                warn!(error = %e, "error while closing the client");
            } else {
                info!("cloud client closed");
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Client operations
    // ────────────────────────────────────────────────────────────────────────

    /// Publish through the live client.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotOpen`] when there is no client.
    pub async fn send_event(&self, message: Message) -> Result<(), TransportError> {
        self.current_client()?.send_event(message).await
    }

    pub async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        self.current_client()?.receive(timeout).await
    }

    pub async fn complete(&self, message_id: Uuid) -> Result<(), TransportError> {
        self.current_client()?.complete(message_id).await
    }

    /// Generation of the live client.
    pub fn generation(&self) -> u64 {
        self.inner().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::credentials::ConnectionString;
    use crate::transport::{MethodHandler, MethodRequest, MethodResponse};

    const FIRST: &str = "HostName=h;DeviceId=inferno1;SharedAccessKey=Zmlyc3Q=";
    const SECOND: &str = "HostName=h;DeviceId=inferno1;SharedAccessKey=c2Vjb25k";

    #[derive(Default)]
    struct Recorder {
        created: Mutex<Vec<String>>,
        closed: Mutex<usize>,
        handlers: Mutex<Vec<String>>,
        refuse_handlers: bool,
    }

    struct RecordingClient {
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl CloudTransport for RecordingClient {
        fn set_operation_timeout(&self, _timeout: Duration) {}

        async fn set_method_handler(
            &self,
            name: &str,
            _handler: Arc<dyn MethodHandler>,
        ) -> Result<(), TransportError> {
            // Registration is a round trip on a real link.
            tokio::task::yield_now().await;
            if self.recorder.refuse_handlers {
                return Err(TransportError::NotOpen);
            }
            self.recorder.handlers.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn open(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            *self.recorder.closed.lock().unwrap() += 1;
            Ok(())
        }

        async fn send_event(&self, _message: Message) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&self, _timeout: Duration) -> Result<Option<Message>, TransportError> {
            Ok(None)
        }

        async fn complete(&self, _message_id: Uuid) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct RecordingFactory(Arc<Recorder>);

    impl TransportFactory for RecordingFactory {
        fn create(
            &self,
            credential: &ConnectionString,
            _status: StatusSink,
        ) -> Result<Arc<dyn CloudTransport>, TransportError> {
            self.0
                .created
                .lock()
                .unwrap()
                .push(credential.secret().to_string());
            Ok(Arc::new(RecordingClient {
                recorder: self.0.clone(),
            }))
        }
    }

    struct Noop;

    #[async_trait]
    impl MethodHandler for Noop {
        async fn handle(&self, _request: MethodRequest) -> MethodResponse {
            MethodResponse::new(200, "{}")
        }
    }

    fn manager_with(recorder: Arc<Recorder>, methods: MethodTable) -> ConnectionManager {
        ConnectionManager::new(
            CredentialQueue::parse_all([FIRST, SECOND]).unwrap(),
            Arc::new(RecordingFactory(recorder)),
            methods,
            ConnectionOptions::default(),
        )
    }

    fn connected() -> StatusChange {
        StatusChange::new(ConnectionStatus::Connected, ChangeReason::ConnectionOk)
    }

    fn disconnected(reason: ChangeReason) -> StatusChange {
        StatusChange::new(ConnectionStatus::Disconnected, reason)
    }

    #[tokio::test]
    async fn bad_credentials_rotate_once_then_halt() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        manager.handle_status(manager.generation(), connected()).await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager
            .handle_status(manager.generation(), disconnected(ChangeReason::BadCredential))
            .await;
        assert_eq!(
            *recorder.created.lock().unwrap(),
            vec!["Zmlyc3Q=".to_string(), "c2Vjb25k".to_string()]
        );
        assert_eq!(manager.halt_reason(), None);

        manager
            .handle_status(manager.generation(), disconnected(ChangeReason::BadCredential))
            .await;
        assert_eq!(recorder.created.lock().unwrap().len(), 2);
        assert_eq!(manager.halt_reason(), Some(HaltReason::CredentialsExhausted));
        assert_eq!(manager.state(), ConnectionState::Disabled);
        assert!(manager.credentials_snapshot().is_empty());

        assert!(matches!(
            manager.initialize_client().await,
            Err(ConnectionError::Halted(HaltReason::CredentialsExhausted))
        ));
        assert_eq!(recorder.created.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn initialize_is_a_no_op_while_connected() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        manager.handle_status(manager.generation(), connected()).await;
        manager.initialize_client().await.unwrap();
        assert_eq!(recorder.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn communication_error_rebuilds_with_same_credential() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        manager.handle_status(manager.generation(), connected()).await;
        manager
            .handle_status(
                manager.generation(),
                disconnected(ChangeReason::CommunicationError),
            )
            .await;

        let created = recorder.created.lock().unwrap().clone();
        assert_eq!(created, vec!["Zmlyc3Q=".to_string(), "Zmlyc3Q=".to_string()]);
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn stale_notifications_are_ignored() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        let stale = manager.generation();
        manager
            .handle_status(stale, disconnected(ChangeReason::RetryExpired))
            .await;
        assert_eq!(recorder.created.lock().unwrap().len(), 2);

        // Late report from the replaced client.
        manager
            .handle_status(stale, disconnected(ChangeReason::BadCredential))
            .await;
        assert_eq!(recorder.created.lock().unwrap().len(), 2);
        assert_eq!(manager.credentials_snapshot().len(), 2);
    }

    #[tokio::test]
    async fn device_disabled_halts_without_rotation() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        manager
            .handle_status(manager.generation(), disconnected(ChangeReason::DeviceDisabled))
            .await;
        assert_eq!(manager.halt_reason(), Some(HaltReason::DeviceDisabled));
        assert_eq!(manager.credentials_snapshot().len(), 2);
        assert_eq!(recorder.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn method_table_is_installed_on_every_client() {
        let recorder = Arc::new(Recorder::default());
        let mut methods: HashMap<String, Arc<dyn MethodHandler>> = HashMap::new();
        methods.insert("GetTemps".into(), Arc::new(Noop));
        let manager = manager_with(recorder.clone(), Arc::new(methods));

        manager.initialize_client().await.unwrap();
        manager
            .handle_status(manager.generation(), disconnected(ChangeReason::RetryExpired))
            .await;
        assert_eq!(
            *recorder.handlers.lock().unwrap(),
            vec!["GetTemps".to_string(), "GetTemps".to_string()]
        );
    }

    #[tokio::test]
    async fn refused_registration_is_reported() {
        let recorder = Arc::new(Recorder {
            refuse_handlers: true,
            ..Recorder::default()
        });
        let mut methods: HashMap<String, Arc<dyn MethodHandler>> = HashMap::new();
        methods.insert("SetPoint".into(), Arc::new(Noop));
        let manager = manager_with(recorder, Arc::new(methods));

        match manager.initialize_client().await {
            Err(ConnectionError::Registration { name, .. }) => assert_eq!(name, "SetPoint"),
            other => panic!("expected a registration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn operations_without_a_client_are_not_open() {
        let manager = manager_with(Arc::new(Recorder::default()), Arc::new(HashMap::new()));
        assert!(matches!(
            manager.send_event(Message::json("{}")).await,
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(
            manager.receive(Duration::from_secs(1)).await,
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn concurrent_initializations_build_one_client() {
        let recorder = Arc::new(Recorder::default());
        let mut methods: HashMap<String, Arc<dyn MethodHandler>> = HashMap::new();
        methods.insert("GetTemps".into(), Arc::new(Noop));
        let manager = manager_with(recorder.clone(), Arc::new(methods));

        let (first, second) =
            tokio::join!(manager.initialize_client(), manager.initialize_client());
        first.unwrap();
        second.unwrap();
        assert_eq!(recorder.created.lock().unwrap().len(), 1);
        assert_eq!(*recorder.handlers.lock().unwrap(), vec!["GetTemps".to_string()]);
        assert_eq!(*recorder.closed.lock().unwrap(), 0);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn retrying_disconnect_keeps_the_client() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        manager.handle_status(manager.generation(), connected()).await;
        manager
            .handle_status(
                manager.generation(),
                StatusChange::new(ConnectionStatus::DisconnectedRetrying, ChangeReason::NoNetwork),
            )
            .await;
        assert_eq!(manager.state(), ConnectionState::RetryingDisconnected);
        assert_eq!(recorder.created.lock().unwrap().len(), 1);
        assert_eq!(*recorder.closed.lock().unwrap(), 0);

        // The client's own retry succeeds.
        manager.handle_status(manager.generation(), connected()).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(recorder.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn halt_closes_the_client_and_ignores_later_reports() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager_with(recorder.clone(), Arc::new(HashMap::new()));

        manager.initialize_client().await.unwrap();
        let generation = manager.generation();
        manager.handle_status(generation, connected()).await;
        manager
            .handle_status(generation, disconnected(ChangeReason::DeviceDisabled))
            .await;
        assert_eq!(*recorder.closed.lock().unwrap(), 1);

        manager.handle_status(generation, connected()).await;
        assert_eq!(manager.state(), ConnectionState::Disabled);
        assert!(matches!(
            manager.send_event(Message::json("{}")).await,
            Err(TransportError::NotOpen)
        ));
    }

    /// A link whose opens fail with a network error until it is healed.
    #[derive(Default)]
    struct FlakyLink {
        opens: AtomicUsize,
        healthy: AtomicBool,
    }

    struct FlakyClient {
        link: Arc<FlakyLink>,
        status: StatusSink,
    }

    #[async_trait]
    impl CloudTransport for FlakyClient {
        fn set_operation_timeout(&self, _timeout: Duration) {}

        async fn set_method_handler(
            &self,
            _name: &str,
            _handler: Arc<dyn MethodHandler>,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn open(&self) -> Result<(), TransportError> {
            self.link.opens.fetch_add(1, Ordering::SeqCst);
            if self.link.healthy.load(Ordering::SeqCst) {
                self.status
                    .notify(ConnectionStatus::Connected, ChangeReason::ConnectionOk);
                Ok(())
            } else {
                Err(TransportError::Network(io::Error::from(
                    io::ErrorKind::NetworkUnreachable,
                )))
            }
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_event(&self, _message: Message) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&self, _timeout: Duration) -> Result<Option<Message>, TransportError> {
            Ok(None)
        }

        async fn complete(&self, _message_id: Uuid) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct FlakyFactory(Arc<FlakyLink>);

    impl TransportFactory for FlakyFactory {
        fn create(
            &self,
            _credential: &ConnectionString,
            status: StatusSink,
        ) -> Result<Arc<dyn CloudTransport>, TransportError> {
            Ok(Arc::new(FlakyClient {
                link: self.0.clone(),
                status,
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_is_retried_until_the_link_recovers() {
        let link = Arc::new(FlakyLink::default());
        let manager = Arc::new(ConnectionManager::new(
            CredentialQueue::parse_all([FIRST]).unwrap(),
            Arc::new(FlakyFactory(link.clone())),
            Arc::new(HashMap::new()),
            ConnectionOptions::default(),
        ));
        let (_trigger, shutdown) = Shutdown::new();
        tokio::spawn({
            let manager = manager.clone();
            async move { manager.run(shutdown).await }
        });

        assert!(matches!(
            manager.initialize_client().await,
            Err(ConnectionError::Open(TransportError::Network(_)))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // Rebuilt at 5 s and 10 s.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(link.opens.load(Ordering::SeqCst), 3);
        assert_eq!(manager.halt_reason(), None);

        link.healthy.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(60), manager.wait_connected())
            .await
            .expect("link recovers");
        assert_eq!(link.opens.load(Ordering::SeqCst), 4);
        assert_eq!(manager.credentials_snapshot().len(), 1);
    }
}
