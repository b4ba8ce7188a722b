//! The seam between the bridge and a concrete cloud client.
//!
//! A [`TransportFactory`] builds one [`CloudTransport`] per credential.  The
//! transport reports lifecycle changes through the [`StatusSink`] it was
//! created with; it never decides on its own to reconnect or rotate
//! credentials.  That is the connection manager's job.

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inferno_types::ConnectionState;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::credentials::ConnectionString;

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// A device-to-cloud or cloud-to-device message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: Uuid,
    body: Vec<u8>,
    properties: BTreeMap<String, String>,
    content_type: Option<String>,
    content_encoding: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: body.into(),
            properties: BTreeMap::new(),
            content_type: None,
            content_encoding: None,
        }
    }

    /// A UTF-8 JSON message, as published for every telemetry snapshot.
    pub fn json(body: impl Into<String>) -> Self {
        let mut message = Self::new(body.into().into_bytes());
        message.content_type = Some("application/json".to_string());
        message.content_encoding = Some("utf-8".to_string());
        message
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Direct methods
// ────────────────────────────────────────────────────────────────────────────

/// A named remote procedure call delivered by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
    pub name: String,
    pub payload: Vec<u8>,
}

impl MethodRequest {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, with surrounding whitespace and JSON string quotes
    /// removed.  `"30"`, `30` and ` 30 ` all yield `30`.
    pub fn payload_text(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        let trimmed = text.trim();
        trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed)
            .to_string()
    }
}

/// Reply to a [`MethodRequest`]: a JSON payload and an HTTP-like status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub payload: Vec<u8>,
    pub status: u16,
}

impl MethodResponse {
    pub fn new(status: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            status,
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Handler for one direct method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, request: MethodRequest) -> MethodResponse;
}

/// Method name → handler.  Built once at startup and installed on every
/// client the connection manager creates.
pub type MethodTable = Arc<HashMap<String, Arc<dyn MethodHandler>>>;

// ────────────────────────────────────────────────────────────────────────────
// Status notifications
// ────────────────────────────────────────────────────────────────────────────

/// Connection status reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    DisconnectedRetrying,
    Disabled,
}

/// Why the status changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    ConnectionOk,
    ExpiredSasToken,
    DeviceDisabled,
    BadCredential,
    RetryExpired,
    NoNetwork,
    CommunicationError,
    ClientClose,
}

/// One status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusChange {
    pub status: ConnectionStatus,
    pub reason: ChangeReason,
}

impl StatusChange {
    pub const fn new(status: ConnectionStatus, reason: ChangeReason) -> Self {
        Self { status, reason }
    }

    /// The [`ConnectionState`] this notification puts the link in.
    pub fn state(&self) -> ConnectionState {
        match self.status {
            ConnectionStatus::Connected => ConnectionState::Connected,
            ConnectionStatus::Disconnected => ConnectionState::Disconnected,
            ConnectionStatus::DisconnectedRetrying => ConnectionState::RetryingDisconnected,
            ConnectionStatus::Disabled => ConnectionState::Disabled,
        }
    }
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.status, self.reason)
    }
}

/// Where a transport reports its status changes.
///
/// Each sink is tagged with the generation of the client it was handed to,
/// so notifications from a replaced client can be told apart from the live
/// one's.
#[derive(Debug, Clone)]
pub struct StatusSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, StatusChange)>,
}

impl StatusSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, StatusChange)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a status change.  Dropped silently once the receiver is gone.
    pub fn notify(&self, status: ConnectionStatus, reason: ChangeReason) {
        let _ = self
            .tx
            .send((self.generation, StatusChange::new(status, reason)));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failure of a transport operation.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint rejected the credential.  Followed by a
    /// `Disconnected/BadCredential` status notification.
    #[error("credential rejected: {0}")]
    Unauthorized(String),

    /// The endpoint reported an error.  `transient` errors are worth retrying
    /// as-is.
    #[error("endpoint error: {message}")]
    Broker { message: String, transient: bool },

    #[error("network error: {0}")]
    Network(#[source] io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("client is not open")]
    NotOpen,

    #[error("{0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Broker { transient: true, .. })
    }
}

fn is_network_io_kind(kind: io::ErrorKind) -> bool {
    use io::ErrorKind::*;
    matches!(
        kind,
        ConnectionRefused
            | ConnectionReset
            | ConnectionAborted
            | NotConnected
            | AddrNotAvailable
            | BrokenPipe
            | TimedOut
            | HostUnreachable
            | NetworkUnreachable
            | NetworkDown
    )
}

/// Whether `err` or anything in its `source()` chain is a network-level
/// failure: a [`TransportError::Network`] or [`TransportError::Timeout`], or an
/// [`io::Error`] of a connection-related kind.
pub fn is_network_chain(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(t) = e.downcast_ref::<TransportError>() {
            if matches!(t, TransportError::Network(_) | TransportError::Timeout(_)) {
                return true;
            }
        }
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if is_network_io_kind(io.kind()) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

// ────────────────────────────────────────────────────────────────────────────
// Transport traits
// ────────────────────────────────────────────────────────────────────────────

/// A client session with the cloud endpoint, bound to one credential.
///
/// All methods take `&self`; implementations synchronise internally so the
/// publisher, receiver and method dispatch can share one client.
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Upper bound applied to every subsequent operation.
    fn set_operation_timeout(&self, timeout: Duration);

    /// Install the handler for direct method `name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the client cannot accept the registration.
    async fn set_method_handler(
        &self,
        name: &str,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), TransportError>;

    /// Open the session.
    ///
    /// # Errors
    ///
    /// [`TransportError::Unauthorized`] when the credential is rejected; the
    /// matching status notification is delivered through the sink as well.
    async fn open(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Publish one device-to-cloud message.
    async fn send_event(&self, message: Message) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a cloud-to-device message.
    ///
    /// `Ok(None)` means nothing arrived in time.
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError>;

    /// Acknowledge a received message so the endpoint stops redelivering it.
    async fn complete(&self, message_id: Uuid) -> Result<(), TransportError>;
}

/// Builds transports.
pub trait TransportFactory: Send + Sync {
    /// Create an unopened client for `credential` that reports to `status`.
    ///
    /// # Errors
    ///
    /// Returns an error when the credential cannot be turned into a client.
    fn create(
        &self,
        credential: &ConnectionString,
        status: StatusSink,
    ) -> Result<Arc<dyn CloudTransport>, TransportError>;
}
