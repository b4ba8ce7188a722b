//! `inferno-middleware` – the cloud link
//!
//! Keeps the device attached to its remote message endpoint and owns every
//! piece of state that crosses task boundaries on the way there.
//!
//! # Modules
//!
//! - [`transport`] – [`CloudTransport`] and [`TransportFactory`]: the seam
//!   between the bridge and a concrete pub/sub client.  Also defines the
//!   message, direct-method and status-notification types.
//! - [`credentials`] – [`ConnectionString`] parsing and the ordered
//!   [`CredentialQueue`] consumed on authentication failure.
//! - [`fsm`] – the pure (state, status change) → (state, reaction) function
//!   that drives reconnection.
//! - [`connection`] – [`ConnectionManager`]: the single owner of the live
//!   client and the current [`ConnectionState`][inferno_types::ConnectionState].
//! - [`loopback`] – [`LoopbackHub`]: an in-memory endpoint for bench runs and
//!   tests.
//! - [`shutdown`] – [`Shutdown`]: the cancellation signal every loop observes.

pub mod connection;
pub mod credentials;
pub mod fsm;
pub mod loopback;
pub mod shutdown;
pub mod transport;

pub use connection::{
    ConnectionError, ConnectionManager, ConnectionOptions, DEFAULT_OPERATION_TIMEOUT,
    DEFAULT_RECONNECT_DELAY,
};
pub use credentials::{ConnectionString, ConnectionStringError, CredentialQueue};
pub use fsm::{transition, HaltReason, Reaction};
pub use loopback::{LoopbackFactory, LoopbackHub, LoopbackTransport, PublishedEvent, SendFailure};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use transport::{
    is_network_chain, ChangeReason, CloudTransport, ConnectionStatus, Message, MethodHandler,
    MethodRequest, MethodResponse, MethodTable, StatusChange, StatusSink, TransportError,
    TransportFactory,
};
