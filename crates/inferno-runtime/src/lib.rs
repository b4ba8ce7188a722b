//! `inferno-runtime` – the device-cloud bridge
//!
//! Everything that runs between the local smoker controller and the cloud
//! link.
//!
//! # Modules
//!
//! - [`controller`] – [`ControllerClient`][controller::ControllerClient]:
//!   HTTP client for the local controller API, behind the
//!   [`StatusSource`][controller::StatusSource] and
//!   [`SmokerController`][controller::SmokerController] traits.
//! - [`local`] – [`LocalController`][local::LocalController]: the same
//!   surface served in-process from the RTD array, for bench runs.
//! - [`publisher`] – [`TelemetryPublisher`][publisher::TelemetryPublisher]:
//!   polls the controller, stamps each snapshot and publishes it, retrying
//!   every failure after a fixed delay.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   the closed set of remote commands and their handlers.
//! - [`receiver`] – [`CloudToDeviceReceiver`][receiver::CloudToDeviceReceiver]:
//!   logs and acknowledges inbound messages.
//! - [`bridge`] – [`Bridge`][bridge::Bridge]: startup order and task
//!   lifetime.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logging with optional OTLP span export.

pub mod bridge;
pub mod controller;
pub mod dispatcher;
pub mod local;
pub mod publisher;
pub mod receiver;
pub mod telemetry;

pub use bridge::{Bridge, BridgeConfig, BridgeError};
pub use controller::{
    ControllerClient, ControllerError, SmokerController, StatusSource, DEFAULT_CONTROLLER_URL,
};
pub use dispatcher::{Command, CommandDispatcher};
pub use local::LocalController;
pub use publisher::{
    classify, FailureClass, PublishError, PublisherConfig, TelemetryInterval, TelemetryPublisher,
};
pub use receiver::CloudToDeviceReceiver;
pub use telemetry::{init_tracing, TracerProviderGuard};

// Re-exported so the binary can wire a bridge without depending on the
// middleware crate directly.
pub use inferno_middleware::{CredentialQueue, LoopbackHub, Shutdown, ShutdownTrigger};
