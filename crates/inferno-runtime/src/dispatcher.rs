//! [`CommandDispatcher`] – remote commands mapped onto local actions.
//!
//! The command set is closed: [`Command`] enumerates every direct method the
//! device answers, under its exact wire name.  [`CommandDispatcher::method_table`]
//! turns it into the table the connection manager installs on each client.
//!
//! | Command | Payload | Action | Codes |
//! |---|---|---|---|
//! | `SetTelemetryInterval` | seconds | replace the publisher interval | 200 / 400 |
//! | `SmokerSetSetPoint` | degrees | `POST setpoint` | 200 / 400 |
//! | `SmokerGetSetPoint` | – | `GET setpoint`, body relayed | 200 |
//! | `SmokerGetTemps` | – | `GET temps`, body relayed | 200 |
//! | `SmokerGetStatus` | – | `GET status`, body relayed | 200 |
//!
//! A controller that cannot be reached answers 500.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use inferno_middleware::{MethodHandler, MethodRequest, MethodResponse, MethodTable};
use serde_json::json;
use tracing::{info, warn};

use crate::controller::SmokerController;
use crate::publisher::TelemetryInterval;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_CONTROLLER_ERROR: u16 = 500;

/// Every remote command the device answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SetTelemetryInterval,
    SmokerSetSetPoint,
    SmokerGetSetPoint,
    SmokerGetTemps,
    SmokerGetStatus,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::SetTelemetryInterval,
        Command::SmokerSetSetPoint,
        Command::SmokerGetSetPoint,
        Command::SmokerGetTemps,
        Command::SmokerGetStatus,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Command::SetTelemetryInterval => "SetTelemetryInterval",
            Command::SmokerSetSetPoint => "SmokerSetSetPoint",
            Command::SmokerGetSetPoint => "SmokerGetSetPoint",
            Command::SmokerGetTemps => "SmokerGetTemps",
            Command::SmokerGetStatus => "SmokerGetStatus",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown command name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

fn executed(command: Command) -> MethodResponse {
    let body = json!({ "result": format!("Executed direct method: {command}") });
    MethodResponse::new(STATUS_OK, body.to_string())
}

fn invalid_parameter() -> MethodResponse {
    MethodResponse::new(STATUS_BAD_REQUEST, json!({ "result": "Invalid parameter" }).to_string())
}

fn controller_unavailable() -> MethodResponse {
    MethodResponse::new(
        STATUS_CONTROLLER_ERROR,
        json!({ "result": "Controller unavailable" }).to_string(),
    )
}

/// Executes remote commands against the local controller and publisher.
pub struct CommandDispatcher {
    controller: Arc<dyn SmokerController>,
    interval: Arc<TelemetryInterval>,
}

impl CommandDispatcher {
    pub fn new(controller: Arc<dyn SmokerController>, interval: Arc<TelemetryInterval>) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Run `command` with `request`'s payload.  Never fails: every problem is
    /// answered with a status code.
    pub async fn dispatch(&self, command: Command, request: &MethodRequest) -> MethodResponse {
        let argument = request.payload_text();
        info!(%command, %argument, "direct method invoked");

        let response = match command {
            Command::SetTelemetryInterval => match argument.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    let previous = self.interval.secs();
                    self.interval.set_secs(secs);
                    info!(previous, interval_secs = secs, "telemetry interval changed");
                    executed(command)
                }
                _ => invalid_parameter(),
            },
            Command::SmokerSetSetPoint => match argument.parse::<i32>() {
                Ok(set_point) => match self.controller.set_setpoint(set_point).await {
                    Ok(()) => executed(command),
                    Err(e) => {
                        warn!(%command, error = %e, "controller rejected the setpoint");
                        controller_unavailable()
                    }
                },
                Err(_) => invalid_parameter(),
            },
            Command::SmokerGetSetPoint => self.relay(command, self.controller.setpoint_raw().await),
            Command::SmokerGetTemps => self.relay(command, self.controller.temps_raw().await),
            Command::SmokerGetStatus => self.relay(command, self.controller.status_raw().await),
        };

        if response.status != STATUS_OK {
            warn!(%command, %argument, status = response.status, "direct method failed");
        }
        response
    }

    fn relay<E: fmt::Display>(&self, command: Command, body: Result<String, E>) -> MethodResponse {
        match body {
            Ok(body) => MethodResponse::new(STATUS_OK, body),
            Err(e) => {
                warn!(%command, error = %e, "controller request failed");
                controller_unavailable()
            }
        }
    }

    /// One handler per [`Command`], keyed by wire name.
    pub fn method_table(self: &Arc<Self>) -> MethodTable {
        let table: HashMap<String, Arc<dyn MethodHandler>> = Command::ALL
            .into_iter()
            .map(|command| {
                let handler: Arc<dyn MethodHandler> = Arc::new(CommandHandler {
                    command,
                    dispatcher: self.clone(),
                });
                (command.name().to_string(), handler)
            })
            .collect();
        Arc::new(table)
    }
}

struct CommandHandler {
    command: Command,
    dispatcher: Arc<CommandDispatcher>,
}

#[async_trait]
impl MethodHandler for CommandHandler {
    async fn handle(&self, request: MethodRequest) -> MethodResponse {
        self.dispatcher.dispatch(self.command, &request).await
    }
}
