//! Connection state machine.
//!
//! [`transition`] maps the current [`ConnectionState`] and a transport
//! [`StatusChange`] to the next state and the [`Reaction`] the connection
//! manager must carry out.  It is a pure function so the whole
//! status/reason table can be tested without a client.
//!
//! | status                 | reason               | reaction            |
//! |------------------------|----------------------|---------------------|
//! | `Connected`            | any                  | none                |
//! | `Disconnected`         | `BadCredential`      | rotate credential   |
//! | `Disconnected`         | `DeviceDisabled`     | halt                |
//! | `Disconnected`         | `RetryExpired`       | reinitialize        |
//! | `Disconnected`         | `CommunicationError` | reinitialize        |
//! | `DisconnectedRetrying` | any                  | none (client retries) |
//! | `Disabled`             | `ClientClose`        | none                |
//! | anything else          |                      | unexpected          |

use std::fmt;

use inferno_types::ConnectionState;

use crate::transport::{ChangeReason, ConnectionStatus, StatusChange};

/// Why the manager stopped trying to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaltReason {
    /// Every supplied credential was rejected.
    CredentialsExhausted,
    /// The endpoint reports the device as disabled.
    DeviceDisabled,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::CredentialsExhausted => f.write_str("all supplied credentials are invalid"),
            HaltReason::DeviceDisabled => f.write_str("the device is disabled"),
        }
    }
}

impl HaltReason {
    /// What the operator has to do before the bridge can connect again.
    pub fn remedy(self) -> &'static str {
        match self {
            HaltReason::CredentialsExhausted => {
                "update connection_strings in ~/.inferno/config.toml and restart inferno"
            }
            HaltReason::DeviceDisabled => {
                "re-enable the device in the cloud hub registry, then restart inferno"
            }
        }
    }
}

/// What the connection manager does after a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reaction {
    /// Nothing beyond recording the new state.
    None,
    /// Drop the current credential; reinitialize with the next one, or halt
    /// when none is left.
    RotateCredential,
    /// Build a fresh client with the current credential.
    Reinitialize,
    /// Stop connecting for the rest of the process.
    Halt(HaltReason),
    /// A combination with no defined handling; logged and otherwise ignored.
    Unexpected,
}

/// Next state and reaction for `change` observed in state `current`.
pub fn transition(current: ConnectionState, change: StatusChange) -> (ConnectionState, Reaction) {
    use ChangeReason as R;
    use ConnectionStatus as S;

    let reaction = match (change.status, change.reason) {
        (S::Connected, _) => Reaction::None,
        (S::Disconnected, R::BadCredential) => Reaction::RotateCredential,
        (S::Disconnected, R::DeviceDisabled) => Reaction::Halt(HaltReason::DeviceDisabled),
        (S::Disconnected, R::RetryExpired | R::CommunicationError) => Reaction::Reinitialize,
        (S::DisconnectedRetrying, _) => Reaction::None,
        (S::Disabled, R::ClientClose) => Reaction::None,
        _ => Reaction::Unexpected,
    };

    // A halted link stays disabled whatever the old client reports later.
    let next = match (current, reaction) {
        (ConnectionState::Disabled, Reaction::Unexpected) => ConnectionState::Disabled,
        _ => change.state(),
    };
    (next, reaction)
}
