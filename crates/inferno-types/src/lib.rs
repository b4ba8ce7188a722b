use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire value the controller uses for a channel that has no usable reading
/// (probe unplugged, or no samples collected yet).
pub const UNAVAILABLE_TEMP: f64 = -1.0;

/// One of the five RTD inputs wired to the smoker's ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Grill,
    Probe1,
    Probe2,
    Probe3,
    Probe4,
}

impl ChannelId {
    /// All channels in ADC input order.
    pub const ALL: [ChannelId; 5] = [
        ChannelId::Grill,
        ChannelId::Probe1,
        ChannelId::Probe2,
        ChannelId::Probe3,
        ChannelId::Probe4,
    ];

    /// Single-ended ADC input this channel is wired to.
    pub fn adc_input(self) -> u8 {
        match self {
            ChannelId::Grill => 0,
            ChannelId::Probe1 => 1,
            ChannelId::Probe2 => 2,
            ChannelId::Probe3 => 3,
            ChannelId::Probe4 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelId::Grill => "grill",
            ChannelId::Probe1 => "probe1",
            ChannelId::Probe2 => "probe2",
            ChannelId::Probe3 => "probe3",
            ChannelId::Probe4 => "probe4",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-channel temperatures in whole degrees Fahrenheit.
///
/// A value of [`UNAVAILABLE_TEMP`] means the channel has no reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Temps {
    #[serde(alias = "GrillTemp")]
    pub grill_temp: f64,
    #[serde(alias = "Probe1Temp")]
    pub probe1_temp: f64,
    #[serde(alias = "Probe2Temp")]
    pub probe2_temp: f64,
    #[serde(alias = "Probe3Temp")]
    pub probe3_temp: f64,
    #[serde(alias = "Probe4Temp")]
    pub probe4_temp: f64,
}

impl Temps {
    /// Temperatures with every channel marked unavailable.
    pub fn unavailable() -> Self {
        Self {
            grill_temp: UNAVAILABLE_TEMP,
            probe1_temp: UNAVAILABLE_TEMP,
            probe2_temp: UNAVAILABLE_TEMP,
            probe3_temp: UNAVAILABLE_TEMP,
            probe4_temp: UNAVAILABLE_TEMP,
        }
    }

    pub fn get(&self, channel: ChannelId) -> f64 {
        match channel {
            ChannelId::Grill => self.grill_temp,
            ChannelId::Probe1 => self.probe1_temp,
            ChannelId::Probe2 => self.probe2_temp,
            ChannelId::Probe3 => self.probe3_temp,
            ChannelId::Probe4 => self.probe4_temp,
        }
    }

    pub fn set(&mut self, channel: ChannelId, value: f64) {
        match channel {
            ChannelId::Grill => self.grill_temp = value,
            ChannelId::Probe1 => self.probe1_temp = value,
            ChannelId::Probe2 => self.probe2_temp = value,
            ChannelId::Probe3 => self.probe3_temp = value,
            ChannelId::Probe4 => self.probe4_temp = value,
        }
    }
}

impl Default for Temps {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// Controller operating mode as reported by the local API.
///
/// The controller may serialise the mode either by name or by numeric code,
/// so both shapes are accepted and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SmokerMode {
    Named(String),
    Code(i64),
}

impl Default for SmokerMode {
    fn default() -> Self {
        SmokerMode::Named("Unknown".to_string())
    }
}

impl fmt::Display for SmokerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmokerMode::Named(name) => f.write_str(name),
            SmokerMode::Code(code) => write!(f, "{code}"),
        }
    }
}

/// Body of the local controller's `GET /status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    #[serde(alias = "SetPoint")]
    pub set_point: i32,
    #[serde(default, alias = "Mode")]
    pub mode: SmokerMode,
    #[serde(default, alias = "Temps")]
    pub temps: Temps,
    #[serde(default, alias = "CurrentTime")]
    pub current_time: Option<DateTime<Utc>>,
}

/// Immutable telemetry snapshot published to the cloud endpoint.
///
/// Built fresh for every publish by [`SmokerStatus::stamp`]; the partition
/// key and timestamp come from the send-time UTC clock, never from the
/// controller's sample time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokerStatus {
    partition_key: String,
    current_time: DateTime<Utc>,
    smoker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_to_live: Option<u64>,
    set_point: i32,
    mode: SmokerMode,
    #[serde(flatten)]
    temps: Temps,
}

impl SmokerStatus {
    /// Stamp a controller status with the device identity and send time.
    pub fn stamp(
        smoker_id: &str,
        status: ControllerStatus,
        now: DateTime<Utc>,
        time_to_live: Option<u64>,
    ) -> Self {
        Self {
            partition_key: partition_key(smoker_id, now),
            current_time: now,
            smoker_id: smoker_id.to_string(),
            time_to_live,
            set_point: status.set_point,
            mode: status.mode,
            temps: status.temps,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn smoker_id(&self) -> &str {
        &self.smoker_id
    }

    pub fn time_to_live(&self) -> Option<u64> {
        self.time_to_live
    }

    pub fn set_point(&self) -> i32 {
        self.set_point
    }

    pub fn mode(&self) -> &SmokerMode {
        &self.mode
    }

    pub fn temps(&self) -> &Temps {
        &self.temps
    }

    /// One-line CSV summary used in the publish log.
    pub fn summary(&self) -> String {
        let ttl = self
            .time_to_live
            .map(|t| t.to_string())
            .unwrap_or_default();
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.partition_key,
            self.current_time.to_rfc3339(),
            self.smoker_id,
            ttl,
            self.set_point,
            self.temps.grill_temp,
            self.temps.probe1_temp,
            self.temps.probe2_temp,
            self.temps.probe3_temp,
            self.temps.probe4_temp,
        )
    }
}

/// Storage shard key: `"{smoker_id}-{yyyy-MM}"` of the given UTC instant.
pub fn partition_key(smoker_id: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", smoker_id, now.format("%Y-%m"))
}

/// Lifecycle state of the cloud connection.
///
/// Only the connection manager moves between these states, in response to
/// status notifications from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    RetryingDisconnected,
    Disabled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::RetryingDisconnected => "retrying",
            ConnectionState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Global error type spanning sensor faults, local controller failures,
/// configuration problems and serialization errors.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum InfernoError {
    #[error("Sensor fault on {channel}: {details}")]
    Sensor { channel: String, details: String },

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
