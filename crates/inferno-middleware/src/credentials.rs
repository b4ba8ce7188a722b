//! Device connection strings and the ordered credential list.
//!
//! A connection string is a `;`-separated list of `Key=Value` pairs:
//!
//! ```text
//! HostName=hub.example.net;DeviceId=inferno1;SharedAccessKey=c2VjcmV0
//! ```
//!
//! Secrets are zeroed on drop and never appear in `Debug` or `Display`
//! output.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use zeroize::Zeroizing;

/// Why a connection string was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("connection string is empty")]
    Empty,

    #[error("segment {0} is not of the form Key=Value")]
    MalformedSegment(usize),

    #[error("connection string is missing {0}")]
    Missing(&'static str),

    #[error("connection string sets both SharedAccessKey and SharedAccessSignature")]
    ConflictingSecrets,

    #[error("no credentials were supplied")]
    NoCredentials,
}

#[derive(Clone, PartialEq, Eq)]
enum Secret {
    Key(Zeroizing<String>),
    Signature(Zeroizing<String>),
}

/// A parsed device connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    host_name: String,
    device_id: String,
    module_id: Option<String>,
    gateway_host_name: Option<String>,
    secret: Secret,
}

impl ConnectionString {
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    pub fn gateway_host_name(&self) -> Option<&str> {
        self.gateway_host_name.as_deref()
    }

    pub fn shared_access_key(&self) -> Option<&str> {
        match &self.secret {
            Secret::Key(k) => Some(k.as_str()),
            Secret::Signature(_) => None,
        }
    }

    pub fn shared_access_signature(&self) -> Option<&str> {
        match &self.secret {
            Secret::Signature(s) => Some(s.as_str()),
            Secret::Key(_) => None,
        }
    }

    /// The raw secret, whichever kind it is.
    pub fn secret(&self) -> &str {
        match &self.secret {
            Secret::Key(s) | Secret::Signature(s) => s.as_str(),
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut host_name = None;
        let mut device_id = None;
        let mut module_id = None;
        let mut gateway_host_name = None;
        let mut key = None;
        let mut signature = None;

        for (index, segment) in s.split(';').enumerate() {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment
                .split_once('=')
                .ok_or(ConnectionStringError::MalformedSegment(index))?;
            let value = value.trim().to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "hostname" => host_name = Some(value),
                "deviceid" => device_id = Some(value),
                "moduleid" => module_id = Some(value),
                "gatewayhostname" => gateway_host_name = Some(value),
                "sharedaccesskey" => key = Some(Zeroizing::new(value)),
                "sharedaccesssignature" => signature = Some(Zeroizing::new(value)),
                // Unknown keys are tolerated so newer strings keep parsing.
                _ => {}
            }
        }

        let secret = match (key, signature) {
            (Some(_), Some(_)) => return Err(ConnectionStringError::ConflictingSecrets),
            (Some(k), None) => Secret::Key(k),
            (None, Some(s)) => Secret::Signature(s),
            (None, None) => return Err(ConnectionStringError::Missing("SharedAccessKey")),
        };

        Ok(Self {
            host_name: host_name
                .filter(|h| !h.is_empty())
                .ok_or(ConnectionStringError::Missing("HostName"))?,
            device_id: device_id
                .filter(|d| !d.is_empty())
                .ok_or(ConnectionStringError::Missing("DeviceId"))?,
            module_id,
            gateway_host_name,
            secret,
        })
    }
}

impl fmt::Display for ConnectionString {
    /// Redacted form: `HostName=…;DeviceId=…;SharedAccessKey=***`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostName={};DeviceId={}", self.host_name, self.device_id)?;
        if let Some(module) = &self.module_id {
            write!(f, ";ModuleId={module}")?;
        }
        match self.secret {
            Secret::Key(_) => f.write_str(";SharedAccessKey=***"),
            Secret::Signature(_) => f.write_str(";SharedAccessSignature=***"),
        }
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("module_id", &self.module_id)
            .field("gateway_host_name", &self.gateway_host_name)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Ordered list of credentials, tried front to back.
///
/// A credential the endpoint rejects is removed for the rest of the
/// process; nothing is ever re-added.
#[derive(Debug, Clone)]
pub struct CredentialQueue {
    entries: VecDeque<ConnectionString>,
}

impl CredentialQueue {
    /// # Errors
    ///
    /// [`ConnectionStringError::NoCredentials`] for an empty list.
    pub fn new(entries: Vec<ConnectionString>) -> Result<Self, ConnectionStringError> {
        if entries.is_empty() {
            return Err(ConnectionStringError::NoCredentials);
        }
        Ok(Self {
            entries: entries.into(),
        })
    }

    /// Parse every string in order.
    ///
    /// # Errors
    ///
    /// The first parse failure, or [`ConnectionStringError::NoCredentials`].
    pub fn parse_all<I, S>(raw: I) -> Result<Self, ConnectionStringError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = raw
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// The credential currently in use.
    pub fn current(&self) -> Option<&ConnectionString> {
        self.entries.front()
    }

    /// Drop the current credential and return it.
    pub fn discard_current(&mut self) -> Option<ConnectionString> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Redacted view of the remaining credentials, for logging.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = "HostName=hub.example.net;DeviceId=inferno1;SharedAccessKey=cHJpbWFyeQ==";
    const SECONDARY: &str =
        "HostName=hub.example.net;DeviceId=inferno1;SharedAccessKey=c2Vjb25kYXJ5";

    #[test]
    fn parses_key_based_string() {
        let cs: ConnectionString = PRIMARY.parse().unwrap();
        assert_eq!(cs.host_name(), "hub.example.net");
        assert_eq!(cs.device_id(), "inferno1");
        // Base64 padding survives the first-`=` split.
        assert_eq!(cs.shared_access_key(), Some("cHJpbWFyeQ=="));
        assert_eq!(cs.shared_access_signature(), None);
        assert_eq!(cs.module_id(), None);
    }

    #[test]
    fn keys_are_case_insensitive_and_optional_fields_parse() {
        let cs: ConnectionString =
            "hostname=h;deviceId=d;ModuleId=m;GatewayHostName=gw;SharedAccessSignature=sig;"
                .parse()
                .unwrap();
        assert_eq!(cs.module_id(), Some("m"));
        assert_eq!(cs.gateway_host_name(), Some("gw"));
        assert_eq!(cs.shared_access_signature(), Some("sig"));
        assert_eq!(cs.secret(), "sig");
    }

    #[test]
    fn rejects_incomplete_strings() {
        assert_eq!(
            "".parse::<ConnectionString>(),
            Err(ConnectionStringError::Empty)
        );
        assert_eq!(
            "HostName=h;SharedAccessKey=k".parse::<ConnectionString>(),
            Err(ConnectionStringError::Missing("DeviceId"))
        );
        assert_eq!(
            "HostName=h;DeviceId=d".parse::<ConnectionString>(),
            Err(ConnectionStringError::Missing("SharedAccessKey"))
        );
        assert_eq!(
            "HostName=h;garbage;DeviceId=d".parse::<ConnectionString>(),
            Err(ConnectionStringError::MalformedSegment(1))
        );
        assert_eq!(
            "HostName=h;DeviceId=d;SharedAccessKey=k;SharedAccessSignature=s"
                .parse::<ConnectionString>(),
            Err(ConnectionStringError::ConflictingSecrets)
        );
    }

    #[test]
    fn secrets_never_leak_into_formatting() {
        let cs: ConnectionString = PRIMARY.parse().unwrap();
        let shown = format!("{cs} {cs:?}");
        assert!(!shown.contains("cHJpbWFyeQ"), "{shown}");
        assert!(shown.contains("SharedAccessKey=***"));
        assert!(shown.contains("[REDACTED]"));
    }

    #[test]
    fn queue_is_consumed_front_to_back() {
        let mut queue = CredentialQueue::parse_all([PRIMARY, SECONDARY]).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.current().unwrap().shared_access_key(), Some("cHJpbWFyeQ=="));

        let dropped = queue.discard_current().unwrap();
        assert_eq!(dropped.shared_access_key(), Some("cHJpbWFyeQ=="));
        assert_eq!(queue.current().unwrap().shared_access_key(), Some("c2Vjb25kYXJ5"));

        queue.discard_current();
        assert!(queue.is_empty());
        assert!(queue.current().is_none());
        assert!(queue.discard_current().is_none());
    }

    #[test]
    fn empty_queue_is_refused() {
        assert_eq!(
            CredentialQueue::parse_all(Vec::<String>::new()).unwrap_err(),
            ConnectionStringError::NoCredentials
        );
    }

    #[test]
    fn snapshot_is_redacted() {
        let queue = CredentialQueue::parse_all([PRIMARY]).unwrap();
        assert_eq!(
            queue.snapshot(),
            vec!["HostName=hub.example.net;DeviceId=inferno1;SharedAccessKey=***".to_string()]
        );
    }
}
