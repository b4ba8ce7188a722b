//! [`ControllerClient`] – HTTP client for the local smoker controller API.
//!
//! The controller serves its state under a fixed base URL
//! (`http://localhost:5000/api/` by default):
//!
//! | Request | Result |
//! |---|---|
//! | `GET status` | [`ControllerStatus`] JSON |
//! | `GET setpoint` | raw setpoint body |
//! | `POST setpoint` | JSON integer body; sets the setpoint |
//! | `GET temps` | raw per-channel temperature JSON |
//!
//! # Example
//!
//! ```rust,no_run
//! use inferno_runtime::controller::{ControllerClient, StatusSource};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = ControllerClient::new("http://localhost:5000/api/")?;
//! let status = controller.status().await?;
//! println!("setpoint {}", status.set_point);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use inferno_types::ControllerStatus;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from talking to the local controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The HTTP request failed or returned an error status.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body could not be interpreted.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("invalid controller URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Anything that can report the controller's current status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ControllerError`] when the status cannot be fetched or parsed.
    async fn status(&self) -> Result<ControllerStatus, ControllerError>;
}

/// The full local control surface used by remote commands.
///
/// The `*_raw` methods return the controller's response body untouched so
/// it can be relayed to the remote caller as-is.
#[async_trait]
pub trait SmokerController: StatusSource {
    async fn setpoint_raw(&self) -> Result<String, ControllerError>;

    async fn set_setpoint(&self, set_point: i32) -> Result<(), ControllerError>;

    async fn temps_raw(&self) -> Result<String, ControllerError>;

    async fn status_raw(&self) -> Result<String, ControllerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ControllerClient
// ─────────────────────────────────────────────────────────────────────────────

/// Default base URL of the local controller API.
pub const DEFAULT_CONTROLLER_URL: &str = "http://localhost:5000/api/";

/// [`SmokerController`] over HTTP.  Construct once and share.
#[derive(Debug, Clone)]
pub struct ControllerClient {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl ControllerClient {
    /// Create a client for `base_url`.  A missing trailing `/` is added so
    /// relative endpoint paths resolve under it.
    ///
    /// # Errors
    ///
    /// [`ControllerError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, ControllerError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url =
            reqwest::Url::parse(&normalized).map_err(|e| ControllerError::InvalidUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, ControllerError> {
        self.base_url
            .join(path)
            .map_err(|e| ControllerError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                reason: e.to_string(),
            })
    }

    async fn get_text(&self, path: &str) -> Result<String, ControllerError> {
        let text = self
            .client
            .get(self.endpoint(path)?)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }
}

#[async_trait]
impl StatusSource for ControllerClient {
    async fn status(&self) -> Result<ControllerStatus, ControllerError> {
        let body = self.get_text("status").await?;
        serde_json::from_str(&body).map_err(|e| ControllerError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl SmokerController for ControllerClient {
    async fn setpoint_raw(&self) -> Result<String, ControllerError> {
        self.get_text("setpoint").await
    }

    async fn set_setpoint(&self, set_point: i32) -> Result<(), ControllerError> {
        self.client
            .post(self.endpoint("setpoint")?)
            .json(&set_point)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn temps_raw(&self) -> Result<String, ControllerError> {
        self.get_text("temps").await
    }

    async fn status_raw(&self) -> Result<String, ControllerError> {
        self.get_text("status").await
    }
}
