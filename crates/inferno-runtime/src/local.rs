//! [`LocalController`] – an in-process controller over the RTD array.
//!
//! Serves the same surface as the HTTP controller, but answers from the
//! sampling pipeline directly and keeps the setpoint in memory.  Used for
//! bench runs without the controller service.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use inferno_hal::RtdArray;
use inferno_types::{ControllerStatus, SmokerMode};
use tracing::info;

use crate::controller::{ControllerError, SmokerController, StatusSource};

/// Setpoint a fresh [`LocalController`] starts with.
pub const DEFAULT_SET_POINT: i32 = 225;

pub struct LocalController {
    sensors: Arc<RtdArray>,
    set_point: AtomicI32,
}

impl LocalController {
    pub fn new(sensors: Arc<RtdArray>) -> Self {
        Self {
            sensors,
            set_point: AtomicI32::new(DEFAULT_SET_POINT),
        }
    }

    fn snapshot(&self) -> ControllerStatus {
        ControllerStatus {
            set_point: self.set_point.load(Ordering::Relaxed),
            mode: SmokerMode::Named("Smoke".to_string()),
            temps: self.sensors.temps(),
            current_time: Some(Utc::now()),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ControllerError> {
    serde_json::to_string(value).map_err(|e| ControllerError::BadResponse(e.to_string()))
}

#[async_trait]
impl StatusSource for LocalController {
    async fn status(&self) -> Result<ControllerStatus, ControllerError> {
        Ok(self.snapshot())
    }
}

#[async_trait]
impl SmokerController for LocalController {
    async fn setpoint_raw(&self) -> Result<String, ControllerError> {
        Ok(self.set_point.load(Ordering::Relaxed).to_string())
    }

    async fn set_setpoint(&self, set_point: i32) -> Result<(), ControllerError> {
        let previous = self.set_point.swap(set_point, Ordering::Relaxed);
        info!(previous, set_point, "local setpoint changed");
        Ok(())
    }

    async fn temps_raw(&self) -> Result<String, ControllerError> {
        to_json(&self.sensors.temps())
    }

    async fn status_raw(&self) -> Result<String, ControllerError> {
        to_json(&self.snapshot())
    }
}
