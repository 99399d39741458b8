//! # PWA Page Controller
//!
//! The page side of the update handshake. A page registers the worker
//! script, watches the registration, tells the application when an update
//! is waiting, sends consent when asked to, and reloads once the new
//! version has taken over.
//!
//! The decision logic lives in [`PageMachine`], a pure transition function.
//! [`PageController`] feeds it platform events and executes the effects it
//! returns; [`PageSession`] runs a controller as a task.

use serde::Serialize;
use thiserror::Error;

pub mod controller;
pub mod machine;
pub mod platform;
pub mod session;

pub use controller::PageController;
pub use machine::{PageEffect, PageMachine, PageSignal, PageState};
pub use platform::{PageHost, WorkerPlatform};
pub use session::{PageSession, UserAction};

use pwa_sw::ServiceWorker;

// ==================== Application Events ====================

/// Events published to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "worker")]
pub enum AppEvent {
    /// First installation finished; the app now works offline.
    #[serde(rename = "pwa:installed")]
    Installed,

    /// A new version is installed and waiting for consent.
    #[serde(rename = "pwa:update")]
    UpdateAvailable(ServiceWorker),

    /// The new version is in control; the page reloads.
    #[serde(rename = "pwa:updated")]
    Updated,
}

impl AppEvent {
    /// Event name as seen by application code.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Installed => "pwa:installed",
            Self::UpdateAvailable(_) => "pwa:update",
            Self::Updated => "pwa:updated",
        }
    }
}

// ==================== Errors ====================

/// Page controller errors.
#[derive(Error, Debug)]
pub enum PageError {
    #[error("Platform error: {0}")]
    Platform(#[from] pwa_sw::ServiceWorkerError),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Invalid script URL: {0}")]
    InvalidScript(#[from] url::ParseError),

    #[error("No update is waiting")]
    NoUpdatePending,

    #[error("Controller not started")]
    NotStarted,

    #[error("Session closed")]
    Closed,
}

impl PageError {
    /// Get the error category for logging/metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Platform(_) => "platform",
            Self::Host(_) => "host",
            Self::InvalidScript(_) => "config",
            Self::NoUpdatePending | Self::NotStarted => "state",
            Self::Closed => "session",
        }
    }
}

/// Result type alias for page operations.
pub type Result<T> = std::result::Result<T, PageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_event_names() {
        assert_eq!(AppEvent::Installed.name(), "pwa:installed");
        assert_eq!(AppEvent::Updated.name(), "pwa:updated");
    }

    #[test]
    fn test_app_event_serializes_with_name() {
        let json = serde_json::to_value(AppEvent::Updated).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "pwa:updated" }));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(PageError::NoUpdatePending.category(), "state");
        assert_eq!(PageError::Host("x".into()).category(), "host");
        assert_eq!(PageError::Closed.to_string(), "Session closed");
    }
}
