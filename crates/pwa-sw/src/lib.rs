//! # PWA Service Worker
//!
//! Versioned offline cache agent plus the service worker lifecycle it runs in.
//!
//! ## Features
//!
//! - **Versioned caches**: one cache store per deployed major version
//! - **Atomic install**: every manifest path is fetched before anything is stored
//! - **Activation sweep**: stale cache stores are deleted in parallel
//! - **Cache-only fetch**: requests are answered from cache or left unhandled
//! - **Update handshake**: a waiting version only takes over on `{action: "activate"}`
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (platform)
//!     │
//!     ├── ServiceWorkerRegistration (per scope)
//!     │       ├── installing (WorkerInstance)
//!     │       ├── waiting (WorkerInstance)
//!     │       └── active (WorkerInstance)
//!     │                 └── WorkerAgent ── Fetcher (network)
//!     │                          │
//!     └── CacheStorage ◄─────────┘
//!             └── Cache (pwa-static-<major>)
//!                     └── Request → CacheEntry
//! ```

use thiserror::Error;

pub mod agent;
pub mod cache;
pub mod container;
pub mod event;
pub mod lifecycle;
pub mod message;
pub mod registration;
pub mod script;
pub mod version;

pub use agent::{HandlerOutcome, LifecycleEvent, WorkerAgent};
pub use cache::{Cache, CacheEntry, CacheStorage, FetchResponse, MemoryCacheStorage};
pub use container::{
    ClientId, ClientInfo, ContainerOptions, ServiceWorkerContainer, ServiceWorkerEvent,
};
pub use event::ExtendableEvent;
pub use lifecycle::{LifecycleSignal, ServiceWorkerState};
pub use message::HandshakeMessage;
pub use registration::{RegistrationInfo, ServiceWorker, ServiceWorkerId};
pub use script::{FileScriptSource, ScriptSource, StaticScriptSource};
pub use version::Deployment;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Script error: {0}")]
    ScriptError(String),

    #[error("Install of {cache} failed: {reason}")]
    InstallFailed { cache: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] pwa_net::NetError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{} pending task(s) failed: {}", .0.len(), .0.join("; "))]
    PendingWorkFailed(Vec<String>),
}

impl From<pwa_common::PwaError> for ServiceWorkerError {
    fn from(err: pwa_common::PwaError) -> Self {
        Self::ScriptError(err.to_string())
    }
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_work_message_lists_failures() {
        let err = ServiceWorkerError::PendingWorkFailed(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "2 pending task(s) failed: a; b");
    }

    #[test]
    fn test_config_error_becomes_script_error() {
        let err: ServiceWorkerError = pwa_common::PwaError::InvalidVersion("x".into()).into();
        assert!(matches!(err, ServiceWorkerError::ScriptError(_)));
    }
}
