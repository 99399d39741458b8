//! Service worker registrations and the instances they hold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::agent::WorkerAgent;
use crate::lifecycle::{LifecycleSignal, ServiceWorkerState};
use crate::version::Deployment;
use crate::Result;

// ==================== Service Worker ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Page-visible reference to a worker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Deployment version.
    pub version: String,

    /// State when this reference was taken.
    pub state: ServiceWorkerState,
}

/// A live worker instance owned by a registration.
pub(crate) struct WorkerInstance {
    pub(crate) id: ServiceWorkerId,
    pub(crate) script_url: Url,
    pub(crate) state: ServiceWorkerState,
    pub(crate) agent: Arc<WorkerAgent>,
    /// Set by `skipWaiting()` while still installing.
    pub(crate) skip_waiting: bool,
}

impl WorkerInstance {
    pub(crate) fn new(script_url: Url, agent: WorkerAgent) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            agent: Arc::new(agent),
            skip_waiting: false,
        }
    }

    /// Apply a lifecycle signal.
    pub(crate) fn advance(&mut self, signal: LifecycleSignal) -> Result<ServiceWorkerState> {
        self.state = self.state.transition(signal)?;
        Ok(self.state)
    }

    pub(crate) fn deployment(&self) -> &Deployment {
        self.agent.deployment()
    }

    pub(crate) fn info(&self) -> ServiceWorker {
        ServiceWorker {
            id: self.id,
            script_url: self.script_url.clone(),
            version: self.deployment().version.clone(),
            state: self.state,
        }
    }
}

// ==================== Registration ====================

/// Snapshot of a registration handed to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

/// A service worker registration.
pub(crate) struct ServiceWorkerRegistration {
    /// Scope URL.
    pub(crate) scope: Url,

    /// Script URL.
    pub(crate) script_url: Url,

    /// Installing worker.
    pub(crate) installing: Option<WorkerInstance>,

    /// Waiting worker (installed but not active).
    pub(crate) waiting: Option<WorkerInstance>,

    /// Active worker.
    pub(crate) active: Option<WorkerInstance>,

    /// Last update check time.
    pub(crate) last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub(crate) fn new(scope: Url, script_url: Url) -> Self {
        Self {
            scope,
            script_url,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    pub(crate) fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            scope: self.scope.clone(),
            installing: self.installing.as_ref().map(WorkerInstance::info),
            waiting: self.waiting.as_ref().map(WorkerInstance::info),
            active: self.active.as_ref().map(WorkerInstance::info),
        }
    }

    /// The most recent instance: installing, else waiting, else active.
    pub(crate) fn newest(&self) -> Option<&WorkerInstance> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    /// Check if an update check is due.
    pub(crate) fn needs_update(&self, check_interval: Duration) -> bool {
        match self.last_update_check {
            Some(last) => last.elapsed() > check_interval,
            None => true,
        }
    }

    /// Find an instance by id, in any slot.
    pub(crate) fn instance_mut(&mut self, id: ServiceWorkerId) -> Option<&mut WorkerInstance> {
        [
            self.installing.as_mut(),
            self.waiting.as_mut(),
            self.active.as_mut(),
        ]
        .into_iter()
        .flatten()
        .find(|w| w.id == id)
    }

    pub(crate) fn holds(&self, id: ServiceWorkerId) -> bool {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .any(|w| w.id == id)
    }

    /// Mark every instance redundant and return their final states.
    pub(crate) fn unregister(&mut self) -> Vec<ServiceWorker> {
        [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                // Live instances always accept Superseded.
                let _ = worker.advance(LifecycleSignal::Superseded);
                worker.info()
            })
            .collect()
    }
}
