//! The service worker container: registrations, clients and the job queue.
//!
//! This is the platform side of the protocol. It loads worker scripts, runs
//! install and activate jobs one at a time per registration, defers
//! activation while pages are controlled, and broadcasts lifecycle changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use pwa_net::{Fetcher, Request};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::{HandlerOutcome, LifecycleEvent, WorkerAgent};
use crate::cache::{CacheStorage, FetchResponse};
use crate::lifecycle::{LifecycleSignal, ServiceWorkerState};
use crate::registration::{
    RegistrationInfo, ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, WorkerInstance,
};
use crate::script::ScriptSource;
use crate::version::Deployment;
use crate::{Result, ServiceWorkerError};

// ==================== Clients ====================

/// Unique identifier for a client (an open page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A page as seen by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: Url,
    /// Worker controlling the page when it was attached.
    pub controller: Option<ServiceWorker>,
}

#[derive(Debug)]
struct ClientRecord {
    /// Scope of the registration controlling this client.
    controlled_by: Option<String>,
}

// ==================== Events ====================

/// Lifecycle changes broadcast to pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { scope: Url, worker: ServiceWorker },
    /// A worker changed state.
    StateChange { scope: Url, worker: ServiceWorker },
    /// Controlled pages now have a new controller.
    ControllerChange { scope: Url, controller: ServiceWorker },
}

impl ServiceWorkerEvent {
    pub fn scope(&self) -> &Url {
        match self {
            Self::UpdateFound { scope, .. }
            | Self::StateChange { scope, .. }
            | Self::ControllerChange { scope, .. } => scope,
        }
    }
}

// ==================== Container ====================

/// Container tuning.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Minimum time between update checks triggered by `register`.
    pub update_check_interval: Duration,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            update_check_interval: Duration::ZERO,
            event_capacity: 64,
        }
    }
}

struct Slot {
    scope: Url,
    /// Serializes install/activate jobs.
    jobs: Mutex<()>,
    state: Mutex<ServiceWorkerRegistration>,
    /// Signalled when an activation finishes.
    activated: Notify,
}

struct Inner {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
    caches: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    scripts: Arc<dyn ScriptSource>,
    events: broadcast::Sender<ServiceWorkerEvent>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    options: ContainerOptions,
}

/// Service worker container (navigator.serviceWorker plus the browser behind it).
#[derive(Clone)]
pub struct ServiceWorkerContainer {
    inner: Arc<Inner>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        scripts: Arc<dyn ScriptSource>,
    ) -> Self {
        Self::with_options(caches, fetcher, scripts, ContainerOptions::default())
    }

    pub fn with_options(
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        scripts: Arc<dyn ScriptSource>,
        options: ContainerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(HashMap::new()),
                clients: RwLock::new(HashMap::new()),
                caches,
                fetcher,
                scripts,
                events,
                jobs: Mutex::new(Vec::new()),
                options,
            }),
        }
    }

    /// Shared cache storage.
    pub fn caches(&self) -> Arc<dyn CacheStorage> {
        self.inner.caches.clone()
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceWorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Register a worker script.
    ///
    /// Resolves with the registration as it was before any update job runs;
    /// install and activation continue in the background.
    pub async fn register(&self, script_url: &Url) -> Result<RegistrationInfo> {
        if !matches!(script_url.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::RegistrationFailed(format!(
                "unsupported script URL {script_url}"
            )));
        }

        let scope = scope_for(script_url);
        let existing = self.inner.slot(scope.as_str()).await;

        let slot = match existing {
            Some(slot) => slot,
            None => {
                // A brand-new registration fails outright if its script cannot load.
                let config = self.inner.scripts.load(script_url).await.map_err(|e| {
                    ServiceWorkerError::RegistrationFailed(format!("{script_url}: {e}"))
                })?;
                Deployment::resolve(&config, &scope)?;

                let slot = Arc::new(Slot {
                    scope: scope.clone(),
                    jobs: Mutex::new(()),
                    activated: Notify::new(),
                    state: Mutex::new(ServiceWorkerRegistration::new(
                        scope.clone(),
                        script_url.clone(),
                    )),
                });
                self.inner
                    .slots
                    .write()
                    .await
                    .entry(scope.to_string())
                    .or_insert(slot)
                    .clone()
            }
        };

        let (info, due) = {
            let mut reg = slot.state.lock().await;
            if reg.script_url != *script_url {
                debug!(scope = %scope, script = %script_url, "Registration script changed");
                reg.script_url = script_url.clone();
            }
            (
                reg.info(),
                reg.needs_update(self.inner.options.update_check_interval),
            )
        };

        if due {
            self.spawn_update(slot).await;
        }

        Ok(info)
    }

    /// Ask the platform to check for a newer worker script.
    pub async fn update(&self, scope: &Url) -> Result<()> {
        let slot = self
            .inner
            .slot(scope.as_str())
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
        self.spawn_update(slot).await;
        Ok(())
    }

    /// Wait until every queued update job has finished.
    pub async fn wait_for_jobs(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.jobs.lock().await);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Update job aborted");
                }
            }
        }
    }

    /// Get the registration for a scope.
    pub async fn get_registration(&self, scope: &Url) -> Option<RegistrationInfo> {
        let slot = self.inner.slot(scope.as_str()).await?;
        let info = slot.state.lock().await.info();
        Some(info)
    }

    /// Get all registration scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        self.inner.slots.read().await.keys().cloned().collect()
    }

    /// Open a page. It is controlled if its scope already has an active worker.
    pub async fn attach_client(&self, url: &Url) -> ClientInfo {
        let mut controller = None;
        let mut controlled_by = None;

        if let Some(slot) = self.inner.slot_for_url(url).await {
            let reg = slot.state.lock().await;
            if let Some(active) = reg.active.as_ref() {
                controller = Some(active.info());
                controlled_by = Some(slot.scope.to_string());
            }
        }

        let id = ClientId::new();
        self.inner
            .clients
            .write()
            .await
            .insert(id, ClientRecord { controlled_by });

        debug!(client = ?id, url = %url, controlled = controller.is_some(), "Client attached");

        ClientInfo {
            id,
            url: url.clone(),
            controller,
        }
    }

    /// Close a page. Closing the last controlled page lets a waiting worker activate.
    pub async fn detach_client(&self, id: ClientId) -> Result<()> {
        let record = self
            .inner
            .clients
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id:?}")))?;

        debug!(client = ?id, "Client detached");

        let Some(scope) = record.controlled_by else {
            return Ok(());
        };
        if self.inner.controlled_clients(&scope).await > 0 {
            return Ok(());
        }
        if let Some(slot) = self.inner.slot(&scope).await {
            let _job = slot.jobs.lock().await;
            self.inner.activate_if_idle(&slot).await?;
        }
        Ok(())
    }

    /// Current controller of a page.
    pub async fn controller(&self, id: ClientId) -> Option<ServiceWorker> {
        let scope = {
            let clients = self.inner.clients.read().await;
            clients.get(&id)?.controlled_by.clone()?
        };
        let slot = self.inner.slot(&scope).await?;
        let reg = slot.state.lock().await;
        reg.active.as_ref().map(WorkerInstance::info)
    }

    /// Deliver a message to a worker instance.
    pub async fn post_message(&self, worker: ServiceWorkerId, data: JsonValue) -> Result<()> {
        let slot = self.inner.slot_holding(worker).await.ok_or_else(|| {
            ServiceWorkerError::StateError(format!("worker {worker} is redundant or unknown"))
        })?;

        let agent = {
            let reg = slot.state.lock().await;
            let found = [&reg.installing, &reg.waiting, &reg.active]
                .into_iter()
                .flatten()
                .find(|w| w.id == worker)
                .map(|instance| instance.agent.clone());
            found
        }
        .ok_or_else(|| {
            ServiceWorkerError::StateError(format!("worker {worker} is redundant or unknown"))
        })?;

        if agent.dispatch(LifecycleEvent::Message(data)).await? != HandlerOutcome::SkipWaiting {
            return Ok(());
        }

        {
            let mut reg = slot.state.lock().await;
            let installing = reg.installing.as_ref().map(|w| w.id) == Some(worker);
            if installing {
                if let Some(instance) = reg.instance_mut(worker) {
                    debug!(worker = %worker, "Skip waiting requested during install");
                    instance.skip_waiting = true;
                }
                return Ok(());
            }
        }

        let _job = slot.jobs.lock().await;
        let waiting = slot.state.lock().await.waiting.as_ref().map(|w| w.id) == Some(worker);
        if waiting {
            info!(worker = %worker, "Skip waiting requested; activating now");
            self.inner.activate_waiting(&slot).await
        } else {
            debug!(worker = %worker, "Skip waiting ignored; worker is not waiting");
            Ok(())
        }
    }

    /// Route a request through the active worker's fetch handler.
    ///
    /// `None` means unhandled: the caller falls back to its default network behaviour.
    /// A worker that is still activating answers only once its activate handler is done.
    pub async fn fetch(&self, request: &Request) -> Option<FetchResponse> {
        let slot = self.inner.slot_for_url(&request.url).await?;
        let agent = loop {
            let notified = slot.activated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let reg = slot.state.lock().await;
                let active = reg.active.as_ref()?;
                if active.state == ServiceWorkerState::Activated {
                    break active.agent.clone();
                }
                debug!(worker = %active.id, url = %request.url, "Fetch held until activation finishes");
            }
            notified.await;
        };

        match agent.dispatch(LifecycleEvent::Fetch(request.clone())).await {
            Ok(HandlerOutcome::Responded(response)) => response,
            Ok(_) => None,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch handler failed");
                None
            }
        }
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &Url) -> Result<bool> {
        let Some(slot) = self.inner.slots.write().await.remove(scope.as_str()) else {
            return Ok(false);
        };

        let _job = slot.jobs.lock().await;
        let retired = slot.state.lock().await.unregister();
        for worker in retired {
            self.inner.emit(ServiceWorkerEvent::StateChange {
                scope: slot.scope.clone(),
                worker,
            });
        }

        for record in self.inner.clients.write().await.values_mut() {
            if record.controlled_by.as_deref() == Some(scope.as_str()) {
                record.controlled_by = None;
            }
        }

        info!(scope = %scope, "Unregistered");
        Ok(true)
    }

    async fn spawn_update(&self, slot: Arc<Slot>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = inner.run_update(&slot).await {
                warn!(scope = %slot.scope, error = %e, "Update job failed");
            }
        });
        self.inner.jobs.lock().await.push(handle);
    }
}

impl Inner {
    fn emit(&self, event: ServiceWorkerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_state(&self, scope: &Url, worker: &WorkerInstance) {
        debug!(worker = %worker.id, state = %worker.state, "State change");
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope.clone(),
            worker: worker.info(),
        });
    }

    async fn slot(&self, scope: &str) -> Option<Arc<Slot>> {
        self.slots.read().await.get(scope).cloned()
    }

    /// Registration with the longest scope containing `url`.
    async fn slot_for_url(&self, url: &Url) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|(scope, _)| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, slot)| slot.clone())
    }

    async fn slot_holding(&self, worker: ServiceWorkerId) -> Option<Arc<Slot>> {
        let slots: Vec<Arc<Slot>> = self.slots.read().await.values().cloned().collect();
        for slot in slots {
            if slot.state.lock().await.holds(worker) {
                return Some(slot);
            }
        }
        None
    }

    async fn controlled_clients(&self, scope: &str) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.controlled_by.as_deref() == Some(scope))
            .count()
    }

    /// Update job: load the script and, if it changed, install it.
    async fn run_update(&self, slot: &Slot) -> Result<()> {
        let _job = slot.jobs.lock().await;

        let (script_url, current) = {
            let mut reg = slot.state.lock().await;
            reg.last_update_check = Some(Instant::now());
            (
                reg.script_url.clone(),
                reg.newest().map(|w| w.deployment().clone()),
            )
        };

        let config = self.scripts.load(&script_url).await?;
        let deployment = Deployment::resolve(&config, &slot.scope)?;
        if current.as_ref() == Some(&deployment) {
            debug!(scope = %slot.scope, version = %deployment.version, "Worker script unchanged");
            return Ok(());
        }

        let version = deployment.version.clone();
        let agent = WorkerAgent::new(deployment, self.caches.clone(), self.fetcher.clone());
        let mut worker = WorkerInstance::new(script_url, agent);
        let agent = worker.agent.clone();

        self.emit(ServiceWorkerEvent::UpdateFound {
            scope: slot.scope.clone(),
            worker: worker.info(),
        });
        worker.advance(LifecycleSignal::StartInstall)?;
        {
            let mut reg = slot.state.lock().await;
            self.emit_state(&slot.scope, &worker);
            reg.installing = Some(worker);
        }

        let installed = agent.dispatch(LifecycleEvent::Install).await;

        let skip_waiting = {
            let mut reg = slot.state.lock().await;
            let mut worker = reg.installing.take().ok_or_else(|| {
                ServiceWorkerError::StateError("installing worker disappeared".to_string())
            })?;

            if let Err(e) = installed {
                warn!(scope = %slot.scope, version = %version, error = %e, "Install failed; current version stays active");
                worker.advance(LifecycleSignal::InstallFailed)?;
                self.emit_state(&slot.scope, &worker);
                return Ok(());
            }

            // One pending instance at a time: the newly installed one retires the waiting one.
            if let Some(mut replaced) = reg.waiting.take() {
                replaced.advance(LifecycleSignal::Superseded)?;
                self.emit_state(&slot.scope, &replaced);
            }
            worker.advance(LifecycleSignal::InstallSucceeded)?;
            self.emit_state(&slot.scope, &worker);
            let skip_waiting = worker.skip_waiting;
            reg.waiting = Some(worker);
            skip_waiting
        };

        if skip_waiting {
            self.activate_waiting(slot).await
        } else {
            self.activate_if_idle(slot).await
        }
    }

    /// Activate the waiting worker unless pages still depend on the active one.
    ///
    /// Caller holds the slot's job lock.
    async fn activate_if_idle(&self, slot: &Slot) -> Result<()> {
        let (has_waiting, has_active) = {
            let reg = slot.state.lock().await;
            (reg.waiting.is_some(), reg.active.is_some())
        };
        if !has_waiting {
            return Ok(());
        }

        if has_active {
            let clients = self.controlled_clients(slot.scope.as_str()).await;
            if clients > 0 {
                info!(scope = %slot.scope, clients, "Update installed; waiting for consent or for controlled pages to close");
                return Ok(());
            }
        }

        self.activate_waiting(slot).await
    }

    /// Promote the waiting worker, retiring the active one.
    ///
    /// Caller holds the slot's job lock.
    async fn activate_waiting(&self, slot: &Slot) -> Result<()> {
        let (agent, id) = {
            let mut reg = slot.state.lock().await;
            let Some(mut worker) = reg.waiting.take() else {
                return Ok(());
            };
            if let Some(mut old) = reg.active.take() {
                old.advance(LifecycleSignal::Superseded)?;
                self.emit_state(&slot.scope, &old);
            }
            worker.advance(LifecycleSignal::StartActivate)?;
            self.emit_state(&slot.scope, &worker);

            let handle = (worker.agent.clone(), worker.id);
            reg.active = Some(worker);
            handle
        };

        if let Err(e) = agent.dispatch(LifecycleEvent::Activate).await {
            warn!(scope = %slot.scope, error = %e, "Activate handler failed; activation continues");
        }

        let finished = self.finish_activation(slot, id).await;
        slot.activated.notify_waiters();
        let controller = finished?;

        if self.controlled_clients(slot.scope.as_str()).await > 0 {
            self.emit(ServiceWorkerEvent::ControllerChange {
                scope: slot.scope.clone(),
                controller: controller.clone(),
            });
        }

        info!(scope = %slot.scope, version = %controller.version, "Version activated");
        Ok(())
    }

    async fn finish_activation(&self, slot: &Slot, id: ServiceWorkerId) -> Result<ServiceWorker> {
        let mut reg = slot.state.lock().await;
        let worker = reg
            .active
            .as_mut()
            .filter(|w| w.id == id)
            .ok_or_else(|| {
                ServiceWorkerError::StateError("activating worker was replaced".to_string())
            })?;
        worker.advance(LifecycleSignal::ActivateFinished)?;
        self.emit_state(&slot.scope, worker);
        Ok(worker.info())
    }
}

/// Default scope: the directory containing the script.
fn scope_for(script_url: &Url) -> Url {
    let mut scope = script_url.clone();
    let dir = script_url
        .path()
        .rfind('/')
        .map_or("/", |idx| &script_url.path()[..=idx]);
    scope.set_path(dir);
    scope.set_query(None);
    scope.set_fragment(None);
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::message::HandshakeMessage;
    use crate::script::StaticScriptSource;
    use pwa_common::AgentConfig;
    use pwa_net::MemoryFetcher;

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    fn script() -> Url {
        origin().join("/serviceWorker.js").unwrap()
    }

    fn config(version: &str) -> AgentConfig {
        AgentConfig {
            version: version.to_string(),
            manifest: vec!["/".into(), "/app.js".into()],
            ..AgentConfig::default()
        }
    }

    struct Harness {
        container: ServiceWorkerContainer,
        scripts: Arc<StaticScriptSource>,
        caches: MemoryCacheStorage,
    }

    async fn harness(version: &str) -> Harness {
        let fetcher = Arc::new(MemoryFetcher::new(origin()));
        fetcher.serve("/", "<html>").await.unwrap();
        fetcher.serve("/app.js", "app()").await.unwrap();

        let scripts = Arc::new(StaticScriptSource::new());
        scripts.publish(&script(), config(version)).await;

        let caches = MemoryCacheStorage::new();
        let container =
            ServiceWorkerContainer::new(Arc::new(caches.clone()), fetcher, scripts.clone());

        Harness {
            container,
            scripts,
            caches,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_scope_for_script() {
        assert_eq!(scope_for(&script()).as_str(), "https://app.example/");
        let nested = Url::parse("https://app.example/app/sw.js?v=1").unwrap();
        assert_eq!(scope_for(&nested).as_str(), "https://app.example/app/");
    }

    #[tokio::test]
    async fn test_container_register() {
        let h = harness("1.0.0").await;

        let info = h.container.register(&script()).await.unwrap();
        assert!(info.active.is_none());

        h.container.wait_for_jobs().await;

        let info = h.container.get_registration(&origin()).await.unwrap();
        assert_eq!(info.active.unwrap().state, ServiceWorkerState::Activated);
        assert_eq!(h.container.get_registrations().await.len(), 1);
        assert_eq!(h.caches.keys().await.unwrap(), vec!["pwa-static-1"]);
    }

    #[tokio::test]
    async fn test_register_rejects_missing_script() {
        let h = harness("1.0.0").await;
        let other = origin().join("/missing.js").unwrap();

        let result = h.container.register(&other).await;
        assert!(matches!(result, Err(ServiceWorkerError::RegistrationFailed(_))));
        assert!(h.container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_install_event_sequence() {
        let h = harness("1.0.0").await;
        let mut rx = h.container.subscribe();

        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;

        let states: Vec<ServiceWorkerState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::StateChange { worker, .. } => Some(worker.state),
                _ => None,
            })
            .collect();

        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_script_is_not_reinstalled() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;

        let mut rx = h.container.subscribe();
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_update_waits_while_page_is_controlled() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;

        let page = h.container.attach_client(&origin()).await;
        assert_eq!(page.controller.as_ref().unwrap().version, "1.0.0");

        h.scripts.publish(&script(), config("2.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        let info = h.container.get_registration(&origin()).await.unwrap();
        assert_eq!(info.active.unwrap().version, "1.0.0");
        assert_eq!(info.waiting.unwrap().version, "2.0.0");
        assert_eq!(h.container.controller(page.id).await.unwrap().version, "1.0.0");
    }

    #[tokio::test]
    async fn test_closing_last_page_activates_waiting() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;
        let page = h.container.attach_client(&origin()).await;

        h.scripts.publish(&script(), config("2.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        h.container.detach_client(page.id).await.unwrap();

        let info = h.container.get_registration(&origin()).await.unwrap();
        assert_eq!(info.active.unwrap().version, "2.0.0");
        assert!(info.waiting.is_none());
        assert_eq!(h.caches.keys().await.unwrap(), vec!["pwa-static-2"]);
    }

    #[tokio::test]
    async fn test_activate_message_skips_waiting() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;
        let page = h.container.attach_client(&origin()).await;

        h.scripts.publish(&script(), config("2.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        let waiting = h
            .container
            .get_registration(&origin())
            .await
            .unwrap()
            .waiting
            .unwrap();

        let mut rx = h.container.subscribe();
        h.container
            .post_message(waiting.id, HandshakeMessage::Activate.to_value())
            .await
            .unwrap();

        assert_eq!(h.container.controller(page.id).await.unwrap().version, "2.0.0");
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServiceWorkerEvent::ControllerChange { controller, .. } if controller.id == waiting.id)));
    }

    #[tokio::test]
    async fn test_unrecognised_message_does_not_activate() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;
        let _page = h.container.attach_client(&origin()).await;

        h.scripts.publish(&script(), config("2.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        let waiting = h
            .container
            .get_registration(&origin())
            .await
            .unwrap()
            .waiting
            .unwrap();
        h.container
            .post_message(waiting.id, serde_json::json!({ "action": "refresh" }))
            .await
            .unwrap();

        let info = h.container.get_registration(&origin()).await.unwrap();
        assert_eq!(info.waiting.unwrap().id, waiting.id);
    }

    #[tokio::test]
    async fn test_message_to_redundant_worker_fails() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;
        let first = h
            .container
            .get_registration(&origin())
            .await
            .unwrap()
            .active
            .unwrap();

        h.scripts.publish(&script(), config("2.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        let result = h
            .container
            .post_message(first.id, HandshakeMessage::Activate.to_value())
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::StateError(_))));
    }

    #[tokio::test]
    async fn test_newer_install_retires_waiting_worker() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;
        let _page = h.container.attach_client(&origin()).await;

        h.scripts.publish(&script(), config("2.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        let mut rx = h.container.subscribe();
        h.scripts.publish(&script(), config("3.0.0")).await;
        h.container.update(&origin()).await.unwrap();
        h.container.wait_for_jobs().await;

        let versions: Vec<(String, ServiceWorkerState)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::StateChange { worker, .. } => {
                    Some((worker.version, worker.state))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            versions,
            vec![
                ("3.0.0".to_string(), ServiceWorkerState::Installing),
                ("2.0.0".to_string(), ServiceWorkerState::Redundant),
                ("3.0.0".to_string(), ServiceWorkerState::Installed),
            ]
        );

        let info = h.container.get_registration(&origin()).await.unwrap();
        assert_eq!(info.active.unwrap().version, "1.0.0");
        assert_eq!(info.waiting.unwrap().version, "3.0.0");
    }

    #[tokio::test]
    async fn test_fetch_through_active_worker() {
        let h = harness("1.0.0").await;
        let request = Request::get_path(&origin(), "/app.js").unwrap();

        assert!(h.container.fetch(&request).await.is_none());

        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;

        let response = h.container.fetch(&request).await.unwrap();
        assert_eq!(response.body, b"app()".to_vec());

        let miss = Request::get_path(&origin(), "/other.js").unwrap();
        assert!(h.container.fetch(&miss).await.is_none());
    }

    #[tokio::test]
    async fn test_container_unregister() {
        let h = harness("1.0.0").await;
        h.container.register(&script()).await.unwrap();
        h.container.wait_for_jobs().await;
        let page = h.container.attach_client(&origin()).await;

        assert!(h.container.unregister(&origin()).await.unwrap());
        assert!(!h.container.unregister(&origin()).await.unwrap());
        assert!(h.container.get_registrations().await.is_empty());
        assert!(h.container.controller(page.id).await.is_none());
    }

    #[tokio::test]
    async fn test_detach_unknown_client() {
        let h = harness("1.0.0").await;
        let page = h.container.attach_client(&origin()).await;

        h.container.detach_client(page.id).await.unwrap();
        assert!(h.container.detach_client(page.id).await.is_err());
    }
}
