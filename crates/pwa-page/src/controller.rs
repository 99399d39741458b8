//! Drives a [`PageMachine`] from platform events and performs its effects.

use std::sync::Arc;

use pwa_common::PageConfig;
use pwa_sw::{ClientId, HandshakeMessage, ServiceWorkerEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::machine::{PageEffect, PageMachine, PageSignal, PageState};
use crate::platform::{PageHost, WorkerPlatform};
use crate::{AppEvent, PageError, Result};

/// Page-side controller for one open page.
pub struct PageController {
    platform: Arc<dyn WorkerPlatform>,
    host: Arc<dyn PageHost>,
    client: ClientId,
    script_url: Url,
    auto_apply: bool,
    machine: Option<PageMachine>,
    scope: Option<Url>,
    app_events: broadcast::Sender<AppEvent>,
}

impl PageController {
    /// Create a controller for the page `client` served from `origin`.
    pub fn new(
        platform: Arc<dyn WorkerPlatform>,
        host: Arc<dyn PageHost>,
        client: ClientId,
        origin: &Url,
        config: &PageConfig,
    ) -> Result<Self> {
        let script_url = origin.join(&config.script_path)?;
        let (app_events, _) = broadcast::channel(16);

        Ok(Self {
            platform,
            host,
            client,
            script_url,
            auto_apply: config.auto_apply_updates,
            machine: None,
            scope: None,
            app_events,
        })
    }

    /// Application events from now on.
    pub fn subscribe_app_events(&self) -> broadcast::Receiver<AppEvent> {
        self.app_events.subscribe()
    }

    pub(crate) fn app_event_sender(&self) -> broadcast::Sender<AppEvent> {
        self.app_events.clone()
    }

    pub fn state(&self) -> Option<&PageState> {
        self.machine.as_ref().map(PageMachine::state)
    }

    /// Scope of the registration, once started.
    pub fn scope(&self) -> Option<&Url> {
        self.scope.as_ref()
    }

    /// Register the worker script and start watching the registration.
    ///
    /// Returns the platform event stream the caller must feed back through
    /// [`handle_platform_event`](Self::handle_platform_event).
    pub async fn start(&mut self) -> Result<broadcast::Receiver<ServiceWorkerEvent>> {
        // Subscribe before registering so no lifecycle change is missed.
        let events = self.platform.subscribe();

        let first_install = self.platform.controller(self.client).await.is_none();
        let registration = self.platform.register(&self.script_url).await?;

        info!(
            scope = %registration.scope,
            first_install,
            "Service worker registered"
        );

        self.scope = Some(registration.scope);
        self.machine = Some(PageMachine::new(first_install, self.auto_apply));
        self.apply(PageSignal::Registered {
            waiting: registration.waiting,
        })
        .await?;

        Ok(events)
    }

    /// Feed one platform event into the machine.
    pub async fn handle_platform_event(&mut self, event: ServiceWorkerEvent) -> Result<()> {
        let Some(scope) = self.scope.as_ref() else {
            return Err(PageError::NotStarted);
        };
        if event.scope() != scope {
            return Ok(());
        }

        let signal = match event {
            ServiceWorkerEvent::UpdateFound { worker, .. } => {
                debug!(version = %worker.version, "Update found");
                PageSignal::UpdateFound(worker)
            }
            ServiceWorkerEvent::StateChange { worker, .. } => PageSignal::StateChanged(worker),
            ServiceWorkerEvent::ControllerChange { controller, .. } => {
                debug!(version = %controller.version, "Controller changed");
                return Ok(());
            }
        };

        self.apply(signal).await
    }

    /// Send consent to the waiting worker.
    pub async fn apply_update(&mut self) -> Result<()> {
        let machine = self.machine.as_ref().ok_or(PageError::NotStarted)?;
        if machine.pending_update().is_none() {
            return Err(PageError::NoUpdatePending);
        }
        self.apply(PageSignal::ApplyUpdate).await
    }

    /// Ask the platform to look for a newer worker script.
    pub async fn check_for_updates(&self) -> Result<()> {
        let scope = self.scope.as_ref().ok_or(PageError::NotStarted)?;
        info!(scope = %scope, "Checking for updates");
        self.platform.update(scope).await?;
        Ok(())
    }

    async fn apply(&mut self, signal: PageSignal) -> Result<()> {
        let machine = self.machine.take().ok_or(PageError::NotStarted)?;
        let (next, effects) = machine.transition(signal);
        self.machine = Some(next);

        for effect in effects {
            self.execute(effect).await?;
        }
        Ok(())
    }

    async fn execute(&self, effect: PageEffect) -> Result<()> {
        match effect {
            PageEffect::Emit(event) => {
                info!(event = event.name(), "Application event");
                // Nobody listening is fine.
                let _ = self.app_events.send(event);
            }
            PageEffect::PostActivate(worker) => {
                info!(worker = %worker, "Applying update");
                self.platform
                    .post_message(worker, HandshakeMessage::Activate.to_value())
                    .await?;
            }
            PageEffect::Reload => {
                info!("Reloading page");
                if let Err(e) = self.host.reload().await {
                    warn!(error = %e, "Reload failed");
                    return Err(PageError::Host(e));
                }
            }
        }
        Ok(())
    }
}
