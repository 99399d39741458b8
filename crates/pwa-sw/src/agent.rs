//! The worker agent: lifecycle handlers for one deployed version.
//!
//! Handlers never touch platform state directly. Install and activate register
//! work on an [`ExtendableEvent`]; fetch answers from cache; message returns a
//! directive the platform applies.

use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use pwa_net::{Fetcher, Request};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStorage, FetchResponse};
use crate::event::ExtendableEvent;
use crate::message::HandshakeMessage;
use crate::version::Deployment;
use crate::{Result, ServiceWorkerError};

/// Lifecycle signals delivered to an agent instance.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(JsonValue),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch(_) => "fetch",
            Self::Message(_) => "message",
        }
    }
}

/// Result of dispatching one lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Install or activate work completed.
    Settled,
    /// Fetch handled: cached response, or `None` to fall through to the network.
    Responded(Option<FetchResponse>),
    /// The page asked this instance to stop waiting.
    SkipWaiting,
    /// Message not understood.
    Ignored,
}

/// Worker agent for one deployment.
pub struct WorkerAgent {
    deployment: Arc<Deployment>,
    caches: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl WorkerAgent {
    pub fn new(
        deployment: Deployment,
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            deployment: Arc::new(deployment),
            caches,
            fetcher,
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Route a lifecycle event to its handler and wait for completion.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<HandlerOutcome> {
        debug!(event = event.name(), version = %self.deployment.version, "Dispatching");

        match event {
            LifecycleEvent::Install => {
                let mut ext = ExtendableEvent::new("install");
                self.on_install(&mut ext);
                ext.settle().await?;
                Ok(HandlerOutcome::Settled)
            }
            LifecycleEvent::Activate => {
                let mut ext = ExtendableEvent::new("activate");
                self.on_activate(&mut ext);
                ext.settle().await?;
                Ok(HandlerOutcome::Settled)
            }
            LifecycleEvent::Fetch(request) => Ok(HandlerOutcome::Responded(
                self.on_fetch(&request).await,
            )),
            LifecycleEvent::Message(data) => Ok(match self.on_message(&data) {
                Some(HandshakeMessage::Activate) => HandlerOutcome::SkipWaiting,
                None => HandlerOutcome::Ignored,
            }),
        }
    }

    /// Populate this version's cache store with the whole manifest.
    pub fn on_install(&self, event: &mut ExtendableEvent) {
        info!("Installing version {}...", self.deployment.version);

        let deployment = self.deployment.clone();
        let caches = self.caches.clone();
        let fetcher = self.fetcher.clone();

        event.wait_until(async move { populate(&deployment, caches.as_ref(), fetcher.as_ref()).await });
    }

    /// Delete every cache store that does not belong to this version.
    pub fn on_activate(&self, event: &mut ExtendableEvent) {
        let deployment = self.deployment.clone();
        let caches = self.caches.clone();

        event.wait_until(async move { prune(&deployment, caches).await });
    }

    /// Answer a request from any cache store. Never writes.
    pub async fn on_fetch(&self, request: &Request) -> Option<FetchResponse> {
        match self.caches.match_request(request).await {
            Ok(Some(entry)) => {
                info!("[Cache Hit] {} {}", request.method, request.url);
                Some(FetchResponse::from_cache(&entry))
            }
            Ok(None) => {
                debug!(url = %request.url, "Cache miss, falling through to network");
                None
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Interpret a posted message.
    pub fn on_message(&self, data: &JsonValue) -> Option<HandshakeMessage> {
        let message = HandshakeMessage::parse(data);
        if message.is_none() {
            debug!(%data, "Ignoring unrecognised message");
        }
        message
    }
}

async fn populate(
    deployment: &Deployment,
    caches: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
) -> Result<()> {
    let cache_name = deployment.cache_name.as_str();
    caches.open(cache_name).await?;

    let fetches = deployment.manifest.iter().map(|url| async move {
        let request = Request::get(url.clone());
        let response = fetcher.fetch(&request).await.map_err(|e| {
            warn!(url = %url, transient = e.is_transient(), error = %e, "Manifest fetch failed");
            ServiceWorkerError::InstallFailed {
                cache: cache_name.to_string(),
                reason: format!("{url}: {e}"),
            }
        })?;

        if !response.ok() {
            warn!(url = %url, status = %response.status, "Manifest fetch returned error status");
            return Err(ServiceWorkerError::InstallFailed {
                cache: cache_name.to_string(),
                reason: format!("{url}: status {}", response.status),
            });
        }

        Ok(CacheEntry::from_response(&request, &response))
    });

    let entries = try_join_all(fetches).await?;
    let count = entries.len();
    caches.put_all(cache_name, entries).await?;

    info!(cache = cache_name, entries = count, "Version {} installed", deployment.version);
    Ok(())
}

async fn prune(deployment: &Deployment, caches: Arc<dyn CacheStorage>) -> Result<()> {
    let names = caches.keys().await?;

    let deletions = names
        .into_iter()
        .filter(|name| !deployment.owns_cache(name))
        .map(|name| {
            let caches = caches.clone();
            async move {
                match caches.delete(&name).await {
                    Ok(true) => info!("Deleted old cache \"{}\"", name),
                    Ok(false) => debug!(cache = %name, "Cache already deleted"),
                    Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
                }
            }
        });

    join_all(deletions).await;
    Ok(())
}
