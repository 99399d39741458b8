//! Capabilities the page controller depends on.

use async_trait::async_trait;
use pwa_sw::{
    ClientId, RegistrationInfo, ServiceWorker, ServiceWorkerContainer, ServiceWorkerError,
    ServiceWorkerEvent, ServiceWorkerId,
};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use url::Url;

/// The registration boundary (navigator.serviceWorker).
#[async_trait]
pub trait WorkerPlatform: Send + Sync {
    async fn register(&self, script_url: &Url) -> Result<RegistrationInfo, ServiceWorkerError>;

    async fn update(&self, scope: &Url) -> Result<(), ServiceWorkerError>;

    /// Worker currently controlling `client`, if any.
    async fn controller(&self, client: ClientId) -> Option<ServiceWorker>;

    async fn post_message(
        &self,
        worker: ServiceWorkerId,
        data: JsonValue,
    ) -> Result<(), ServiceWorkerError>;

    /// Lifecycle events from now on.
    fn subscribe(&self) -> broadcast::Receiver<ServiceWorkerEvent>;
}

/// The page hosting the controller.
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Reload the page so it runs under the new controller.
    async fn reload(&self) -> Result<(), String>;
}

#[async_trait]
impl WorkerPlatform for ServiceWorkerContainer {
    async fn register(&self, script_url: &Url) -> Result<RegistrationInfo, ServiceWorkerError> {
        ServiceWorkerContainer::register(self, script_url).await
    }

    async fn update(&self, scope: &Url) -> Result<(), ServiceWorkerError> {
        ServiceWorkerContainer::update(self, scope).await
    }

    async fn controller(&self, client: ClientId) -> Option<ServiceWorker> {
        ServiceWorkerContainer::controller(self, client).await
    }

    async fn post_message(
        &self,
        worker: ServiceWorkerId,
        data: JsonValue,
    ) -> Result<(), ServiceWorkerError> {
        ServiceWorkerContainer::post_message(self, worker, data).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceWorkerEvent> {
        ServiceWorkerContainer::subscribe(self)
    }
}
