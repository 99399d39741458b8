//! Extendable lifecycle events.
//!
//! Handlers register their asynchronous work with [`ExtendableEvent::wait_until`].
//! The platform keeps the worker alive until [`ExtendableEvent::settle`] has
//! joined every registered future.

use std::future::Future;

use futures::future::{join_all, BoxFuture};
use tracing::debug;

use crate::{Result, ServiceWorkerError};

/// Completion token for an `install` or `activate` event.
pub struct ExtendableEvent {
    kind: &'static str,
    pending: Vec<BoxFuture<'static, Result<()>>>,
}

impl ExtendableEvent {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            pending: Vec::new(),
        }
    }

    /// Event name ("install", "activate").
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Extend the event's lifetime until `work` resolves.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.pending.push(Box::pin(work));
    }

    /// Number of registered futures.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Run every registered future to completion and aggregate failures.
    ///
    /// A single failure is returned as-is; several are folded into
    /// [`ServiceWorkerError::PendingWorkFailed`].
    pub async fn settle(self) -> Result<()> {
        let count = self.pending.len();
        let results = join_all(self.pending).await;

        let mut failures: Vec<ServiceWorkerError> =
            results.into_iter().filter_map(|r| r.err()).collect();

        debug!(event = self.kind, count, failed = failures.len(), "Event settled");

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(ServiceWorkerError::PendingWorkFailed(
                failures.iter().map(|e| e.to_string()).collect(),
            )),
        }
    }
}

impl std::fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settle_without_work() {
        let event = ExtendableEvent::new("install");
        assert_eq!(event.pending(), 0);
        assert!(event.settle().await.is_ok());
    }

    #[tokio::test]
    async fn test_settle_runs_all_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new("activate");

        for _ in 0..3 {
            let counter = counter.clone();
            event.wait_until(async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert_eq!(event.pending(), 3);
        event.settle().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_failure_passes_through() {
        let mut event = ExtendableEvent::new("install");
        event.wait_until(async { Ok(()) });
        event.wait_until(async { Err(ServiceWorkerError::CacheError("full".into())) });

        let err = event.settle().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::CacheError(_)));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new("activate");

        event.wait_until(async { Err(ServiceWorkerError::CacheError("a".into())) });
        let c = counter.clone();
        event.wait_until(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        event.wait_until(async { Err(ServiceWorkerError::CacheError("b".into())) });

        let err = event.settle().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::PendingWorkFailed(ref f) if f.len() == 2));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
