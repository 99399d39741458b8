//! Runs a [`PageController`] as a task.

use pwa_sw::ServiceWorkerEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::PageController;
use crate::machine::PageState;
use crate::{AppEvent, PageError, Result};

/// Actions the user can take on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Accept the waiting update.
    ApplyUpdate,
    /// The "check for updates" button.
    CheckForUpdates,
    /// Close the page.
    Close,
}

/// A running page.
pub struct PageSession {
    actions: mpsc::Sender<UserAction>,
    app_events: broadcast::Sender<AppEvent>,
    handle: JoinHandle<PageState>,
}

impl PageSession {
    /// Start the controller and spawn its event loop.
    pub async fn spawn(mut controller: PageController) -> Result<Self> {
        let app_events = controller.app_event_sender();
        let events = controller.start().await?;
        let (actions, action_rx) = mpsc::channel(8);

        let handle = tokio::spawn(run(controller, events, action_rx));

        Ok(Self {
            actions,
            app_events,
            handle,
        })
    }

    /// Application events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.app_events.subscribe()
    }

    pub async fn apply_update(&self) -> Result<()> {
        self.send(UserAction::ApplyUpdate).await
    }

    pub async fn check_for_updates(&self) -> Result<()> {
        self.send(UserAction::CheckForUpdates).await
    }

    /// Stop the session and return the final page state.
    pub async fn close(self) -> Result<PageState> {
        // The loop may already have ended if the platform went away.
        let _ = self.actions.send(UserAction::Close).await;
        self.handle.await.map_err(|_| PageError::Closed)
    }

    async fn send(&self, action: UserAction) -> Result<()> {
        self.actions
            .send(action)
            .await
            .map_err(|_| PageError::Closed)
    }
}

async fn run(
    mut controller: PageController,
    mut events: broadcast::Receiver<ServiceWorkerEvent>,
    mut actions: mpsc::Receiver<UserAction>,
) -> PageState {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = controller.handle_platform_event(event).await {
                        warn!(error = %e, category = e.category(), "Failed to handle platform event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Page fell behind on platform events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            action = actions.recv() => match action {
                Some(UserAction::ApplyUpdate) => {
                    if let Err(e) = controller.apply_update().await {
                        warn!(error = %e, "Could not apply update");
                    }
                }
                Some(UserAction::CheckForUpdates) => {
                    if let Err(e) = controller.check_for_updates().await {
                        warn!(error = %e, "Update check failed");
                    }
                }
                Some(UserAction::Close) | None => break,
            },
        }
    }

    debug!("Page session ended");
    controller.state().cloned().unwrap_or(PageState::Idle)
}
