//! Page update state machine.
//!
//! ```text
//!   Idle ──installed (update)──► UpdateAvailable ──consent──► Applying
//!    │                              │                          │
//!    └─installed (first)─► Idle     └──────activated───────────┴──► Updated
//! ```
//!
//! `Updated` is terminal and produces exactly one reload.

use pwa_sw::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};

use crate::AppEvent;

/// Where the page is in the update cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    Idle,
    /// A newer version is waiting for consent.
    UpdateAvailable(ServiceWorker),
    /// Consent was sent; waiting for the worker to activate.
    Applying(ServiceWorker),
    Updated,
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// Registration resolved.
    Registered { waiting: Option<ServiceWorker> },
    /// A new worker began installing.
    UpdateFound(ServiceWorker),
    /// Some worker changed state.
    StateChanged(ServiceWorker),
    /// The user agreed to apply the waiting update.
    ApplyUpdate,
}

/// Side effects for the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEffect {
    Emit(AppEvent),
    /// Post `{action: "activate"}` to the worker.
    PostActivate(ServiceWorkerId),
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMachine {
    state: PageState,
    /// No controller existed when the page registered.
    first_install: bool,
    /// Worker whose state changes we react to.
    tracking: Option<ServiceWorkerId>,
    auto_apply: bool,
}

impl PageMachine {
    pub fn new(first_install: bool, auto_apply: bool) -> Self {
        Self {
            state: PageState::Idle,
            first_install,
            tracking: None,
            auto_apply,
        }
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    /// The waiting worker consent would go to.
    pub fn pending_update(&self) -> Option<&ServiceWorker> {
        match &self.state {
            PageState::UpdateAvailable(worker) => Some(worker),
            _ => None,
        }
    }

    /// Apply one signal.
    pub fn transition(mut self, signal: PageSignal) -> (Self, Vec<PageEffect>) {
        let mut effects = Vec::new();

        if self.state == PageState::Updated {
            return (self, effects);
        }

        match signal {
            PageSignal::Registered { waiting } => {
                if let Some(worker) = waiting {
                    if self.state == PageState::Idle {
                        self.tracking = Some(worker.id);
                        self.offer(worker, &mut effects);
                    }
                }
            }

            PageSignal::UpdateFound(worker) => {
                if matches!(self.state, PageState::Idle | PageState::UpdateAvailable(_)) {
                    self.tracking = Some(worker.id);
                }
            }

            PageSignal::StateChanged(worker) if worker.state == ServiceWorkerState::Redundant => {
                if self.tracking == Some(worker.id) {
                    self.tracking = None;
                }
                if matches!(
                    &self.state,
                    PageState::UpdateAvailable(w) | PageState::Applying(w) if w.id == worker.id
                ) {
                    self.state = PageState::Idle;
                }
            }

            PageSignal::StateChanged(worker) if self.tracking == Some(worker.id) => {
                match worker.state {
                    ServiceWorkerState::Installed => {
                        if self.first_install {
                            effects.push(PageEffect::Emit(AppEvent::Installed));
                        } else if matches!(
                            self.state,
                            PageState::Idle | PageState::UpdateAvailable(_)
                        ) {
                            self.offer(worker, &mut effects);
                        }
                    }
                    ServiceWorkerState::Activated if !self.first_install => {
                        self.state = PageState::Updated;
                        self.tracking = None;
                        effects.push(PageEffect::Emit(AppEvent::Updated));
                        effects.push(PageEffect::Reload);
                    }
                    _ => {}
                }
            }

            PageSignal::StateChanged(_) => {}

            PageSignal::ApplyUpdate => {
                if let PageState::UpdateAvailable(worker) = &self.state {
                    let worker = worker.clone();
                    effects.push(PageEffect::PostActivate(worker.id));
                    self.state = PageState::Applying(worker);
                }
            }
        }

        (self, effects)
    }

    fn offer(&mut self, worker: ServiceWorker, effects: &mut Vec<PageEffect>) {
        effects.push(PageEffect::Emit(AppEvent::UpdateAvailable(worker.clone())));
        if self.auto_apply {
            effects.push(PageEffect::PostActivate(worker.id));
            self.state = PageState::Applying(worker);
        } else {
            self.state = PageState::UpdateAvailable(worker);
        }
    }
}
