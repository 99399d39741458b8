//! Worker lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::{Result, ServiceWorkerError};

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, script loaded.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// Inputs that move a worker through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    StartInstall,
    InstallSucceeded,
    InstallFailed,
    StartActivate,
    ActivateFinished,
    Superseded,
}

impl ServiceWorkerState {
    /// Next state for `signal`, or a state error if the move is not allowed.
    pub fn transition(self, signal: LifecycleSignal) -> Result<Self> {
        use LifecycleSignal as S;
        use ServiceWorkerState as St;

        let next = match (self, signal) {
            (St::Parsed, S::StartInstall) => St::Installing,
            (St::Installing, S::InstallSucceeded) => St::Installed,
            (St::Installing, S::InstallFailed) => St::Redundant,
            (St::Installed, S::StartActivate) => St::Activating,
            (St::Activating, S::ActivateFinished) => St::Activated,
            (state, S::Superseded) if state != St::Redundant => St::Redundant,
            (state, signal) => {
                return Err(ServiceWorkerError::StateError(format!(
                    "{signal:?} is not valid in state {state:?}"
                )))
            }
        };
        Ok(next)
    }

    /// Check if active.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Activating | Self::Activated)
    }

    /// Installing or waiting.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Installing | Self::Installed)
    }

    pub fn is_redundant(self) -> bool {
        self == Self::Redundant
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleSignal as S;
    use ServiceWorkerState as St;

    #[test]
    fn test_happy_path() {
        let state = St::default()
            .transition(S::StartInstall)
            .and_then(|s| s.transition(S::InstallSucceeded))
            .and_then(|s| s.transition(S::StartActivate))
            .and_then(|s| s.transition(S::ActivateFinished))
            .unwrap();

        assert_eq!(state, St::Activated);
        assert!(state.is_active());
    }

    #[test]
    fn test_install_failure_is_redundant() {
        let state = St::Installing.transition(S::InstallFailed).unwrap();
        assert!(state.is_redundant());
    }

    #[test]
    fn test_cannot_activate_without_install() {
        assert!(St::Parsed.transition(S::StartActivate).is_err());
        assert!(St::Installing.transition(S::StartActivate).is_err());
    }

    #[test]
    fn test_superseded_from_any_live_state() {
        for state in [St::Parsed, St::Installing, St::Installed, St::Activating, St::Activated] {
            assert_eq!(state.transition(S::Superseded).unwrap(), St::Redundant);
        }
        assert!(St::Redundant.transition(S::Superseded).is_err());
    }

    #[test]
    fn test_state_classes() {
        assert!(St::Installed.is_pending());
        assert!(!St::Activated.is_pending());
        assert_eq!(St::Installed.to_string(), "installed");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&St::Activated).unwrap(), "\"activated\"");
    }
}
