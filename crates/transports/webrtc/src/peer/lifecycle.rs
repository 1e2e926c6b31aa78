//! Peer session lifecycle: maps connectivity transitions to session actions
//!
//! Policy is fail-fast: a failed or disconnected peer is torn down, never
//! reconnected.

use super::engine::ConnectivityState;
use tracing::{debug, info, warn};

/// What the session must do after a connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// The peer became reachable
    Ready,
    /// The peer is gone; stop recording and release the session
    Teardown,
    /// Nothing to do
    None,
}

/// Tracks one peer session's connectivity and decides on teardown
#[derive(Debug)]
pub struct LifecycleMonitor {
    label: String,
    state: ConnectivityState,
    torn_down: bool,
}

impl LifecycleMonitor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: ConnectivityState::New,
            torn_down: false,
        }
    }

    /// Last observed state
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Whether teardown has already been decided
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Record a transition and decide what it means.
    ///
    /// `Connected`/`Completed` yield `Ready` once per transition into that
    /// class. `Failed`/`Disconnected`/`Closed` yield `Teardown` the first time
    /// only; everything after teardown is ignored.
    pub fn observe(&mut self, next: ConnectivityState) -> LifecycleAction {
        let previous = std::mem::replace(&mut self.state, next);
        if self.torn_down {
            debug!(session = %self.label, "Ignoring {} after teardown", next);
            return LifecycleAction::None;
        }

        match next {
            ConnectivityState::Connected | ConnectivityState::Completed => {
                if matches!(
                    previous,
                    ConnectivityState::Connected | ConnectivityState::Completed
                ) {
                    debug!(session = %self.label, "ICE {} -> {}", previous, next);
                    LifecycleAction::None
                } else {
                    info!(session = %self.label, "Peer connection ready ({})", next);
                    LifecycleAction::Ready
                }
            }
            ConnectivityState::Failed
            | ConnectivityState::Disconnected
            | ConnectivityState::Closed => {
                warn!(session = %self.label, "Peer connection {}, tearing down", next);
                self.torn_down = true;
                LifecycleAction::Teardown
            }
            ConnectivityState::New | ConnectivityState::Checking => {
                debug!(session = %self.label, "ICE {} -> {}", previous, next);
                LifecycleAction::None
            }
        }
    }
}
