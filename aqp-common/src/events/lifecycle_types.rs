//! Lifecycle-related type definitions
//!
//! Supporting types for the buffer queue session state machine.

use serde::{Deserialize, Serialize};

/// Queue session lifecycle state
///
/// Transitions only move forward:
/// Uninitialized → Primed → Running → Stopping → Stopped.
/// Stopped is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Session is being built (source opened, buffers being primed)
    Uninitialized,
    /// All buffers filled and enqueued, device not started yet
    Primed,
    /// Device started, refills driven by buffer completions
    Running,
    /// Running flag cleared, in-flight buffers draining
    Stopping,
    /// Terminal state
    Stopped,
}

impl LifecycleState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Primed)
                | (Uninitialized, Stopped)
                | (Primed, Running)
                | (Primed, Stopping)
                | (Primed, Stopped)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }

    /// Stopped is the only terminal state
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Stopped
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Primed => write!(f, "primed"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        use LifecycleState::*;
        assert!(Uninitialized.can_transition_to(Primed));
        assert!(Primed.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_nothing_leaves_stopped() {
        use LifecycleState::*;
        for next in [Uninitialized, Primed, Running, Stopping, Stopped] {
            assert!(!Stopped.can_transition_to(next));
        }
        assert!(Stopped.is_terminal());
    }

    #[test]
    fn test_no_backward_transitions() {
        use LifecycleState::*;
        assert!(!Running.can_transition_to(Primed));
        assert!(!Stopping.can_transition_to(Running));
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&LifecycleState::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }
}
