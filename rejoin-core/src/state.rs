//! Recovery scenario state machine.
//!
//! Pure and side-effect free: the orchestrator in `rejoin-harness` reports
//! what happened as [`Event`]s and records the resulting [`Transition`]s.
//!
//! ```text
//! Initializing ──ready──► Delivering ──crash──► Recovering ──respawn──► Validating ──validated──► Complete
//!       │                     │                     │                      │
//!       └─────────────────────┴───────── failed ────┴──────────────────────┴──► Failed
//! ```

use std::fmt;

/// Phase of a scenario, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Staging, listeners and workers are being brought up.
    Initializing,
    /// The initializer is ready and the sequence is being delivered.
    Delivering,
    /// A worker has been crashed; a replacement is being prepared.
    Recovering,
    /// The replacement is running; waiting for delivery and output checks.
    Validating,
    /// Every check passed.
    Complete,
    /// A bounded wait or assertion failed.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initializing => "initializing",
            Phase::Delivering => "delivering",
            Phase::Recovering => "recovering",
            Phase::Validating => "validating",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Scenario state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioState {
    /// Bringing up staging, listeners and workers.
    Initializing,
    /// Delivering the sequence to a ready cluster.
    Delivering,
    /// A worker was crashed.
    Recovering {
        /// Name of the crashed worker.
        worker: String,
    },
    /// The replacement worker is running.
    Validating {
        /// Name of the replacement worker.
        worker: String,
    },
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Failed {
        /// Phase in which the failure happened.
        during: Phase,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Things the orchestrator observes while driving a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The initializer printed its readiness marker.
    InitializerReady,
    /// A worker was forcibly stopped.
    WorkerCrashed {
        /// Name of the crashed worker.
        worker: String,
    },
    /// The replacement for a crashed worker was started.
    ReplacementStarted {
        /// Name of the replacement worker.
        worker: String,
    },
    /// Delivery finished, the expected value was observed and the
    /// replacement reported reconnection.
    Validated,
    /// Any unmet bounded wait or failed assertion.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the event.
    pub from: Phase,
    /// Phase after the event.
    pub to: Phase,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

impl ScenarioState {
    /// Create a new scenario in the Initializing state.
    pub fn new() -> Self {
        Self::Initializing
    }

    /// Process an event and return the new state.
    ///
    /// Events that do not apply to the current state leave it unchanged.
    /// Terminal states accept no further events.
    pub fn on_event(self, event: Event) -> Self {
        match (self, event) {
            (state, _) if state.is_terminal() => state,

            (state, Event::Failed { reason }) => Self::Failed {
                during: state.phase(),
                reason,
            },

            (Self::Initializing, Event::InitializerReady) => Self::Delivering,
            (Self::Delivering, Event::WorkerCrashed { worker }) => Self::Recovering { worker },
            (Self::Recovering { .. }, Event::ReplacementStarted { worker }) => {
                Self::Validating { worker }
            }
            (Self::Validating { .. }, Event::Validated) => Self::Complete,

            // Invalid transitions - stay in current state
            (state, _) => state,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Initializing => Phase::Initializing,
            Self::Delivering => Phase::Delivering,
            Self::Recovering { .. } => Phase::Recovering,
            Self::Validating { .. } => Phase::Validating,
            Self::Complete => Phase::Complete,
            Self::Failed { .. } => Phase::Failed,
        }
    }

    /// True for Complete and Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    /// True only for Complete.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl Default for ScenarioState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crashed(name: &str) -> Event {
        Event::WorkerCrashed {
            worker: name.into(),
        }
    }

    fn respawned(name: &str) -> Event {
        Event::ReplacementStarted {
            worker: name.into(),
        }
    }

    #[test]
    fn starts_initializing() {
        let state = ScenarioState::new();
        assert_eq!(state.phase(), Phase::Initializing);
        assert!(!state.is_terminal());
    }

    #[test]
    fn happy_path_reaches_complete() {
        let state = ScenarioState::new()
            .on_event(Event::InitializerReady)
            .on_event(crashed("worker1"))
            .on_event(respawned("worker1"))
            .on_event(Event::Validated);
        assert!(state.is_complete());
    }

    #[test]
    fn recovering_and_validating_carry_worker_name() {
        let state = ScenarioState::new()
            .on_event(Event::InitializerReady)
            .on_event(crashed("worker1"));
        assert_eq!(
            state,
            ScenarioState::Recovering {
                worker: "worker1".into()
            }
        );

        let state = state.on_event(respawned("worker1"));
        assert_eq!(
            state,
            ScenarioState::Validating {
                worker: "worker1".into()
            }
        );
    }

    #[test]
    fn failure_records_phase() {
        let state = ScenarioState::new()
            .on_event(Event::InitializerReady)
            .on_event(Event::Failed {
                reason: "sender timed out".into(),
            });
        assert_eq!(
            state,
            ScenarioState::Failed {
                during: Phase::Delivering,
                reason: "sender timed out".into()
            }
        );
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        // Crash before readiness is not a valid transition
        let state = ScenarioState::new().on_event(crashed("worker1"));
        assert_eq!(state, ScenarioState::Initializing);

        // Validation before recovery is not a valid transition
        let state = ScenarioState::new()
            .on_event(Event::InitializerReady)
            .on_event(Event::Validated);
        assert_eq!(state, ScenarioState::Delivering);
    }

    #[test]
    fn terminal_states_absorb_events() {
        let failed = ScenarioState::new().on_event(Event::Failed {
            reason: "launch".into(),
        });
        let after = failed.clone().on_event(Event::InitializerReady);
        assert_eq!(after, failed);

        let complete = ScenarioState::Complete.on_event(Event::Failed {
            reason: "late".into(),
        });
        assert!(complete.is_complete());
    }

    #[test]
    fn transition_display() {
        let t = Transition {
            from: Phase::Delivering,
            to: Phase::Recovering,
        };
        assert_eq!(t.to_string(), "delivering -> recovering");
    }
}
