use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

/// Phases a game goes through while being reconciled with the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    /// Nothing in flight.
    Idle,
    /// A push is in flight; no second push may start.
    Pushing,
    /// The cloud acknowledged the push; the queue is being settled.
    Settled,
    /// A retryable failure happened; waiting for the backoff delay.
    RetryWait {
        /// Number of failed attempts so far.
        attempt: u32,
    },
    /// Local and remote diverged and no automatic winner exists.
    Conflict,
    /// A non-retryable failure halted automatic sync.
    Fatal {
        /// Human-readable cause.
        reason: String,
    },
}

impl SyncPhase {
    /// Whether automatic sync is halted until someone intervenes.
    pub fn is_blocked(&self) -> bool {
        matches!(self, SyncPhase::Conflict | SyncPhase::Fatal { .. })
    }
}

/// Events that drive the per-game sync state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A push cycle begins.
    PushStarted,
    /// The cloud store acknowledged the push.
    PushAcknowledged,
    /// The acknowledged actions were removed from the queue.
    SettleCompleted,
    /// The push failed in a way worth retrying.
    RetryableFailure {
        /// Failed attempts so far, including this one.
        attempt: u32,
    },
    /// The push failed permanently.
    FatalFailure {
        /// Human-readable cause.
        reason: String,
    },
    /// Local and remote diverged without an automatic winner.
    ConflictDetected,
    /// A human resolved the conflict.
    ConflictResolved {
        /// Whether the local copy won and must be pushed.
        push: bool,
    },
    /// The remote copy replaced the local one.
    RemoteAdopted,
    /// The in-flight push was abandoned (remote won or the game vanished).
    PushAborted,
    /// Manual intervention cleared the state.
    ManualReset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid sync transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the event arrived.
    pub from: SyncPhase,
    /// The rejected event.
    pub event: SyncEvent,
}

/// Snapshot of a sync state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase.
    pub phase: SyncPhase,
    /// Number of applied transitions.
    pub version: usize,
    /// When the current phase was entered.
    pub since: Instant,
}

/// Per-game state machine enforcing the push lifecycle.
#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    phase: SyncPhase,
    version: usize,
    since: Instant,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            version: 0,
            since: Instant::now(),
        }
    }
}

impl SyncStateMachine {
    /// Create a machine in the idle phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    /// Create a snapshot of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase.clone(),
            version: self.version,
            since: self.since,
        }
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: SyncEvent) -> Result<SyncPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        self.since = Instant::now();
        Ok(self.phase.clone())
    }

    fn compute_transition(&self, event: SyncEvent) -> Result<SyncPhase, InvalidTransition> {
        let next = match (&self.phase, event) {
            (SyncPhase::Idle | SyncPhase::RetryWait { .. }, SyncEvent::PushStarted) => {
                SyncPhase::Pushing
            }
            (SyncPhase::Pushing, SyncEvent::PushAcknowledged) => SyncPhase::Settled,
            (SyncPhase::Settled, SyncEvent::SettleCompleted) => SyncPhase::Idle,
            (SyncPhase::Pushing, SyncEvent::RetryableFailure { attempt }) => {
                SyncPhase::RetryWait { attempt }
            }
            (SyncPhase::Pushing, SyncEvent::FatalFailure { reason }) => SyncPhase::Fatal { reason },
            (
                SyncPhase::Idle | SyncPhase::Pushing | SyncPhase::RetryWait { .. },
                SyncEvent::ConflictDetected,
            ) => SyncPhase::Conflict,
            (SyncPhase::Conflict, SyncEvent::ConflictResolved { push: true }) => SyncPhase::Pushing,
            (SyncPhase::Conflict, SyncEvent::ConflictResolved { push: false }) => SyncPhase::Idle,
            (
                SyncPhase::Idle | SyncPhase::Pushing | SyncPhase::RetryWait { .. },
                SyncEvent::RemoteAdopted,
            ) => SyncPhase::Idle,
            (SyncPhase::Pushing, SyncEvent::PushAborted) => SyncPhase::Idle,
            (_, SyncEvent::ManualReset) => SyncPhase::Idle,
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.clone(),
                    event,
                });
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SyncStateMachine, event: SyncEvent) -> SyncPhase {
        sm.apply(event).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        assert_eq!(SyncStateMachine::new().phase(), &SyncPhase::Idle);
    }

    #[test]
    fn happy_push_path_returns_to_idle() {
        let mut sm = SyncStateMachine::new();
        assert_eq!(apply(&mut sm, SyncEvent::PushStarted), SyncPhase::Pushing);
        assert_eq!(apply(&mut sm, SyncEvent::PushAcknowledged), SyncPhase::Settled);
        assert_eq!(apply(&mut sm, SyncEvent::SettleCompleted), SyncPhase::Idle);
        assert_eq!(sm.snapshot().version, 3);
    }

    #[test]
    fn retry_wait_loops_back_to_pushing() {
        let mut sm = SyncStateMachine::new();
        apply(&mut sm, SyncEvent::PushStarted);
        assert_eq!(
            apply(&mut sm, SyncEvent::RetryableFailure { attempt: 1 }),
            SyncPhase::RetryWait { attempt: 1 }
        );
        assert_eq!(apply(&mut sm, SyncEvent::PushStarted), SyncPhase::Pushing);
    }

    #[test]
    fn second_push_cannot_start_while_one_is_in_flight() {
        let mut sm = SyncStateMachine::new();
        apply(&mut sm, SyncEvent::PushStarted);
        let err = sm.apply(SyncEvent::PushStarted).unwrap_err();
        assert_eq!(err.from, SyncPhase::Pushing);
        assert_eq!(err.event, SyncEvent::PushStarted);
    }

    #[test]
    fn conflict_resolution_goes_to_pushing_or_idle() {
        let mut sm = SyncStateMachine::new();
        apply(&mut sm, SyncEvent::ConflictDetected);
        assert!(sm.phase().is_blocked());
        assert!(sm.clone().apply(SyncEvent::PushStarted).is_err());
        assert_eq!(
            apply(&mut sm, SyncEvent::ConflictResolved { push: true }),
            SyncPhase::Pushing
        );

        let mut sm = SyncStateMachine::new();
        apply(&mut sm, SyncEvent::ConflictDetected);
        assert_eq!(
            apply(&mut sm, SyncEvent::ConflictResolved { push: false }),
            SyncPhase::Idle
        );
    }

    #[test]
    fn fatal_only_clears_through_manual_reset() {
        let mut sm = SyncStateMachine::new();
        apply(&mut sm, SyncEvent::PushStarted);
        apply(
            &mut sm,
            SyncEvent::FatalFailure {
                reason: "permission denied".into(),
            },
        );
        assert!(sm.apply(SyncEvent::PushStarted).is_err());
        assert!(sm.apply(SyncEvent::RemoteAdopted).is_err());
        assert_eq!(apply(&mut sm, SyncEvent::ManualReset), SyncPhase::Idle);
    }
}
