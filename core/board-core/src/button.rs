//! Emergency-unlock control with a debounced two-phase commit.
//!
//! ```text
//!            activate                 timer
//! Unlocked ───────────▶ PendingLock ─────────▶ Locked
//!    ▲                                           │
//!    │        timer                  activate    │
//!    └────────────── PendingUnlock ◀─────────────┘
//! ```
//!
//! The committed lock state lives in the store's [`ButtonUnit`]; the machine
//! only tracks the pending transition. Entering a pending state sets a
//! feedback marker and touches nothing else. The four unit fields change
//! together, once, when the timer fires. Activation while pending is ignored.
//! Remote units are applied to the store directly and never pass through here.

use std::time::Duration;

use chrono::NaiveDateTime;
use vitalboard_protocol::ButtonUnit;

use crate::store::{LocalStateStore, Mutation};
use crate::timer::{Scheduler, TimerHandle, TimerToken};

pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPhase {
    Unlocked,
    PendingLock,
    Locked,
    PendingUnlock,
}

/// Transient feedback shown during the debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMarker {
    TowardLock,
    TowardUnlock,
}

impl FeedbackMarker {
    pub fn class(&self) -> &'static str {
        match self {
            FeedbackMarker::TowardLock => "clicked-feedback-red",
            FeedbackMarker::TowardUnlock => "clicked-feedback-blue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Started {
        marker: FeedbackMarker,
        token: TimerToken,
    },
    Ignored,
}

#[derive(Debug)]
struct PendingTransition {
    target_locked: bool,
    token: TimerToken,
    timer: TimerHandle,
}

#[derive(Debug)]
pub struct ButtonStateMachine {
    debounce: Duration,
    pending: Option<PendingTransition>,
    next_token: u64,
}

impl Default for ButtonStateMachine {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }
}

impl ButtonStateMachine {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            next_token: 1,
        }
    }

    pub fn phase(&self, store: &LocalStateStore) -> ButtonPhase {
        match (&self.pending, store.button().locked) {
            (Some(pending), _) if pending.target_locked => ButtonPhase::PendingLock,
            (Some(_), _) => ButtonPhase::PendingUnlock,
            (None, true) => ButtonPhase::Locked,
            (None, false) => ButtonPhase::Unlocked,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn activate(&mut self, store: &mut LocalStateStore, scheduler: &dyn Scheduler) -> Activation {
        if self.pending.is_some() {
            tracing::debug!("Button activation ignored while transition pending");
            return Activation::Ignored;
        }

        let target_locked = !store.button().locked;
        let marker = if target_locked {
            FeedbackMarker::TowardLock
        } else {
            FeedbackMarker::TowardUnlock
        };
        let token = TimerToken(self.next_token);
        self.next_token += 1;

        store.set_feedback(Some(marker));
        let timer = scheduler.schedule(self.debounce, token);
        self.pending = Some(PendingTransition {
            target_locked,
            token,
            timer,
        });
        tracing::debug!(target_locked, token = token.0, "Button transition pending");

        Activation::Started { marker, token }
    }

    /// Commits the pending transition if `token` is the one awaited.
    ///
    /// Returns the committed unit, which the caller pushes outward exactly once.
    pub fn complete(
        &mut self,
        token: TimerToken,
        store: &mut LocalStateStore,
        now: NaiveDateTime,
    ) -> Option<ButtonUnit> {
        match &self.pending {
            Some(pending) if pending.token == token => {}
            _ => {
                tracing::debug!(token = token.0, "Stale button timer ignored");
                return None;
            }
        }
        let pending = self.pending.take()?;

        let unit = ButtonUnit::for_state(pending.target_locked);
        store.set_feedback(None);
        store.apply(&Mutation::Button(unit.clone()), now);
        tracing::info!(locked = unit.locked, "Button state committed");
        Some(unit)
    }

    /// Drops a pending transition without committing. Used on session teardown.
    pub fn cancel(&mut self, store: &mut LocalStateStore) {
        if let Some(pending) = self.pending.take() {
            pending.timer.cancel();
            store.set_feedback(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualScheduler;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_initial_phase_unlocked() {
        let store = LocalStateStore::default();
        let machine = ButtonStateMachine::default();
        assert_eq!(machine.phase(&store), ButtonPhase::Unlocked);
    }

    #[test]
    fn test_activate_marks_feedback_without_commit() {
        let mut store = LocalStateStore::default();
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        let activation = machine.activate(&mut store, &scheduler);
        assert!(matches!(
            activation,
            Activation::Started {
                marker: FeedbackMarker::TowardLock,
                ..
            }
        ));
        assert_eq!(machine.phase(&store), ButtonPhase::PendingLock);
        assert_eq!(store.feedback(), Some(FeedbackMarker::TowardLock));
        assert_eq!(store.button(), &ButtonUnit::unlocked());
        assert_eq!(
            scheduler.scheduled_delays(),
            vec![Duration::from_millis(DEFAULT_DEBOUNCE_MS)]
        );
    }

    #[test]
    fn test_timer_commits_whole_unit() {
        let mut store = LocalStateStore::default();
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        machine.activate(&mut store, &scheduler);
        let token = scheduler.fire_next().expect("timer scheduled");
        let unit = machine.complete(token, &mut store, now()).expect("commit");

        assert_eq!(unit, ButtonUnit::locked());
        assert_eq!(store.button(), &unit);
        assert!(store.button().is_consistent());
        assert_eq!(store.feedback(), None);
        assert_eq!(machine.phase(&store), ButtonPhase::Locked);
    }

    #[test]
    fn test_unlock_uses_blue_marker() {
        let mut store = LocalStateStore::default();
        store.apply(&Mutation::Button(ButtonUnit::locked()), now());
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        machine.activate(&mut store, &scheduler);
        assert_eq!(machine.phase(&store), ButtonPhase::PendingUnlock);
        assert_eq!(store.feedback().map(|m| m.class()), Some("clicked-feedback-blue"));

        let token = scheduler.fire_next().unwrap();
        assert_eq!(
            machine.complete(token, &mut store, now()),
            Some(ButtonUnit::unlocked())
        );
        assert_eq!(machine.phase(&store), ButtonPhase::Unlocked);
    }

    #[test]
    fn test_reactivation_while_pending_ignored() {
        let mut store = LocalStateStore::default();
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        machine.activate(&mut store, &scheduler);
        assert_eq!(machine.activate(&mut store, &scheduler), Activation::Ignored);
        assert_eq!(scheduler.scheduled_delays().len(), 1);
    }

    #[test]
    fn test_stale_token_does_nothing() {
        let mut store = LocalStateStore::default();
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        machine.activate(&mut store, &scheduler);
        assert_eq!(machine.complete(TimerToken(999), &mut store, now()), None);
        assert!(machine.is_pending());
        assert_eq!(store.button(), &ButtonUnit::unlocked());
    }

    #[test]
    fn test_cancel_clears_marker_and_timer() {
        let mut store = LocalStateStore::default();
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        machine.activate(&mut store, &scheduler);
        machine.cancel(&mut store);
        assert_eq!(store.feedback(), None);
        assert!(!machine.is_pending());
        assert_eq!(scheduler.fire_next(), None);
    }

    #[test]
    fn test_pending_target_survives_remote_commit() {
        let mut store = LocalStateStore::default();
        let scheduler = ManualScheduler::new();
        let mut machine = ButtonStateMachine::default();

        machine.activate(&mut store, &scheduler);
        // A peer locks first; the remote unit lands without debounce.
        store.apply(&Mutation::Button(ButtonUnit::locked()), now());
        assert_eq!(machine.phase(&store), ButtonPhase::PendingLock);

        let token = scheduler.fire_next().unwrap();
        assert_eq!(
            machine.complete(token, &mut store, now()),
            Some(ButtonUnit::locked())
        );
    }
}
