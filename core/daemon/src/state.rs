//! SharedState held by the authority, plus the subscriber registry.
//!
//! Every write goes through [`SharedState::apply`], which merges the fields
//! whole and then fans the change out. Subscribers are plain channels; each
//! one is drained by its connection's writer thread, so a slow terminal never
//! holds the state lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vitalboard_protocol::{ButtonUnit, FieldKey, FieldUpdate, KeyStroke, ServerEvent, StateSnapshot};

pub type SubscriberId = u64;

/// Values a fresh authority starts with.
pub fn seed_state() -> StateSnapshot {
    StateSnapshot {
        last_measure: "【前回の測定】 2025年9月30日 16時30分".to_string(),
        next_measure: "【次回測定予定】 4時間後".to_string(),
        pulse: "125".to_string(),
        oxygen: "98％".to_string(),
        condition: "良い".to_string(),
        sleep_yote: "12時30分".to_string(),
        sleep_fact: "12時30分".to_string(),
        wake_yote: "12時30分".to_string(),
        wake_fact: "12時30分".to_string(),
        button_state: ButtonUnit::unlocked(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub updates_applied: u64,
    pub subscribers: usize,
    pub active_connections: usize,
    pub rejected_connections: u64,
}

pub struct SharedState {
    board: Mutex<StateSnapshot>,
    subscribers: Mutex<HashMap<SubscriberId, Sender<ServerEvent>>>,
    next_subscriber: AtomicU64,
    started_at: DateTime<Utc>,
    updates_applied: AtomicU64,
    pub(crate) active_connections: AtomicUsize,
    pub(crate) rejected_connections: AtomicU64,
}

impl SharedState {
    pub fn new(initial: StateSnapshot) -> Self {
        Self {
            board: Mutex::new(initial),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            started_at: Utc::now(),
            updates_applied: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
            rejected_connections: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        match self.board.lock() {
            Ok(board) => board.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Merges `updates` whole-field and broadcasts each one to every
    /// subscriber except `origin`.
    pub fn apply(&self, updates: Vec<FieldUpdate>, origin: Option<SubscriberId>) -> Vec<FieldKey> {
        let mut applied = Vec::with_capacity(updates.len());
        {
            let mut board = match self.board.lock() {
                Ok(board) => board,
                Err(poisoned) => poisoned.into_inner(),
            };
            for update in &updates {
                match board.set(update.clone()) {
                    Ok(()) => applied.push(update.key),
                    Err(err) => {
                        tracing::warn!(key = %update.key, error = %err, "Rejected field value");
                    }
                }
            }
        }

        self.updates_applied
            .fetch_add(applied.len() as u64, Ordering::Relaxed);
        for update in updates.into_iter().filter(|u| applied.contains(&u.key)) {
            let event = match update.value.as_button() {
                Some(unit) => ServerEvent::ButtonStateUpdated(unit.clone()),
                None => ServerEvent::DataUpdated(update),
            };
            self.broadcast(event, origin);
        }
        applied
    }

    /// Keystrokes are relayed, never stored.
    pub fn relay_keystroke(&self, stroke: KeyStroke, origin: SubscriberId) {
        self.broadcast(ServerEvent::KeyReceived(stroke), Some(origin));
    }

    /// Registers a subscriber. The receiver gets `initial_state` first.
    pub fn subscribe(&self) -> (SubscriberId, Receiver<ServerEvent>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Snapshot under the subscriber lock so no broadcast slips between the
        // initial state and registration.
        let _ = tx.send(ServerEvent::InitialState(self.snapshot()));
        subscribers.insert(id, tx);
        tracing::info!(subscriber = id, total = subscribers.len(), "Subscriber added");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if subscribers.remove(&id).is_some() {
            tracing::info!(subscriber = id, total = subscribers.len(), "Subscriber removed");
        }
    }

    fn broadcast(&self, event: ServerEvent, except: Option<SubscriberId>) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|id, tx| {
            if Some(*id) == except {
                return true;
            }
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                tracing::debug!(subscriber = *id, "Dropping subscriber with closed channel");
            }
            delivered
        });
    }

    pub fn stats(&self) -> StatsSnapshot {
        let subscribers = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        StatsSnapshot {
            started_at: self.started_at,
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            subscribers,
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn seed_matches_first_boot_values() {
        let seed = seed_state();
        assert_eq!(seed.pulse, "125");
        assert_eq!(seed.oxygen, "98％");
        assert_eq!(seed.wake_fact, "12時30分");
        assert!(!seed.button_state.locked);
    }

    #[test]
    fn apply_merges_and_skips_sender() {
        let state = SharedState::new(seed_state());
        let (a, a_rx) = state.subscribe();
        let (_b, b_rx) = state.subscribe();
        assert!(matches!(a_rx.recv().unwrap(), ServerEvent::InitialState(_)));
        assert!(matches!(b_rx.recv().unwrap(), ServerEvent::InitialState(_)));

        let applied = state.apply(vec![FieldUpdate::text(FieldKey::Pulse, "80")], Some(a));
        assert_eq!(applied, vec![FieldKey::Pulse]);
        assert_eq!(state.snapshot().pulse, "80");

        assert_eq!(
            b_rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            ServerEvent::DataUpdated(FieldUpdate::text(FieldKey::Pulse, "80"))
        );
        assert!(a_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn button_updates_broadcast_as_whole_unit() {
        let state = SharedState::new(seed_state());
        let (_id, rx) = state.subscribe();
        let _ = rx.recv();

        state.apply(vec![FieldUpdate::button(ButtonUnit::locked())], None);
        assert_eq!(state.snapshot().button_state, ButtonUnit::locked());
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            ServerEvent::ButtonStateUpdated(ButtonUnit::locked())
        );
    }

    #[test]
    fn keystrokes_are_relayed_not_stored() {
        let state = SharedState::new(seed_state());
        let (a, _a_rx) = state.subscribe();
        let (_b, b_rx) = state.subscribe();
        let _ = b_rx.recv();
        let before = state.snapshot();

        state.relay_keystroke(KeyStroke::new('m'), a);
        assert_eq!(
            b_rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            ServerEvent::KeyReceived(KeyStroke::new('m'))
        );
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let state = SharedState::new(seed_state());
        let (_id, rx) = state.subscribe();
        drop(rx);
        state.apply(vec![FieldUpdate::text(FieldKey::Oxygen, "97")], None);
        assert_eq!(state.stats().subscribers, 0);
    }
}
