//! Deterministic stand-ins for timers and transports.
//!
//! Hosts never use these; they exist so engine behavior can be driven step by
//! step from tests, including integration tests in other crates.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use vitalboard_protocol::{FieldUpdate, StateSnapshot};

use crate::config::SyncMode;
use crate::error::Result;
use crate::sync::{RemoteEvent, Transport};
use crate::timer::{Scheduler, TimerHandle, TimerToken};

/// Records scheduled timers and fires them on demand.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    inner: Rc<RefCell<ManualSchedulerInner>>,
}

#[derive(Debug, Default)]
struct ManualSchedulerInner {
    delays: Vec<Duration>,
    queue: VecDeque<(TimerToken, TimerHandle)>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay ever requested, in order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.inner.borrow().delays.clone()
    }

    /// Pops the oldest timer that has not been cancelled.
    pub fn fire_next(&self) -> Option<TimerToken> {
        let mut inner = self.inner.borrow_mut();
        while let Some((token, handle)) = inner.queue.pop_front() {
            if !handle.is_cancelled() {
                return Some(token);
            }
        }
        None
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, token: TimerToken) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut inner = self.inner.borrow_mut();
        inner.delays.push(delay);
        inner.queue.push_back((token, handle.clone()));
        handle
    }
}

#[derive(Debug, Default)]
struct Recorded {
    started: bool,
    updates: Vec<FieldUpdate>,
    keystrokes: Vec<char>,
    snapshot_requests: usize,
}

/// Transport that keeps everything sent through it. Clones share the record.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    mode: SyncMode,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    pub fn started(&self) -> bool {
        self.recorded.lock().map(|r| r.started).unwrap_or(false)
    }

    pub fn updates(&self) -> Vec<FieldUpdate> {
        self.recorded
            .lock()
            .map(|r| r.updates.clone())
            .unwrap_or_default()
    }

    pub fn keystrokes(&self) -> Vec<char> {
        self.recorded
            .lock()
            .map(|r| r.keystrokes.clone())
            .unwrap_or_default()
    }

    pub fn snapshot_requests(&self) -> usize {
        self.recorded
            .lock()
            .map(|r| r.snapshot_requests)
            .unwrap_or(0)
    }

    /// Drains recorded updates, leaving the rest of the record intact.
    pub fn take_updates(&self) -> Vec<FieldUpdate> {
        self.recorded
            .lock()
            .map(|mut r| std::mem::take(&mut r.updates))
            .unwrap_or_default()
    }

    pub fn take_keystrokes(&self) -> Vec<char> {
        self.recorded
            .lock()
            .map(|mut r| std::mem::take(&mut r.keystrokes))
            .unwrap_or_default()
    }
}

impl Transport for RecordingTransport {
    fn mode(&self) -> SyncMode {
        self.mode
    }

    fn start(&mut self) -> Result<()> {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.started = true;
        }
        Ok(())
    }

    fn send_update(&mut self, update: FieldUpdate) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.updates.push(update);
        }
    }

    fn send_keystroke(&mut self, ch: char) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.keystrokes.push(ch);
        }
    }

    fn request_snapshot(&mut self) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.snapshot_requests += 1;
        }
    }
}

/// In-process SharedState that mirrors the daemon's merge rules.
#[derive(Debug, Clone, Default)]
pub struct LoopbackAuthority {
    state: StateSnapshot,
}

impl LoopbackAuthority {
    pub fn new(state: StateSnapshot) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StateSnapshot {
        &self.state
    }

    /// Merges updates whole-field; invalid ones are dropped.
    pub fn accept(&mut self, updates: impl IntoIterator<Item = FieldUpdate>) {
        for update in updates {
            let _ = self.state.set(update);
        }
    }

    /// What a pull fetch would return.
    pub fn fetch(&self) -> RemoteEvent {
        RemoteEvent::Snapshot(self.state.clone())
    }
}

/// Fixed test clock helper.
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .unwrap_or_default()
}
