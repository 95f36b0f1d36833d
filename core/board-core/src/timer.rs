//! Single-shot timers delivered back into the session's event stream.
//!
//! A timer never calls into session state directly. When it fires it posts
//! [`SessionEvent::Timer`] to the session channel, so expiry is handled on the
//! same thread as keystrokes and sync events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::session::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// Cancels a scheduled timer. Cancelling after expiry has no effect.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Scheduler {
    fn schedule(&self, delay: Duration, token: TimerToken) -> TimerHandle;
}

/// Sleeps on a helper thread, then posts the token unless cancelled.
pub struct ThreadScheduler {
    events: Sender<SessionEvent>,
}

impl ThreadScheduler {
    pub fn new(events: Sender<SessionEvent>) -> Self {
        Self { events }
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, token: TimerToken) -> TimerHandle {
        let handle = TimerHandle::new();
        let watched = handle.clone();
        let events = self.events.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if watched.is_cancelled() {
                tracing::debug!(token = token.0, "Timer cancelled before expiry");
                return;
            }
            // Receiver gone means the session already shut down.
            let _ = events.send(SessionEvent::Timer(token));
        });
        handle
    }
}
