//! Reconciliation between a terminal's store and the state authority.
//!
//! # Architecture
//!
//! ```text
//!             push_local_mutation / forward_keystroke
//! session ──────────────────────────────────────────▶ Transport ──▶ authority
//!    ▲                                                   │
//!    │          SessionEvent::Remote(RemoteEvent)        │
//!    └───────────────────────────────────────────────────┘
//!                      apply_remote (shared by both modes)
//! ```
//!
//! [`SyncClient`] owns one [`Transport`] chosen at construction: [`PullTransport`]
//! polls snapshots, [`PushTransport`] holds a subscription open. Transports do
//! their I/O on worker threads and post results back as session events, so
//! nothing here blocks the input path.
//!
//! All inbound data goes through [`SyncClient::apply_remote`], whichever
//! transport produced it. Snapshots and single-field events share the same
//! per-field routine; derived fields are recomputed by the store.
//!
//! Conflict resolution is "last received wins": every field is overwritten
//! whole, with no diffing and no ordering between terminals.

mod pull;
mod push;
pub(crate) mod wire;

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::Duration;

use chrono::NaiveDateTime;
use vitalboard_protocol::{ButtonUnit, FieldKey, FieldUpdate, StateSnapshot};

use crate::config::SyncMode;
use crate::error::Result;
use crate::session::SessionEvent;
use crate::store::{LocalStateStore, Mutation};

pub use pull::PullTransport;
pub use push::PushTransport;

/// Inbound data, already decoded from the transport's wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Snapshot(StateSnapshot),
    Field(FieldUpdate),
    Button(ButtonUnit),
    Keystroke(char),
}

/// What [`SyncClient::apply_remote`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Snapshot { applied: usize, skipped: usize },
    Field(FieldKey),
    /// The field is derived locally or its value was unusable.
    Skipped(FieldKey),
    /// Keystroke echo; the caller owns the echo line.
    Echo(char),
}

/// Outbound half of a sync strategy.
///
/// Every method must return without waiting on the network.
pub trait Transport {
    fn mode(&self) -> SyncMode;

    /// Begins syncing. Pull fetches immediately and starts polling; push subscribes.
    fn start(&mut self) -> Result<()>;

    /// Fire-and-forget single-field update.
    fn send_update(&mut self, update: FieldUpdate);

    /// Forwards one typed character for cross-terminal echo.
    fn send_keystroke(&mut self, ch: char);

    /// Schedules an extra full fetch.
    fn request_snapshot(&mut self);

    fn shutdown(&mut self) {}
}

type RemoteHandler = Box<dyn FnMut(&Applied)>;

pub struct SyncClient {
    transport: Box<dyn Transport>,
    handlers: Vec<RemoteHandler>,
}

impl SyncClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: Vec::new(),
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.transport.mode()
    }

    pub fn start(&mut self) -> Result<()> {
        tracing::info!(mode = ?self.mode(), "Starting sync");
        self.transport.start()
    }

    /// Sends a mutation that has already been applied locally.
    pub fn push_local_mutation(&mut self, mutation: &Mutation) {
        let update = mutation.to_update();
        tracing::debug!(key = %update.key, "Pushing local mutation");
        self.transport.send_update(update);
    }

    /// Keystroke echo only exists in push mode.
    pub fn forward_keystroke(&mut self, ch: char) {
        if self.mode() == SyncMode::Push {
            self.transport.send_keystroke(ch);
        }
    }

    /// Pull mode fetches right after a commit instead of waiting for the next tick.
    pub fn refresh_after_commit(&mut self) {
        if self.mode() == SyncMode::Pull {
            self.transport.request_snapshot();
        }
    }

    /// Registers an observer called after every inbound application.
    pub fn on_remote_mutation(&mut self, handler: impl FnMut(&Applied) + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn apply_remote(
        &mut self,
        store: &mut LocalStateStore,
        event: RemoteEvent,
        now: NaiveDateTime,
    ) -> Applied {
        let applied = match event {
            RemoteEvent::Snapshot(snapshot) => {
                let mut applied = 0;
                let mut skipped = 0;
                for update in snapshot.fields() {
                    match apply_field(store, &update, now) {
                        Applied::Field(_) => applied += 1,
                        _ => skipped += 1,
                    }
                }
                tracing::debug!(applied, skipped, "Applied remote snapshot");
                Applied::Snapshot { applied, skipped }
            }
            RemoteEvent::Field(update) => apply_field(store, &update, now),
            RemoteEvent::Button(unit) => apply_field(store, &FieldUpdate::button(unit), now),
            RemoteEvent::Keystroke(ch) => Applied::Echo(ch),
        };

        for handler in self.handlers.iter_mut() {
            handler(&applied);
        }
        applied
    }

    pub fn shutdown(&mut self) {
        self.transport.shutdown();
    }
}

/// The one routine both strategies use to land a field in the store.
fn apply_field(store: &mut LocalStateStore, update: &FieldUpdate, now: NaiveDateTime) -> Applied {
    let mutation = match Mutation::from_update(update) {
        Ok(Some(mutation)) => mutation,
        Ok(None) => return Applied::Skipped(update.key),
        Err(err) => {
            tracing::warn!(key = %update.key, error = %err, "Skipping unusable remote field");
            return Applied::Skipped(update.key);
        }
    };

    let mutation = match mutation {
        Mutation::Button(unit) if !unit.is_consistent() => {
            tracing::warn!(
                locked = unit.locked,
                text = %unit.text,
                "Remote button unit inconsistent; using canonical rendering"
            );
            Mutation::Button(ButtonUnit::for_state(unit.locked))
        }
        other => other,
    };

    Applied::Field(store.apply(&mutation, now))
}

/// Builds the transport for `mode`, wired to post into `events`.
pub fn transport_for(
    mode: SyncMode,
    socket: PathBuf,
    poll_interval: Duration,
    events: Sender<SessionEvent>,
) -> Box<dyn Transport> {
    match mode {
        SyncMode::Pull => Box::new(PullTransport::new(socket, poll_interval, events)),
        SyncMode::Push => Box::new(PushTransport::new(socket, events)),
    }
}
