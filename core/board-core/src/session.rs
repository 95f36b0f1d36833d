//! One terminal's event loop state.
//!
//! Everything that can change what a terminal shows arrives as a
//! [`SessionEvent`] on a single channel: keystrokes from the host, inbound
//! data and failures from the transport's worker threads, debounce expiry
//! from the scheduler, and clock ticks. [`TerminalSession::handle`] runs each
//! event to completion before the next one is read.

use chrono::NaiveDateTime;

use crate::button::{Activation, ButtonStateMachine};
use crate::command::CommandParser;
use crate::config::{BoardConfig, SyncMode};
use crate::error::Result;
use crate::input::{InputController, Key, KeyOutcome};
use crate::overdue::OverdueCalculator;
use crate::store::{LocalStateStore, Mutation};
use crate::sync::{Applied, RemoteEvent, SyncClient, Transport};
use crate::timer::{Scheduler, TimerToken};

#[derive(Debug)]
pub enum SessionEvent {
    Key(Key),
    /// The host's emergency-control gesture.
    ActivateButton,
    Remote(RemoteEvent),
    Timer(TimerToken),
    /// Periodic clock tick; drives overdue recomputation.
    Tick,
    TransportFailed(String),
    Shutdown,
}

pub struct TerminalSession {
    store: LocalStateStore,
    input: InputController,
    button: ButtonStateMachine,
    sync: SyncClient,
    scheduler: Box<dyn Scheduler>,
    last_error: Option<String>,
}

impl TerminalSession {
    pub fn new(config: &BoardConfig, transport: Box<dyn Transport>, scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            store: LocalStateStore::new(OverdueCalculator::new(config.measurement_interval_hours)),
            input: InputController::new(CommandParser::new(config.strict_time_range)),
            button: ButtonStateMachine::new(config.debounce()),
            sync: SyncClient::new(transport),
            scheduler,
            last_error: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if let Err(err) = self.sync.start() {
            tracing::warn!(error = %err, "Sync failed to start; continuing with local state");
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Applies one event. Returns false once the session has shut down.
    pub fn handle(&mut self, event: SessionEvent, now: NaiveDateTime) -> bool {
        match event {
            SessionEvent::Key(key) => {
                let outcome = self
                    .input
                    .handle_key(key, &mut self.store, &mut self.sync, now);
                if let KeyOutcome::Committed(key) = outcome {
                    tracing::info!(key = %key, "Local mutation applied");
                }
            }
            SessionEvent::ActivateButton => {
                if let Activation::Started { marker, .. } =
                    self.button.activate(&mut self.store, self.scheduler.as_ref())
                {
                    tracing::debug!(class = marker.class(), "Button feedback shown");
                }
            }
            SessionEvent::Remote(remote) => match self.sync.apply_remote(&mut self.store, remote, now) {
                Applied::Echo(ch) => self.input.append_remote_echo(ch),
                // Only authoritative state proves the sync path healthy again.
                Applied::Snapshot { .. } | Applied::Field(_) => self.last_error = None,
                Applied::Skipped(_) => {}
            },
            SessionEvent::Timer(token) => {
                if let Some(unit) = self.button.complete(token, &mut self.store, now) {
                    self.sync.push_local_mutation(&Mutation::Button(unit));
                }
            }
            SessionEvent::Tick => {
                if self.store.refresh_derived(now) && self.store.next_measurement().overdue {
                    tracing::info!(
                        label = %self.store.next_measurement().label,
                        "Measurement overdue"
                    );
                }
            }
            SessionEvent::TransportFailed(message) => {
                // Local state stays as-is until the next successful exchange.
                self.last_error = Some(message);
            }
            SessionEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    pub fn shutdown(&mut self) {
        self.button.cancel(&mut self.store);
        self.sync.shutdown();
        tracing::info!("Session shut down");
    }

    pub fn store(&self) -> &LocalStateStore {
        &self.store
    }

    pub fn input(&self) -> &InputController {
        &self.input
    }

    pub fn button(&self) -> &ButtonStateMachine {
        &self.button
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode()
    }

    /// Most recent transport failure, cleared by the next inbound event.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
