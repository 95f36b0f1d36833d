//! Push-broadcast strategy.
//!
//! A `subscribe` request turns the connection into a two-way event stream. A
//! reader thread decodes [`ServerEvent`] lines into session events; a writer
//! thread drains outbound [`ClientEvent`]s so a slow socket never stalls
//! typing. A dropped subscription is reported once and not retried.

use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use vitalboard_protocol::{ClientEvent, FieldUpdate, FieldValue, KeyStroke, Method, Request, Response, ServerEvent};

use super::wire::{connect, write_line};
use super::{RemoteEvent, Transport};
use crate::config::SyncMode;
use crate::error::{BoardError, Result};
use crate::session::SessionEvent;

pub struct PushTransport {
    socket: PathBuf,
    events: Sender<SessionEvent>,
    outbound: Option<Sender<ClientEvent>>,
}

impl PushTransport {
    pub fn new(socket: PathBuf, events: Sender<SessionEvent>) -> Self {
        Self {
            socket,
            events,
            outbound: None,
        }
    }

    fn emit(&mut self, event: ClientEvent) {
        match &self.outbound {
            Some(outbound) => {
                if outbound.send(event).is_err() {
                    tracing::warn!("Subscription writer gone; event dropped");
                }
            }
            None => tracing::warn!("Push sync not connected; event dropped"),
        }
    }
}

impl Transport for PushTransport {
    fn mode(&self) -> SyncMode {
        SyncMode::Push
    }

    fn start(&mut self) -> Result<()> {
        if self.outbound.is_some() {
            return Ok(());
        }

        let mut stream = connect(&self.socket)?;
        write_line(&mut stream, &Request::new(Method::Subscribe, None, None))?;

        let read_half = stream.try_clone().map_err(|source| BoardError::Io {
            context: "Failed to clone subscription stream".to_string(),
            source,
        })?;
        let mut reader = BufReader::new(read_half);
        let ack = read_ack(&mut reader)?;
        if !ack.ok {
            return Err(ack
                .error
                .map(BoardError::from)
                .unwrap_or(BoardError::EmptyResponse));
        }

        // The subscription is long-lived; idle periods are normal.
        let _ = reader.get_ref().set_read_timeout(None);

        let events = self.events.clone();
        thread::spawn(move || run_reader(reader, events));

        let (outbound_tx, outbound_rx) = mpsc::channel();
        let events = self.events.clone();
        thread::spawn(move || run_writer(stream, outbound_rx, events));

        self.outbound = Some(outbound_tx);
        tracing::info!(socket = %self.socket.display(), "Push sync subscribed");
        Ok(())
    }

    fn send_update(&mut self, update: FieldUpdate) {
        let event = match update.value {
            FieldValue::Button(unit) => ClientEvent::UpdateButtonState(unit),
            FieldValue::Text(_) => ClientEvent::UpdateData(update),
        };
        self.emit(event);
    }

    fn send_keystroke(&mut self, ch: char) {
        self.emit(ClientEvent::KeyInput(KeyStroke::new(ch)));
    }

    fn request_snapshot(&mut self) {}

    fn shutdown(&mut self) {
        self.outbound = None;
    }
}

fn read_ack(reader: &mut BufReader<UnixStream>) -> Result<Response> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|source| BoardError::Io {
        context: "Failed to read subscription ack".to_string(),
        source,
    })?;
    if read == 0 || line.trim().is_empty() {
        return Err(BoardError::EmptyResponse);
    }
    serde_json::from_str(&line).map_err(|source| BoardError::Json {
        context: "Failed to parse subscription ack".to_string(),
        source,
    })
}

/// Decodes an authority broadcast. Malformed keystrokes are dropped.
pub(crate) fn remote_event(event: ServerEvent) -> Option<RemoteEvent> {
    match event {
        ServerEvent::InitialState(snapshot) => Some(RemoteEvent::Snapshot(snapshot)),
        ServerEvent::DataUpdated(update) => Some(RemoteEvent::Field(update)),
        ServerEvent::ButtonStateUpdated(unit) => Some(RemoteEvent::Button(unit)),
        ServerEvent::KeyReceived(stroke) => stroke.as_char().map(RemoteEvent::Keystroke),
    }
}

fn run_reader(reader: BufReader<UnixStream>, events: Sender<SessionEvent>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "Subscription read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<ServerEvent>(&line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring malformed authority event");
                continue;
            }
        };
        let Some(remote) = remote_event(event) else {
            tracing::debug!("Dropping keystroke echo without a single character");
            continue;
        };
        if events.send(SessionEvent::Remote(remote)).is_err() {
            return;
        }
    }

    let _ = events.send(SessionEvent::TransportFailed(
        "subscription closed by authority".to_string(),
    ));
}

fn run_writer(mut stream: UnixStream, outbound: Receiver<ClientEvent>, events: Sender<SessionEvent>) {
    for event in outbound {
        if let Err(err) = write_line(&mut stream, &event) {
            tracing::warn!(error = %err, "Failed to emit event to authority");
            let _ = events.send(SessionEvent::TransportFailed(err.to_string()));
            break;
        }
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
    tracing::debug!("Subscription writer stopped");
}
