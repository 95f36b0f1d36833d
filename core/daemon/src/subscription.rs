//! Long-lived push connections.
//!
//! After the `subscribe` ack the connection carries [`ClientEvent`] lines in
//! and [`ServerEvent`] lines out. The reader runs on the connection's thread;
//! a second thread drains this subscriber's channel onto the socket.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};
use vitalboard_protocol::{ClientEvent, FieldUpdate, Response, ServerEvent, MAX_REQUEST_BYTES};

use crate::state::{SharedState, SubscriberId};

pub fn serve(mut stream: UnixStream, id: Option<String>, state: Arc<SharedState>) {
    let write_half = match stream.try_clone() {
        Ok(write_half) => write_half,
        Err(err) => {
            warn!(error = %err, "Failed to clone subscriber stream");
            let response = Response::error(id, "internal_error", "failed to open subscription");
            let _ = crate::write_response(&mut stream, response);
            return;
        }
    };

    let ack = Response::ok(id, serde_json::json!({ "subscribed": true }));
    if crate::write_response(&mut stream, ack).is_err() {
        return;
    }
    let _ = stream.set_read_timeout(None);

    let (subscriber, events) = state.subscribe();
    let writer = thread::spawn(move || run_writer(write_half, events, subscriber));

    read_client_events(stream, subscriber, &state);

    state.unsubscribe(subscriber);
    // The writer exits once the registry drops its sender.
    let _ = writer.join();
    info!(subscriber, "Subscription closed");
}

fn read_client_events(stream: UnixStream, subscriber: SubscriberId, state: &SharedState) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!(subscriber, error = %err, "Subscriber read ended");
                return;
            }
        };
        if line.len() > MAX_REQUEST_BYTES {
            warn!(subscriber, bytes = line.len(), "Dropping oversized subscriber event");
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ClientEvent>(&line) {
            Ok(event) => handle_client_event(event, subscriber, state),
            Err(err) => warn!(subscriber, error = %err, "Ignoring malformed subscriber event"),
        }
    }
}

fn handle_client_event(event: ClientEvent, subscriber: SubscriberId, state: &SharedState) {
    match event {
        ClientEvent::UpdateData(update) => {
            debug!(subscriber, key = %update.key, "Subscriber field update");
            state.apply(vec![update], Some(subscriber));
        }
        ClientEvent::UpdateButtonState(unit) => {
            info!(subscriber, locked = unit.locked, "Subscriber button update");
            state.apply(vec![FieldUpdate::button(unit)], Some(subscriber));
        }
        ClientEvent::KeyInput(stroke) => {
            if stroke.as_char().is_some() {
                state.relay_keystroke(stroke, subscriber);
            }
        }
    }
}

fn run_writer(mut stream: UnixStream, events: Receiver<ServerEvent>, subscriber: SubscriberId) {
    for event in events {
        let written = serde_json::to_writer(&mut stream, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| stream.write_all(b"\n"))
            .and_then(|_| stream.flush());
        if let Err(err) = written {
            debug!(subscriber, error = %err, "Subscriber write failed");
            break;
        }
    }
    // Unblocks the reader if the peer stopped reading but kept the socket open.
    let _ = stream.shutdown(std::net::Shutdown::Both);
}
