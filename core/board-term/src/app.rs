//! Terminal event loop.
//!
//! Two helper threads feed the session channel: one turns crossterm key
//! presses into session events, one posts a clock tick every second. The main
//! thread drains the channel, hands each event to the session and redraws.

use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{backend::CrosstermBackend, Terminal};

use vitalboard_core::{Key, SessionEvent, TerminalSession};

use crate::ui;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const INPUT_POLL: Duration = Duration::from_millis(100);

/// Maps a key press to the session event it triggers, if any.
pub fn map_key(key: KeyEvent) -> Option<SessionEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Esc => Some(SessionEvent::Shutdown),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(SessionEvent::Shutdown)
        }
        KeyCode::Tab => Some(SessionEvent::ActivateButton),
        KeyCode::Enter => Some(SessionEvent::Key(Key::Enter)),
        KeyCode::Backspace => Some(SessionEvent::Key(Key::Backspace)),
        KeyCode::Char(_) if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
            None
        }
        KeyCode::Char(ch) => Some(SessionEvent::Key(Key::Char(ch))),
        _ => None,
    }
}

pub fn spawn_input_thread(events: Sender<SessionEvent>) {
    thread::spawn(move || loop {
        match event::poll(INPUT_POLL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                tracing::error!(error = %err, "Terminal input failed");
                let _ = events.send(SessionEvent::Shutdown);
                return;
            }
        }
        let mapped = match event::read() {
            Ok(Event::Key(key)) => map_key(key),
            Ok(_) => None,
            Err(err) => {
                tracing::error!(error = %err, "Terminal input failed");
                Some(SessionEvent::Shutdown)
            }
        };
        if let Some(mapped) = mapped {
            let quitting = matches!(mapped, SessionEvent::Shutdown);
            if events.send(mapped).is_err() || quitting {
                return;
            }
        }
    });
}

pub fn spawn_tick_thread(events: Sender<SessionEvent>) {
    thread::spawn(move || loop {
        thread::sleep(TICK_INTERVAL);
        if events.send(SessionEvent::Tick).is_err() {
            return;
        }
    });
}

pub fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &mut TerminalSession,
    events: Receiver<SessionEvent>,
) -> io::Result<()> {
    terminal.draw(|f| ui::render(f, session))?;
    loop {
        let event = match events.recv_timeout(TICK_INTERVAL * 2) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                session.shutdown();
                return Ok(());
            }
        };

        if let SessionEvent::TransportFailed(message) = &event {
            tracing::warn!(error = %message, "Sync transport failure");
        }

        let now = chrono::Local::now().naive_local();
        if !session.handle(event, now) {
            return Ok(());
        }
        terminal.draw(|f| ui::render(f, session))?;
    }
}
