//! Keystroke buffer and echo line.
//!
//! Printable characters accumulate in the buffer and the echo line. Backspace
//! clears both without parsing. Enter parses the buffer, commits a valid
//! command locally and outward, then clears both whatever the outcome.

use chrono::NaiveDateTime;
use vitalboard_protocol::FieldKey;

use crate::command::{CommandParser, Rejected};
use crate::store::LocalStateStore;
use crate::sync::SyncClient;

const ECHO_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Typed(char),
    Cleared,
    Committed(FieldKey),
    Rejected(Rejected),
    Ignored,
}

#[derive(Debug, Default)]
pub struct InputController {
    buffer: String,
    echo: Vec<char>,
    parser: CommandParser,
}

impl InputController {
    pub fn new(parser: CommandParser) -> Self {
        Self {
            buffer: String::new(),
            echo: Vec::new(),
            parser,
        }
    }

    pub fn handle_key(
        &mut self,
        key: Key,
        store: &mut LocalStateStore,
        sync: &mut SyncClient,
        now: NaiveDateTime,
    ) -> KeyOutcome {
        match key {
            Key::Char(ch) if ch.is_control() => KeyOutcome::Ignored,
            Key::Char(ch) => {
                self.buffer.push(ch);
                self.echo.push(ch);
                sync.forward_keystroke(ch);
                KeyOutcome::Typed(ch)
            }
            Key::Backspace => {
                self.clear();
                KeyOutcome::Cleared
            }
            Key::Enter => {
                let outcome = match self.parser.parse(&self.buffer) {
                    Ok(command) => {
                        let mutation = command.into_mutation(now);
                        let key = store.apply(&mutation, now);
                        sync.push_local_mutation(&mutation);
                        sync.refresh_after_commit();
                        tracing::debug!(key = %key, "Command committed");
                        KeyOutcome::Committed(key)
                    }
                    Err(rejected) => {
                        tracing::debug!(buffer = %self.buffer, reason = %rejected, "Command rejected");
                        KeyOutcome::Rejected(rejected)
                    }
                };
                self.clear();
                outcome
            }
        }
    }

    /// Appends a character typed on another terminal. Never parsed here.
    pub fn append_remote_echo(&mut self, ch: char) {
        if !ch.is_control() {
            self.echo.push(ch);
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn echo_text(&self) -> String {
        self.echo
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join(ECHO_SEPARATOR)
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.echo.clear();
    }
}
