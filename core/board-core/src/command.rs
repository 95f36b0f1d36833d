//! Keystroke command language.
//!
//! A buffer is everything typed since the last Enter/Backspace. Rules are
//! checked in this order; the first prefix that matches decides the command,
//! and a bad payload rejects the whole buffer.
//!
//! ```text
//! s                 → record a measurement now
//! sy|sz|ky|kz H/M   → sleep planned | sleep actual | wake planned | wake actual
//! m N               → pulse
//! o N               → oxygen
//! t 1|2|3           → condition
//! ```

use chrono::NaiveDateTime;
use thiserror::Error;
use vitalboard_protocol::FieldKey;

use crate::overdue::measurement_label;
use crate::patterns::{RE_NUMBER_PAYLOAD, RE_TIME_PAYLOAD};
use crate::store::Mutation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleField {
    SleepPlanned,
    SleepActual,
    WakePlanned,
    WakeActual,
}

impl ScheduleField {
    pub const ALL: [ScheduleField; 4] = [
        ScheduleField::SleepPlanned,
        ScheduleField::SleepActual,
        ScheduleField::WakePlanned,
        ScheduleField::WakeActual,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            ScheduleField::SleepPlanned => "sy",
            ScheduleField::SleepActual => "sz",
            ScheduleField::WakePlanned => "ky",
            ScheduleField::WakeActual => "kz",
        }
    }

    pub fn key(&self) -> FieldKey {
        match self {
            ScheduleField::SleepPlanned => FieldKey::SleepYote,
            ScheduleField::SleepActual => FieldKey::SleepFact,
            ScheduleField::WakePlanned => FieldKey::WakeYote,
            ScheduleField::WakeActual => FieldKey::WakeFact,
        }
    }

    pub fn from_key(key: FieldKey) -> Option<ScheduleField> {
        ScheduleField::ALL.into_iter().find(|field| field.key() == key)
    }
}

/// Observed condition of the monitored person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Good,
    MildDistress,
    Distress,
}

impl Condition {
    pub fn from_code(code: char) -> Option<Condition> {
        match code {
            '1' => Some(Condition::Good),
            '2' => Some(Condition::MildDistress),
            '3' => Some(Condition::Distress),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            Condition::Good => '1',
            Condition::MildDistress => '2',
            Condition::Distress => '3',
        }
    }

    /// Label stored by the authority and shown on every terminal.
    pub fn label(&self) -> &'static str {
        match self {
            Condition::Good => "良い",
            Condition::MildDistress => "やや悪い",
            Condition::Distress => "苦しい",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Condition::Good => "good",
            Condition::MildDistress => "mild-distress",
            Condition::Distress => "distress",
        }
    }

    /// Accepts the stored label or the English name.
    pub fn from_label(value: &str) -> Option<Condition> {
        let value = value.trim();
        [Condition::Good, Condition::MildDistress, Condition::Distress]
            .into_iter()
            .find(|condition| condition.label() == value || condition.name() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RecordMeasurementNow,
    SetScheduleTime {
        field: ScheduleField,
        hour: u8,
        minute: u8,
    },
    SetPulse(String),
    SetOxygen(String),
    SetCondition(Condition),
}

impl Command {
    /// The field-scoped mutation this command performs at `now`.
    pub fn into_mutation(self, now: NaiveDateTime) -> Mutation {
        match self {
            Command::RecordMeasurementNow => Mutation::LastMeasurement(measurement_label(now)),
            Command::SetScheduleTime {
                field,
                hour,
                minute,
            } => Mutation::Schedule(field, format_time_label(hour, minute)),
            Command::SetPulse(value) => Mutation::Pulse(value),
            Command::SetOxygen(value) => Mutation::Oxygen(value),
            Command::SetCondition(condition) => Mutation::Condition(condition),
        }
    }
}

/// Canonical `HH時MM分` label. Zero-padding is the only normalization.
pub fn format_time_label(hour: u8, minute: u8) -> String {
    format!("{:02}時{:02}分", hour, minute)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0:?}")]
    Unknown(String),

    #[error("invalid payload for {command}: {payload:?}")]
    InvalidPayload {
        command: &'static str,
        payload: String,
    },

    #[error("time out of range: {hour}/{minute}")]
    OutOfRange { hour: u8, minute: u8 },
}

/// Turns a keystroke buffer into a [`Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandParser {
    strict_time_range: bool,
}

impl CommandParser {
    pub fn new(strict_time_range: bool) -> Self {
        Self { strict_time_range }
    }

    pub fn parse(&self, buffer: &str) -> Result<Command, Rejected> {
        if buffer.is_empty() {
            return Err(Rejected::Empty);
        }

        if buffer == "s" {
            return Ok(Command::RecordMeasurementNow);
        }

        for field in ScheduleField::ALL {
            if let Some(payload) = buffer.strip_prefix(field.prefix()) {
                return self.parse_time(field, payload);
            }
        }

        if let Some(payload) = buffer.strip_prefix('m') {
            return parse_number("m", payload).map(Command::SetPulse);
        }

        if let Some(payload) = buffer.strip_prefix('o') {
            return parse_number("o", payload).map(Command::SetOxygen);
        }

        if let Some(payload) = buffer.strip_prefix('t') {
            let mut chars = payload.chars();
            return match (chars.next().and_then(Condition::from_code), chars.next()) {
                (Some(condition), None) => Ok(Command::SetCondition(condition)),
                _ => Err(Rejected::InvalidPayload {
                    command: "t",
                    payload: payload.to_string(),
                }),
            };
        }

        Err(Rejected::Unknown(buffer.to_string()))
    }

    fn parse_time(&self, field: ScheduleField, payload: &str) -> Result<Command, Rejected> {
        let invalid = || Rejected::InvalidPayload {
            command: field.prefix(),
            payload: payload.to_string(),
        };
        let captures = RE_TIME_PAYLOAD.captures(payload).ok_or_else(invalid)?;
        let hour: u8 = captures[1].parse().map_err(|_| invalid())?;
        let minute: u8 = captures[2].parse().map_err(|_| invalid())?;

        if self.strict_time_range && (hour > 23 || minute > 59) {
            return Err(Rejected::OutOfRange { hour, minute });
        }

        Ok(Command::SetScheduleTime {
            field,
            hour,
            minute,
        })
    }
}

fn parse_number(command: &'static str, payload: &str) -> Result<String, Rejected> {
    if RE_NUMBER_PAYLOAD.is_match(payload) {
        Ok(payload.to_string())
    } else {
        Err(Rejected::InvalidPayload {
            command,
            payload: payload.to_string(),
        })
    }
}

/// Parses with the default (pass-through) time policy.
pub fn parse_command(buffer: &str) -> Result<Command, Rejected> {
    CommandParser::default().parse(buffer)
}
