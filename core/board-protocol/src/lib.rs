//! Wire protocol shared by the vitalboard authority and its terminals.
//!
//! Both sides depend on this crate so the field vocabulary and event names
//! cannot drift. The authority remains the one that validates; terminals reuse
//! the same types to build requests and decode broadcasts.
//!
//! Two exchange styles share one socket:
//!
//! - **Request/response** (`get_state`, `update`, `get_health`): one JSON line in,
//!   one JSON line out, connection closed.
//! - **Subscription** (`subscribe`): the connection stays open; the authority
//!   writes [`ServerEvent`] lines and the client writes [`ClientEvent`] lines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const ERROR_TOO_MANY_CONNECTIONS: &str = "too_many_connections";

pub const BUTTON_TEXT_UNLOCKED: &str = "緊急開錠ボタン";
pub const BUTTON_TEXT_LOCKED: &str = "施錠";
pub const BUTTON_CLASS_LOCKED: &str = "locked";
pub const INDICATOR_UNLOCKED: &str = "transparent";
pub const INDICATOR_LOCKED: &str = "white";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetState,
    Update,
    Subscribe,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// -----------------------------------------------------------------------------
// Field vocabulary
// -----------------------------------------------------------------------------

/// Names of the SharedState fields as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Pulse,
    Oxygen,
    Condition,
    SleepYote,
    SleepFact,
    WakeYote,
    WakeFact,
    LastMeasure,
    NextMeasure,
    ButtonState,
}

impl FieldKey {
    pub const ALL: [FieldKey; 10] = [
        FieldKey::Pulse,
        FieldKey::Oxygen,
        FieldKey::Condition,
        FieldKey::SleepYote,
        FieldKey::SleepFact,
        FieldKey::WakeYote,
        FieldKey::WakeFact,
        FieldKey::LastMeasure,
        FieldKey::NextMeasure,
        FieldKey::ButtonState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::Pulse => "pulse",
            FieldKey::Oxygen => "oxygen",
            FieldKey::Condition => "condition",
            FieldKey::SleepYote => "sleep_yote",
            FieldKey::SleepFact => "sleep_fact",
            FieldKey::WakeYote => "wake_yote",
            FieldKey::WakeFact => "wake_fact",
            FieldKey::LastMeasure => "last_measure",
            FieldKey::NextMeasure => "next_measure",
            FieldKey::ButtonState => "button_state",
        }
    }

    pub fn parse(value: &str) -> Option<FieldKey> {
        FieldKey::ALL.into_iter().find(|key| key.as_str() == value)
    }

    pub fn is_button(&self) -> bool {
        matches!(self, FieldKey::ButtonState)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The emergency control's committed visual unit. The four fields only ever
/// change together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonUnit {
    pub text: String,
    #[serde(rename = "is_locked_open")]
    pub locked: bool,
    #[serde(rename = "class", default)]
    pub style_class: String,
    #[serde(rename = "en_color", default = "default_indicator")]
    pub indicator_color: String,
}

fn default_indicator() -> String {
    INDICATOR_UNLOCKED.to_string()
}

impl ButtonUnit {
    pub fn unlocked() -> Self {
        Self {
            text: BUTTON_TEXT_UNLOCKED.to_string(),
            locked: false,
            style_class: String::new(),
            indicator_color: INDICATOR_UNLOCKED.to_string(),
        }
    }

    pub fn locked() -> Self {
        Self {
            text: BUTTON_TEXT_LOCKED.to_string(),
            locked: true,
            style_class: BUTTON_CLASS_LOCKED.to_string(),
            indicator_color: INDICATOR_LOCKED.to_string(),
        }
    }

    pub fn for_state(locked: bool) -> Self {
        if locked {
            Self::locked()
        } else {
            Self::unlocked()
        }
    }

    /// True when text, class and color are the canonical rendering of `locked`.
    pub fn is_consistent(&self) -> bool {
        *self == Self::for_state(self.locked)
    }
}

impl Default for ButtonUnit {
    fn default() -> Self {
        Self::unlocked()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Button(ButtonUnit),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Button(_) => None,
        }
    }

    pub fn as_button(&self) -> Option<&ButtonUnit> {
        match self {
            FieldValue::Button(unit) => Some(unit),
            FieldValue::Text(_) => None,
        }
    }
}

/// A single-field mutation: `{key, value}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub key: FieldKey,
    pub value: FieldValue,
}

impl FieldUpdate {
    pub fn new(key: FieldKey, value: FieldValue) -> Result<Self, ErrorInfo> {
        let update = Self { key, value };
        update.validate()?;
        Ok(update)
    }

    pub fn text(key: FieldKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: FieldValue::Text(value.into()),
        }
    }

    pub fn button(unit: ButtonUnit) -> Self {
        Self {
            key: FieldKey::ButtonState,
            value: FieldValue::Button(unit),
        }
    }

    /// Key and value shape must agree: only `button_state` carries a unit.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match (&self.value, self.key.is_button()) {
            (FieldValue::Button(_), true) | (FieldValue::Text(_), false) => Ok(()),
            (FieldValue::Text(_), true) => Err(ErrorInfo::new(
                "invalid_value",
                "button_state requires a button unit",
            )),
            (FieldValue::Button(_), false) => Err(ErrorInfo::new(
                "invalid_value",
                format!("{} requires a string value", self.key),
            )),
        }
    }
}

// -----------------------------------------------------------------------------
// Snapshot
// -----------------------------------------------------------------------------

/// Full SharedState as a flat record. Missing fields decode to defaults so an
/// older authority never breaks a newer terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StateSnapshot {
    pub last_measure: String,
    pub next_measure: String,
    pub pulse: String,
    pub oxygen: String,
    pub condition: String,
    pub sleep_yote: String,
    pub sleep_fact: String,
    pub wake_yote: String,
    pub wake_fact: String,
    pub button_state: ButtonUnit,
}

impl StateSnapshot {
    fn text_slot(&mut self, key: FieldKey) -> Option<&mut String> {
        match key {
            FieldKey::Pulse => Some(&mut self.pulse),
            FieldKey::Oxygen => Some(&mut self.oxygen),
            FieldKey::Condition => Some(&mut self.condition),
            FieldKey::SleepYote => Some(&mut self.sleep_yote),
            FieldKey::SleepFact => Some(&mut self.sleep_fact),
            FieldKey::WakeYote => Some(&mut self.wake_yote),
            FieldKey::WakeFact => Some(&mut self.wake_fact),
            FieldKey::LastMeasure => Some(&mut self.last_measure),
            FieldKey::NextMeasure => Some(&mut self.next_measure),
            FieldKey::ButtonState => None,
        }
    }

    pub fn get(&self, key: FieldKey) -> FieldValue {
        let text = match key {
            FieldKey::Pulse => &self.pulse,
            FieldKey::Oxygen => &self.oxygen,
            FieldKey::Condition => &self.condition,
            FieldKey::SleepYote => &self.sleep_yote,
            FieldKey::SleepFact => &self.sleep_fact,
            FieldKey::WakeYote => &self.wake_yote,
            FieldKey::WakeFact => &self.wake_fact,
            FieldKey::LastMeasure => &self.last_measure,
            FieldKey::NextMeasure => &self.next_measure,
            FieldKey::ButtonState => return FieldValue::Button(self.button_state.clone()),
        };
        FieldValue::Text(text.clone())
    }

    /// Whole-field overwrite. Rejects a value whose shape does not fit the key.
    pub fn set(&mut self, update: FieldUpdate) -> Result<(), ErrorInfo> {
        update.validate()?;
        match update.value {
            FieldValue::Button(unit) => self.button_state = unit,
            FieldValue::Text(text) => {
                if let Some(slot) = self.text_slot(update.key) {
                    *slot = text;
                }
            }
        }
        Ok(())
    }

    /// Every field as an update, in wire-key order.
    pub fn fields(&self) -> Vec<FieldUpdate> {
        FieldKey::ALL
            .into_iter()
            .map(|key| FieldUpdate {
                key,
                value: self.get(key),
            })
            .collect()
    }
}

// -----------------------------------------------------------------------------
// Request params
// -----------------------------------------------------------------------------

/// Parses `update` params: a flat `{key: value}` map of fields to merge.
pub fn parse_update(params: Value) -> Result<Vec<FieldUpdate>, ErrorInfo> {
    let map = match params {
        Value::Object(map) => map,
        _ => return Err(ErrorInfo::new("invalid_params", "params must be an object")),
    };
    if map.is_empty() {
        return Err(ErrorInfo::new(
            "invalid_params",
            "update requires at least one field",
        ));
    }

    let mut updates = Vec::with_capacity(map.len());
    for (name, value) in map {
        let key = FieldKey::parse(&name).ok_or_else(|| {
            ErrorInfo::new("unknown_field", format!("{} is not a shared field", name))
        })?;
        updates.push(parse_field_value(key, value)?);
    }
    Ok(updates)
}

fn parse_field_value(key: FieldKey, value: Value) -> Result<FieldUpdate, ErrorInfo> {
    if key.is_button() {
        let unit: ButtonUnit = serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_value",
                format!("button_state is not a button unit: {}", err),
            )
        })?;
        return Ok(FieldUpdate::button(unit));
    }

    match value {
        Value::String(text) => Ok(FieldUpdate::text(key, text)),
        _ => Err(ErrorInfo::new(
            "invalid_value",
            format!("{} requires a string value", key),
        )),
    }
}

/// Builds the `update` params map for the given fields.
pub fn update_params(updates: &[FieldUpdate]) -> Value {
    let mut map = Map::new();
    for update in updates {
        let value = serde_json::to_value(&update.value).unwrap_or(Value::Null);
        map.insert(update.key.as_str().to_string(), value);
    }
    Value::Object(map)
}

// -----------------------------------------------------------------------------
// Subscription events
// -----------------------------------------------------------------------------

/// One typed character, forwarded for cross-terminal echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStroke {
    #[serde(rename = "char")]
    pub ch: String,
}

impl KeyStroke {
    pub fn new(ch: char) -> Self {
        Self { ch: ch.to_string() }
    }

    /// The single character carried, or `None` for empty or multi-char payloads.
    pub fn as_char(&self) -> Option<char> {
        let mut chars = self.ch.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Some(ch),
            _ => None,
        }
    }
}

/// Events a subscribed terminal sends to the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UpdateData(FieldUpdate),
    UpdateButtonState(ButtonUnit),
    KeyInput(KeyStroke),
}

/// Events the authority sends to a subscribed terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    InitialState(StateSnapshot),
    DataUpdated(FieldUpdate),
    ButtonStateUpdated(ButtonUnit),
    KeyReceived(KeyStroke),
}
