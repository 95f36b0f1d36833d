//! Compiled regex patterns for the command language and measurement labels.
//!
//! Digits are matched as `[0-9]` rather than `\d`: Unicode `\d` would accept
//! full-width digits that the hour/minute conversion cannot parse.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Command Payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// `H/M` or `HH/MM` time-of-day payload.
pub static RE_TIME_PAYLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{1,2})/([0-9]{1,2})$").unwrap());

/// Unsigned integer payload for pulse and oxygen.
pub static RE_NUMBER_PAYLOAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Measurement Labels
// ═══════════════════════════════════════════════════════════════════════════════

/// `YYYY年M月D日 H時M分` anywhere in a label, with any whitespace between parts.
pub static RE_MEASUREMENT_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{4})年\s*([0-9]{1,2})月\s*([0-9]{1,2})日\s*([0-9]{1,2})時\s*([0-9]{1,2})分")
        .unwrap()
});
