//! One terminal's in-memory mirror of SharedState.
//!
//! The store is the only thing rendering reads. It is mutated by local
//! commands, by the button state machine and by inbound sync events, always
//! through [`LocalStateStore::apply`], so derived values are recomputed on
//! every path.
//!
//! # Field-scoped mutations
//!
//! A [`Mutation`] names exactly one field (or the whole button unit). There is
//! no mutation for `next_measure`: it is derived from `last_measure` and an
//! inbound value for it is dropped.

use chrono::NaiveDateTime;
use vitalboard_protocol::{ButtonUnit, FieldKey, FieldUpdate, FieldValue, StateSnapshot};

use crate::button::FeedbackMarker;
use crate::command::{Condition, ScheduleField};
use crate::error::{BoardError, Result};
use crate::overdue::{NextMeasurement, OverdueCalculator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Pulse(String),
    Oxygen(String),
    Condition(Condition),
    Schedule(ScheduleField, String),
    LastMeasurement(String),
    Button(ButtonUnit),
}

impl Mutation {
    pub fn key(&self) -> FieldKey {
        match self {
            Mutation::Pulse(_) => FieldKey::Pulse,
            Mutation::Oxygen(_) => FieldKey::Oxygen,
            Mutation::Condition(_) => FieldKey::Condition,
            Mutation::Schedule(field, _) => field.key(),
            Mutation::LastMeasurement(_) => FieldKey::LastMeasure,
            Mutation::Button(_) => FieldKey::ButtonState,
        }
    }

    pub fn to_update(&self) -> FieldUpdate {
        match self {
            Mutation::Pulse(value) | Mutation::Oxygen(value) => {
                FieldUpdate::text(self.key(), value.clone())
            }
            Mutation::Condition(condition) => FieldUpdate::text(self.key(), condition.label()),
            Mutation::Schedule(_, label) | Mutation::LastMeasurement(label) => {
                FieldUpdate::text(self.key(), label.clone())
            }
            Mutation::Button(unit) => FieldUpdate::button(unit.clone()),
        }
    }

    /// Decodes an inbound field. `Ok(None)` means the field is derived locally.
    pub fn from_update(update: &FieldUpdate) -> Result<Option<Mutation>> {
        update.validate().map_err(|info| BoardError::InvalidField {
            key: update.key,
            details: info.message,
        })?;

        let text = || update.value.as_text().unwrap_or_default().to_string();
        let mutation = match update.key {
            FieldKey::Pulse => Mutation::Pulse(text()),
            FieldKey::Oxygen => Mutation::Oxygen(normalize_oxygen(&text())),
            FieldKey::Condition => {
                let label = text();
                let condition =
                    Condition::from_label(&label).ok_or_else(|| BoardError::InvalidField {
                        key: FieldKey::Condition,
                        details: format!("unknown condition {:?}", label),
                    })?;
                Mutation::Condition(condition)
            }
            FieldKey::SleepYote | FieldKey::SleepFact | FieldKey::WakeYote | FieldKey::WakeFact => {
                match ScheduleField::from_key(update.key) {
                    Some(field) => Mutation::Schedule(field, text()),
                    None => return Ok(None),
                }
            }
            FieldKey::LastMeasure => Mutation::LastMeasurement(text()),
            FieldKey::NextMeasure => return Ok(None),
            FieldKey::ButtonState => match &update.value {
                FieldValue::Button(unit) => Mutation::Button(unit.clone()),
                FieldValue::Text(_) => return Ok(None),
            },
        };
        Ok(Some(mutation))
    }
}

/// The seed state stores oxygen as `98％`; terminals add the unit themselves.
fn normalize_oxygen(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(['%', '％'])
        .trim_end()
        .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vitals {
    pub pulse: String,
    pub oxygen: String,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub sleep_planned: String,
    pub sleep_actual: String,
    pub wake_planned: String,
    pub wake_actual: String,
}

impl Schedule {
    pub fn get(&self, field: ScheduleField) -> &str {
        match field {
            ScheduleField::SleepPlanned => &self.sleep_planned,
            ScheduleField::SleepActual => &self.sleep_actual,
            ScheduleField::WakePlanned => &self.wake_planned,
            ScheduleField::WakeActual => &self.wake_actual,
        }
    }

    fn slot(&mut self, field: ScheduleField) -> &mut String {
        match field {
            ScheduleField::SleepPlanned => &mut self.sleep_planned,
            ScheduleField::SleepActual => &mut self.sleep_actual,
            ScheduleField::WakePlanned => &mut self.wake_planned,
            ScheduleField::WakeActual => &mut self.wake_actual,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalStateStore {
    vitals: Vitals,
    schedule: Schedule,
    last_measurement: String,
    next: NextMeasurement,
    button: ButtonUnit,
    feedback: Option<FeedbackMarker>,
    calculator: OverdueCalculator,
    revision: u64,
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::new(OverdueCalculator::default())
    }
}

impl LocalStateStore {
    pub fn new(calculator: OverdueCalculator) -> Self {
        Self {
            vitals: Vitals::default(),
            schedule: Schedule::default(),
            last_measurement: String::new(),
            next: NextMeasurement {
                label: calculator.sentinel_label(),
                deadline: None,
                overdue: false,
            },
            button: ButtonUnit::unlocked(),
            feedback: None,
            calculator,
            revision: 0,
        }
    }

    /// Whole-field overwrite. Returns the key that changed.
    pub fn apply(&mut self, mutation: &Mutation, now: NaiveDateTime) -> FieldKey {
        match mutation {
            Mutation::Pulse(value) => self.vitals.pulse = value.clone(),
            Mutation::Oxygen(value) => self.vitals.oxygen = value.clone(),
            Mutation::Condition(condition) => self.vitals.condition = Some(*condition),
            Mutation::Schedule(field, label) => *self.schedule.slot(*field) = label.clone(),
            Mutation::LastMeasurement(label) => {
                self.last_measurement = label.clone();
                self.next = self.calculator.compute_next(&self.last_measurement, now);
            }
            Mutation::Button(unit) => self.button = unit.clone(),
        }
        self.revision += 1;
        mutation.key()
    }

    /// Recomputes the deadline label and overdue flag. Returns true when either changed.
    pub fn refresh_derived(&mut self, now: NaiveDateTime) -> bool {
        let next = self.calculator.compute_next(&self.last_measurement, now);
        if next == self.next {
            return false;
        }
        self.next = next;
        true
    }

    pub(crate) fn set_feedback(&mut self, marker: Option<FeedbackMarker>) {
        self.feedback = marker;
    }

    pub fn vitals(&self) -> &Vitals {
        &self.vitals
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn last_measurement(&self) -> &str {
        &self.last_measurement
    }

    pub fn next_measurement(&self) -> &NextMeasurement {
        &self.next
    }

    pub fn button(&self) -> &ButtonUnit {
        &self.button
    }

    /// Transient marker shown while a button transition is pending.
    pub fn feedback(&self) -> Option<FeedbackMarker> {
        self.feedback
    }

    /// Count of applied mutations; lets hosts skip redraws.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn oxygen_display(&self) -> String {
        if self.vitals.oxygen.is_empty() {
            String::new()
        } else {
            format!("{}%", self.vitals.oxygen)
        }
    }

    pub fn condition_display(&self) -> &'static str {
        self.vitals
            .condition
            .map(|condition| condition.label())
            .unwrap_or("-")
    }

    /// The store as a flat record, with the locally derived next label.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            last_measure: self.last_measurement.clone(),
            next_measure: self.next.label.clone(),
            pulse: self.vitals.pulse.clone(),
            oxygen: self.vitals.oxygen.clone(),
            condition: self
                .vitals
                .condition
                .map(|condition| condition.label().to_string())
                .unwrap_or_default(),
            sleep_yote: self.schedule.sleep_planned.clone(),
            sleep_fact: self.schedule.sleep_actual.clone(),
            wake_yote: self.schedule.wake_planned.clone(),
            wake_fact: self.schedule.wake_actual.clone(),
            button_state: self.button.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_apply_updates_single_field() {
        let mut store = LocalStateStore::default();
        let before = store.snapshot();
        let key = store.apply(&Mutation::Pulse("72".into()), now());
        assert_eq!(key, FieldKey::Pulse);

        let after = store.snapshot();
        assert_eq!(after.pulse, "72");
        assert_eq!(
            StateSnapshot {
                pulse: before.pulse.clone(),
                ..after
            },
            before
        );
    }

    #[test]
    fn test_last_measurement_recomputes_next() {
        let mut store = LocalStateStore::default();
        store.apply(
            &Mutation::LastMeasurement("【前回の測定】 2024年01月01日 08時00分".into()),
            now(),
        );
        assert_eq!(store.next_measurement().label, "【次回測定予定】 12時00分");
        assert!(store.next_measurement().overdue);
    }

    #[test]
    fn test_refresh_derived_tracks_clock() {
        let mut store = LocalStateStore::default();
        let early = now() - chrono::Duration::hours(3);
        store.apply(
            &Mutation::LastMeasurement("2024年01月01日 08時00分".into()),
            early,
        );
        assert!(!store.next_measurement().overdue);
        assert!(store.refresh_derived(now()));
        assert!(store.next_measurement().overdue);
        assert!(!store.refresh_derived(now()));
    }

    #[test]
    fn test_inbound_next_measure_is_dropped() {
        let update = FieldUpdate::text(FieldKey::NextMeasure, "【次回測定予定】 00時00分");
        assert_eq!(Mutation::from_update(&update).unwrap(), None);
    }

    #[test]
    fn test_inbound_oxygen_strips_unit() {
        for raw in ["98", "98％", "98%", " 98 % "] {
            let update = FieldUpdate::text(FieldKey::Oxygen, raw);
            assert_eq!(
                Mutation::from_update(&update).unwrap(),
                Some(Mutation::Oxygen("98".into()))
            );
        }
    }

    #[test]
    fn test_inbound_unknown_condition_is_error() {
        let update = FieldUpdate::text(FieldKey::Condition, "unknown");
        assert!(Mutation::from_update(&update).is_err());
    }

    #[test]
    fn test_mutation_wire_round_trip() {
        let mutations = [
            Mutation::Pulse("80".into()),
            Mutation::Condition(Condition::Distress),
            Mutation::Schedule(ScheduleField::WakeActual, "06時10分".into()),
            Mutation::LastMeasurement("【前回の測定】 2024年01月01日 08時00分".into()),
            Mutation::Button(ButtonUnit::locked()),
        ];
        for mutation in mutations {
            let decoded = Mutation::from_update(&mutation.to_update()).unwrap();
            assert_eq!(decoded, Some(mutation));
        }
    }

    #[test]
    fn test_display_helpers() {
        let mut store = LocalStateStore::default();
        assert_eq!(store.condition_display(), "-");
        assert_eq!(store.oxygen_display(), "");
        store.apply(&Mutation::Oxygen("98".into()), now());
        store.apply(&Mutation::Condition(Condition::Good), now());
        assert_eq!(store.oxygen_display(), "98%");
        assert_eq!(store.condition_display(), "良い");
    }
}
