//! Next-measurement deadline derived from the last-measurement label.
//!
//! The overdue flag is never stored or trusted from the wire. Every reader
//! recomputes it from `(last label, now)`; the store calls into this module
//! after each last-measurement change and on each clock tick.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::patterns::RE_MEASUREMENT_TIME;

pub const DEFAULT_INTERVAL_HOURS: i64 = 4;
pub const LAST_MEASURE_PREFIX: &str = "【前回の測定】";
pub const NEXT_MEASURE_PREFIX: &str = "【次回測定予定】";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextMeasurement {
    pub label: String,
    pub deadline: Option<NaiveDateTime>,
    pub overdue: bool,
}

/// Fixed-interval measurement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueCalculator {
    interval_hours: i64,
}

impl Default for OverdueCalculator {
    fn default() -> Self {
        Self {
            interval_hours: DEFAULT_INTERVAL_HOURS,
        }
    }
}

impl OverdueCalculator {
    pub fn new(interval_hours: i64) -> Self {
        Self {
            interval_hours: interval_hours.max(1),
        }
    }

    pub fn interval_hours(&self) -> i64 {
        self.interval_hours
    }

    /// Label shown when no usable last-measurement time exists.
    pub fn sentinel_label(&self) -> String {
        format!("{} {}時間後", NEXT_MEASURE_PREFIX, self.interval_hours)
    }

    pub fn compute_next(&self, last_label: &str, now: NaiveDateTime) -> NextMeasurement {
        let deadline = parse_measurement_time(last_label).and_then(|last| {
            Duration::try_hours(self.interval_hours).and_then(|step| last.checked_add_signed(step))
        });
        let Some(deadline) = deadline else {
            return NextMeasurement {
                label: self.sentinel_label(),
                deadline: None,
                overdue: false,
            };
        };

        NextMeasurement {
            label: format!(
                "{} {:02}時{:02}分",
                NEXT_MEASURE_PREFIX,
                deadline.hour(),
                deadline.minute()
            ),
            deadline: Some(deadline),
            overdue: now > deadline,
        }
    }
}

/// Deadline with the default four-hour policy.
pub fn compute_next(last_label: &str, now: NaiveDateTime) -> NextMeasurement {
    OverdueCalculator::default().compute_next(last_label, now)
}

/// Extracts the embedded date-time. Impossible calendar values yield `None`.
pub fn parse_measurement_time(label: &str) -> Option<NaiveDateTime> {
    let captures = RE_MEASUREMENT_TIME.captures(label)?;
    let number = |index: usize| captures[index].parse::<u32>().ok();

    let year = captures[1].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, number(2)?, number(3)?)?.and_hms_opt(number(4)?, number(5)?, 0)
}

/// Last-measurement label for an instant, in the form the parser reads back.
pub fn measurement_label(now: NaiveDateTime) -> String {
    format!(
        "{} {}",
        LAST_MEASURE_PREFIX,
        now.format("%Y年%m月%d日 %H時%M分")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_overdue_after_deadline() {
        let next = compute_next("2024年01月01日 08時00分", at(2024, 1, 1, 13, 0));
        assert_eq!(next.deadline, Some(at(2024, 1, 1, 12, 0)));
        assert!(next.overdue);
        assert!(next.label.ends_with("12時00分"));
    }

    #[test]
    fn test_not_overdue_before_deadline() {
        let next = compute_next("2024年01月01日 08時00分", at(2024, 1, 1, 11, 0));
        assert!(!next.overdue);
        assert_eq!(next.label, "【次回測定予定】 12時00分");
    }

    #[test]
    fn test_exact_deadline_is_not_overdue() {
        let next = compute_next("2024年01月01日 08時00分", at(2024, 1, 1, 12, 0));
        assert!(!next.overdue);
    }

    #[test]
    fn test_unrepresentable_deadline_falls_back_to_sentinel() {
        let calculator = OverdueCalculator::new(10_000_000_000);
        let next = calculator.compute_next("2024年01月01日 08時00分", at(2024, 1, 1, 13, 0));
        assert_eq!(next.deadline, None);
        assert!(!next.overdue);
        assert_eq!(next.label, calculator.sentinel_label());
    }

    #[test]
    fn test_deadline_crosses_midnight() {
        let next = compute_next("【前回の測定】 2024年12月31日 22時30分", at(2025, 1, 1, 1, 0));
        assert_eq!(next.deadline, Some(at(2025, 1, 1, 2, 30)));
        assert_eq!(next.label, "【次回測定予定】 02時30分");
        assert!(!next.overdue);
    }

    #[test]
    fn test_irregular_whitespace_tolerated() {
        for label in [
            "【前回の測定】 2025年9月30日 16時30分",
            "【前回の測定】　2025年 9月 30日　16時 30分",
            "2025年09月30日16時30分",
        ] {
            assert_eq!(parse_measurement_time(label), Some(at(2025, 9, 30, 16, 30)), "{}", label);
        }
    }

    #[test]
    fn test_unparseable_label_yields_sentinel() {
        for label in ["", "not yet", "2025/09/30 16:30", "2025年13月01日 10時00分", "2025年01月01日 25時00分"] {
            let next = compute_next(label, at(2099, 1, 1, 0, 0));
            assert_eq!(next.label, "【次回測定予定】 4時間後");
            assert!(!next.overdue);
            assert_eq!(next.deadline, None);
        }
    }

    #[test]
    fn test_measurement_label_parses_back() {
        let now = at(2024, 3, 5, 7, 9);
        let label = measurement_label(now);
        assert_eq!(label, "【前回の測定】 2024年03月05日 07時09分");
        assert_eq!(parse_measurement_time(&label), Some(now));
    }

    #[test]
    fn test_custom_interval() {
        let calculator = OverdueCalculator::new(6);
        let next = calculator.compute_next("2024年01月01日 08時00分", at(2024, 1, 1, 13, 0));
        assert_eq!(next.label, "【次回測定予定】 14時00分");
        assert!(!next.overdue);
        assert_eq!(calculator.sentinel_label(), "【次回測定予定】 6時間後");
    }
}
