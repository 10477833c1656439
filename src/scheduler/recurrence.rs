//! Repeat rules for scheduled tasks.
//!
//! Next occurrences are derived from the nominal occurrence a task belongs
//! to, not from the instant it happened to finish. A late or retried run
//! therefore never shifts the rest of the series, and missed slots are
//! skipped instead of replayed.

use std::fmt;

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeDelta, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// How many months ahead to search for a monthly day that exists.
const MONTH_SEARCH_LIMIT: u32 = 48;

/// Longest accepted fixed interval: one hundred years.
pub const MAX_INTERVAL_SECS: u64 = 100 * 366 * 86_400;

/// How a task repeats.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// Runs once.
    #[default]
    None,
    /// Runs every `secs` seconds, measured from the first occurrence.
    FixedInterval {
        /// Interval in seconds between occurrences.
        secs: u64,
    },
    /// Runs on a wall-clock calendar pattern (UTC).
    Calendar(CalendarPattern),
}

/// Calendar repeat pattern. All times are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum CalendarPattern {
    /// Every day at `hour:minute`.
    Daily {
        /// Hour of day (0-23).
        hour: u8,
        /// Minute of hour (0-59).
        minute: u8,
    },
    /// On each listed weekday at `hour:minute`.
    Weekly {
        /// Days the task runs on.
        weekdays: Vec<Weekday>,
        /// Hour of day (0-23).
        hour: u8,
        /// Minute of hour (0-59).
        minute: u8,
    },
    /// On day `day` of each month at `hour:minute`. Months without that day are skipped.
    Monthly {
        /// Day of month (1-31).
        day: u8,
        /// Hour of day (0-23).
        hour: u8,
        /// Minute of hour (0-59).
        minute: u8,
    },
}

impl Recurrence {
    /// Every `hours` hours.
    #[must_use]
    pub fn every_hours(hours: u64) -> Self {
        Self::FixedInterval {
            secs: hours.saturating_mul(3600),
        }
    }

    /// Daily at `hour:minute` UTC.
    #[must_use]
    pub fn daily(hour: u8, minute: u8) -> Self {
        Self::Calendar(CalendarPattern::Daily { hour, minute })
    }

    /// Returns `true` unless this is [`Recurrence::None`].
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Reject rules that can never produce a future occurrence.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Self::None => Ok(()),
            Self::FixedInterval { secs } => {
                if *secs == 0 {
                    return Err(ScheduleError::InvalidRecurrence(
                        "interval must be greater than zero".to_owned(),
                    ));
                }
                if *secs > MAX_INTERVAL_SECS {
                    return Err(ScheduleError::InvalidRecurrence(format!(
                        "interval of {secs}s exceeds {MAX_INTERVAL_SECS}s"
                    )));
                }
                Ok(())
            }
            Self::Calendar(pattern) => pattern.validate(),
        }
    }

    /// First occurrence strictly after both `previous` and `now`.
    ///
    /// `anchor` is the nominal occurrence the previous run belonged to.
    /// Returns `None` for one-off tasks and for rules that fail validation.
    #[must_use]
    pub fn next_after(
        &self,
        anchor: DateTime<Utc>,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let floor = previous.max(now);
        match self {
            Self::None => None,
            Self::FixedInterval { secs } => {
                let step = i64::try_from(*secs).ok().filter(|s| *s > 0)?;
                let elapsed = (floor - anchor).num_seconds();
                let periods = if elapsed < 0 { 1 } else { elapsed / step + 1 };
                let offset = TimeDelta::try_seconds(periods.checked_mul(step)?)?;
                let next = anchor.checked_add_signed(offset)?;
                // Sub-second residue in `floor` can leave `next` equal to it.
                if next > floor {
                    Some(next)
                } else {
                    next.checked_add_signed(TimeDelta::try_seconds(step)?)
                }
            }
            Self::Calendar(pattern) => pattern.next_after(floor),
        }
    }
}

impl CalendarPattern {
    fn validate(&self) -> Result<(), ScheduleError> {
        let (hour, minute) = match self {
            Self::Daily { hour, minute } | Self::Monthly { hour, minute, .. } => (*hour, *minute),
            Self::Weekly {
                weekdays,
                hour,
                minute,
            } => {
                if weekdays.is_empty() {
                    return Err(ScheduleError::InvalidRecurrence(
                        "weekly pattern needs at least one weekday".to_owned(),
                    ));
                }
                (*hour, *minute)
            }
        };
        if hour > 23 {
            return Err(ScheduleError::InvalidRecurrence(format!(
                "hour {hour} out of range 0-23"
            )));
        }
        if minute > 59 {
            return Err(ScheduleError::InvalidRecurrence(format!(
                "minute {minute} out of range 0-59"
            )));
        }
        if let Self::Monthly { day, .. } = self
            && !(1..=31).contains(day)
        {
            return Err(ScheduleError::InvalidRecurrence(format!(
                "day {day} out of range 1-31"
            )));
        }
        Ok(())
    }

    fn next_after(&self, floor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.validate().is_err() {
            return None;
        }
        let start = floor.date_naive();
        match self {
            Self::Daily { hour, minute } => (0..=1)
                .filter_map(|offset| start.checked_add_days(Days::new(offset)))
                .filter_map(|date| at(date, *hour, *minute))
                .find(|candidate| *candidate > floor),
            Self::Weekly {
                weekdays,
                hour,
                minute,
            } => (0..=7)
                .filter_map(|offset| start.checked_add_days(Days::new(offset)))
                .filter(|date| weekdays.contains(&date.weekday()))
                .filter_map(|date| at(date, *hour, *minute))
                .find(|candidate| *candidate > floor),
            Self::Monthly { day, hour, minute } => {
                let (mut year, mut month) = (start.year(), start.month());
                for _ in 0..MONTH_SEARCH_LIMIT {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, u32::from(*day))
                        && let Some(candidate) = at(date, *hour, *minute)
                        && candidate > floor
                    {
                        return Some(candidate);
                    }
                    if month == 12 {
                        year += 1;
                        month = 1;
                    } else {
                        month += 1;
                    }
                }
                None
            }
        }
    }
}

fn at(date: NaiveDate, hour: u8, minute: u8) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(u32::from(hour), u32::from(minute), 0)?;
    Utc.from_local_datetime(&naive).single()
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("once"),
            Self::FixedInterval { secs } => {
                if *secs >= 3600 && secs % 3600 == 0 {
                    write!(f, "every {} hours", secs / 3600)
                } else if *secs >= 60 && secs % 60 == 0 {
                    write!(f, "every {} minutes", secs / 60)
                } else {
                    write!(f, "every {secs} seconds")
                }
            }
            Self::Calendar(pattern) => pattern.fmt(f),
        }
    }
}

impl fmt::Display for CalendarPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02} UTC"),
            Self::Weekly {
                weekdays,
                hour,
                minute,
            } => {
                let days: Vec<String> = weekdays.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "weekly on {} at {hour:02}:{minute:02} UTC",
                    days.join(", ")
                )
            }
            Self::Monthly { day, hour, minute } => {
                write!(f, "monthly on day {day} at {hour:02}:{minute:02} UTC")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn fixed_interval_steps_from_anchor() {
        let anchor = utc(2026, 3, 1, 8, 0, 0);
        let rule = Recurrence::every_hours(24);
        // Finished late after retries: next slot still lands on the anchor grid.
        let finished = anchor + TimeDelta::seconds(15);
        let next = rule.next_after(anchor, finished, finished).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 8, 0, 0));
    }

    #[test]
    fn fixed_interval_skips_missed_slots() {
        let anchor = utc(2026, 3, 1, 8, 0, 0);
        let rule = Recurrence::FixedInterval { secs: 3600 };
        let now = utc(2026, 3, 1, 11, 30, 0);
        let next = rule.next_after(anchor, anchor, now).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 12, 0, 0));
    }

    #[test]
    fn fixed_interval_exact_boundary_moves_forward() {
        let anchor = utc(2026, 3, 1, 8, 0, 0);
        let rule = Recurrence::FixedInterval { secs: 3600 };
        let now = utc(2026, 3, 1, 9, 0, 0);
        let next = rule.next_after(anchor, anchor, now).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 10, 0, 0));
    }

    #[test]
    fn next_is_strictly_increasing() {
        let rules = [
            Recurrence::FixedInterval { secs: 90 },
            Recurrence::daily(9, 0),
            Recurrence::Calendar(CalendarPattern::Weekly {
                weekdays: vec![Weekday::Mon, Weekday::Thu],
                hour: 7,
                minute: 15,
            }),
            Recurrence::Calendar(CalendarPattern::Monthly {
                day: 31,
                hour: 0,
                minute: 0,
            }),
        ];
        for rule in rules {
            let mut anchor = utc(2026, 1, 1, 0, 0, 0);
            let mut previous = anchor;
            for _ in 0..20 {
                let next = rule.next_after(anchor, previous, previous).unwrap();
                assert!(next > previous, "{rule} did not advance past {previous}");
                anchor = next;
                previous = next;
            }
        }
    }

    #[test]
    fn daily_rolls_to_tomorrow_after_slot() {
        let rule = Recurrence::daily(9, 0);
        let now = utc(2026, 5, 10, 9, 0, 0);
        assert_eq!(
            rule.next_after(now, now, now).unwrap(),
            utc(2026, 5, 11, 9, 0, 0)
        );
        let early = utc(2026, 5, 10, 8, 59, 0);
        assert_eq!(
            rule.next_after(early, early, early).unwrap(),
            utc(2026, 5, 10, 9, 0, 0)
        );
    }

    #[test]
    fn weekly_picks_next_listed_day() {
        // 2026-05-13 is a Wednesday.
        let now = utc(2026, 5, 13, 12, 0, 0);
        let rule = Recurrence::Calendar(CalendarPattern::Weekly {
            weekdays: vec![Weekday::Mon, Weekday::Fri],
            hour: 6,
            minute: 30,
        });
        assert_eq!(
            rule.next_after(now, now, now).unwrap(),
            utc(2026, 5, 15, 6, 30, 0)
        );
    }

    #[test]
    fn monthly_skips_short_months() {
        let now = utc(2026, 1, 31, 12, 0, 0);
        let rule = Recurrence::Calendar(CalendarPattern::Monthly {
            day: 31,
            hour: 10,
            minute: 0,
        });
        assert_eq!(
            rule.next_after(now, now, now).unwrap(),
            utc(2026, 3, 31, 10, 0, 0)
        );
    }

    #[test]
    fn none_has_no_next() {
        let now = utc(2026, 1, 1, 0, 0, 0);
        assert!(Recurrence::None.next_after(now, now, now).is_none());
    }

    #[test]
    fn validation_rejects_impossible_rules() {
        assert!(Recurrence::FixedInterval { secs: 0 }.validate().is_err());
        assert!(Recurrence::daily(24, 0).validate().is_err());
        assert!(Recurrence::daily(0, 60).validate().is_err());
        assert!(
            Recurrence::Calendar(CalendarPattern::Weekly {
                weekdays: vec![],
                hour: 1,
                minute: 0,
            })
            .validate()
            .is_err()
        );
        assert!(
            Recurrence::Calendar(CalendarPattern::Monthly {
                day: 0,
                hour: 1,
                minute: 0,
            })
            .validate()
            .is_err()
        );
        assert!(Recurrence::daily(23, 59).validate().is_ok());
    }

    #[test]
    fn oversized_intervals_are_rejected_without_panicking() {
        let now = utc(2026, 1, 1, 0, 0, 0);
        let huge = Recurrence::FixedInterval { secs: 1 << 60 };
        assert!(huge.validate().is_err());
        assert!(huge.next_after(now, now, now).is_none());

        let saturated = Recurrence::every_hours(u64::MAX);
        assert!(saturated.validate().is_err());
        assert!(saturated.next_after(now, now, now).is_none());

        let longest = Recurrence::FixedInterval {
            secs: MAX_INTERVAL_SECS,
        };
        assert!(longest.validate().is_ok());
        assert!(longest.next_after(now, now, now).unwrap() > now);
        assert!(longest.next_after(DateTime::<Utc>::MAX_UTC, now, now).is_none());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Recurrence::every_hours(24).to_string(), "every 24 hours");
        assert_eq!(
            Recurrence::FixedInterval { secs: 300 }.to_string(),
            "every 5 minutes"
        );
        assert_eq!(Recurrence::daily(9, 0).to_string(), "daily at 09:00 UTC");
        assert_eq!(Recurrence::None.to_string(), "once");
    }

    #[test]
    fn serde_round_trip_keeps_nested_pattern() {
        let rule = Recurrence::Calendar(CalendarPattern::Weekly {
            weekdays: vec![Weekday::Tue],
            hour: 8,
            minute: 5,
        });
        let json = serde_json::to_string(&rule).unwrap();
        let back: Recurrence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
