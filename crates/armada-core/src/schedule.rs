//! The recurrence rule driving unattended mission creation.
//!
//! An [`AutoScheduleFrequency`] is a set of (day-of-week, time-of-day) pairs.
//! All schedule math is pure: the caller supplies both the watermark (the
//! last fire instant) and `now`, and the core never touches the system clock.
//! Times are interpreted in UTC.

use crate::error::Error;
use crate::{AutoScheduleFrequencyId, TimeAndDayId};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAndDay {
    pub id: TimeAndDayId,
    pub day_of_week: Weekday,
    pub time_of_day: NaiveTime,
}

impl TimeAndDay {
    #[must_use]
    pub fn new(day_of_week: Weekday, time_of_day: NaiveTime) -> Self {
        Self { id: TimeAndDayId::new(), day_of_week, time_of_day }
    }

    /// First instant strictly after `after` that lands on this entry's
    /// weekday and time.
    fn next_occurrence_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let days_ahead = i64::from(
            (self.day_of_week.num_days_from_monday() + 7
                - after.weekday().num_days_from_monday())
                % 7,
        );
        let date = after.date_naive() + Duration::days(days_ahead);
        let mut candidate = NaiveDateTime::new(date, self.time_of_day).and_utc();
        if candidate <= after {
            candidate += Duration::days(7);
        }
        candidate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScheduleFrequency {
    pub id: AutoScheduleFrequencyId,
    pub entries: Vec<TimeAndDay>,
}

impl AutoScheduleFrequency {
    #[must_use]
    pub fn new(entries: Vec<TimeAndDay>) -> Self {
        Self { id: AutoScheduleFrequencyId::new(), entries }
    }

    /// A frequency with no entries can never fire and is a configuration
    /// error, surfaced to the operator rather than silently skipped.
    pub fn validate(&self) -> Result<(), Error> {
        if self.entries.is_empty() {
            return Err(Error::ScheduleMisconfigured(format!(
                "auto-schedule frequency {} has no time-and-day entries",
                self.id
            )));
        }
        Ok(())
    }

    /// Smallest fire instant strictly after `after`. Entries landing on the
    /// identical instant tie-break by lowest entry id, which is arbitrary
    /// but deterministic.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        self.validate()?;
        let best = self
            .entries
            .iter()
            .map(|entry| (entry.next_occurrence_after(after), entry.id))
            .min_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(instant, _)| instant);
        best.ok_or_else(|| Error::ScheduleMisconfigured(format!("frequency {}", self.id)))
    }

    /// The single instant a catch-up run should fire for: the latest due
    /// instant in `(watermark, now]`. Multiple overdue fires collapse to
    /// this one instant so an engine outage never floods the fleet with a
    /// backlog burst. Returns `None` when nothing is due yet.
    pub fn latest_due(
        &self,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let mut due = self.next_fire_after(watermark)?;
        if due > now {
            return Ok(None);
        }
        loop {
            let next = self.next_fire_after(due)?;
            if next > now {
                return Ok(Some(due));
            }
            due = next;
        }
    }
}

pub fn weekday_to_db(day: Weekday) -> i64 {
    i64::from(day.num_days_from_monday())
}

pub fn weekday_from_db(raw: i64) -> Option<Weekday> {
    match raw {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn monday_0800() -> AutoScheduleFrequency {
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        AutoScheduleFrequency::new(vec![TimeAndDay::new(Weekday::Mon, time)])
    }

    #[test]
    fn empty_frequency_is_misconfigured() {
        let frequency = AutoScheduleFrequency::new(vec![]);
        assert!(matches!(frequency.validate(), Err(Error::ScheduleMisconfigured(_))));
    }

    #[test]
    fn next_fire_lands_on_following_monday() {
        // 2024-01-01 is a Monday.
        let frequency = monday_0800();
        let after = utc(2024, 1, 1, 8, 0);
        let next = frequency.next_fire_after(after).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 8, 0));
    }

    #[test]
    fn next_fire_same_day_later_time() {
        let frequency = monday_0800();
        let after = utc(2024, 1, 1, 6, 0);
        assert_eq!(frequency.next_fire_after(after).unwrap(), utc(2024, 1, 1, 8, 0));
    }

    #[test]
    fn overdue_fires_collapse_to_latest_due_instant() {
        // Last fire the previous Monday 08:00; now the following Monday
        // 09:00. Exactly one catch-up instant at the following Monday 08:00.
        let frequency = monday_0800();
        let watermark = utc(2024, 1, 1, 8, 0);
        let now = utc(2024, 1, 8, 9, 0);
        assert_eq!(frequency.latest_due(watermark, now).unwrap(), Some(utc(2024, 1, 8, 8, 0)));
    }

    #[test]
    fn multi_week_outage_still_yields_one_instant() {
        let frequency = monday_0800();
        let watermark = utc(2024, 1, 1, 8, 0);
        let now = utc(2024, 1, 23, 12, 0);
        // Mondays 8th, 15th and 22nd are all overdue; only the 22nd fires.
        assert_eq!(frequency.latest_due(watermark, now).unwrap(), Some(utc(2024, 1, 22, 8, 0)));
    }

    #[test]
    fn nothing_due_before_first_occurrence() {
        let frequency = monday_0800();
        let watermark = utc(2024, 1, 1, 8, 0);
        let now = utc(2024, 1, 3, 12, 0);
        assert_eq!(frequency.latest_due(watermark, now).unwrap(), None);
    }

    #[test]
    fn identical_instants_tie_break_by_lowest_id() {
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let low = TimeAndDay {
            id: TimeAndDayId(Uuid::from_u128(1)),
            day_of_week: Weekday::Mon,
            time_of_day: time,
        };
        let high = TimeAndDay {
            id: TimeAndDayId(Uuid::from_u128(2)),
            day_of_week: Weekday::Mon,
            time_of_day: time,
        };
        let frequency = AutoScheduleFrequency::new(vec![high, low]);
        let next = frequency.next_fire_after(utc(2024, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 8, 0));
    }

    #[test]
    fn weekday_db_round_trip() {
        for day in [Weekday::Mon, Weekday::Thu, Weekday::Sun] {
            assert_eq!(weekday_from_db(weekday_to_db(day)), Some(day));
        }
        assert_eq!(weekday_from_db(7), None);
    }
}
