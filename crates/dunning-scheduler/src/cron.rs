//! Lightweight cron expression parser for the batch tick.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field syntax: *, */N, N, A-B, A-B/N, and comma lists of those.
//! Example: "0 9 * * 1-5" = weekdays at 09:00 UTC
//!
//! Day-of-week uses 0-6 with Sunday = 0 (7 is accepted as Sunday too).
//! When both day-of-month and day-of-week are restricted, a day matching
//! either one fires ("0 9 1 * 1" = the 1st and every Monday).

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Parsed schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    /// Both DOM and DOW restricted: days match on either.
    either_day: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(format!(
                "invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            ));
        }
        let field = |idx: usize, name: &str, min: u32, max: u32| {
            parse_field(parts[idx], min, max)
                .ok_or_else(|| format!("invalid {name} field '{}' in '{expression}'", parts[idx]))
        };

        let mut days_of_week = field(4, "day-of-week", 0, 7)?;
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }
        Ok(Self {
            minutes: field(0, "minute", 0, 59)?,
            hours: field(1, "hour", 0, 23)?,
            days_of_month: field(2, "day-of-month", 1, 31)?,
            months: field(3, "month", 1, 12)?,
            days_of_week,
            either_day: !parts[2].starts_with('*') && !parts[4].starts_with('*'),
        })
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(candidate);

        // One year of minutes covers every satisfiable DOM/MON combination.
        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += if self.day_matches(candidate) {
                Duration::minutes(1)
            } else {
                // Jump to the next midnight.
                Duration::minutes(i64::from(24 * 60 - (candidate.hour() * 60 + candidate.minute())))
            };
        }
        None
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(&t.day());
        let dow = self
            .days_of_week
            .contains(&t.weekday().num_days_from_sunday());
        let day = if self.either_day { dom || dow } else { dom && dow };
        day && self.months.contains(&t.month())
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.day_matches(t) && self.hours.contains(&t.hour()) && self.minutes.contains(&t.minute())
    }
}

/// Parse a cron field into the set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for part in field.split(',') {
        values.extend(parse_part(part.trim(), min, max)?);
    }
    if values.is_empty() { None } else { Some(values) }
}

fn parse_part(part: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let n: u32 = step.parse().ok()?;
            if n == 0 {
                return None;
            }
            (range, n)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse().ok()?, b.parse().ok()?)
    } else {
        let n: u32 = range.parse().ok()?;
        // "5/15" means from 5 to max every 15
        if step > 1 { (n, max) } else { (n, n) }
    };

    if lo < min || hi > max || lo > hi {
        return None;
    }
    Some((lo..=hi).step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_at_nine() {
        let daily = CronSchedule::parse("0 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 2, 1, 7, 0, 0).unwrap();
        let next = daily.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap());

        // Exactly at the tick: the next one is tomorrow.
        let next = daily.next_after(next).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 30).unwrap();
        let next = CronSchedule::parse("*/15 * * * *").unwrap().next_after(after).unwrap();
        assert_eq!(next.minute(), 15);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_weekdays_only() {
        // 2025-02-01 is a Saturday.
        let after = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        let next = CronSchedule::parse("30 8 * * 1-5").unwrap().next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 3, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_lists_and_sunday_as_seven() {
        let schedule = CronSchedule::parse("0 8,17 * * 7").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 2, 2, 9, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(after),
            Some(Utc.with_ymd_and_hms(2025, 2, 2, 17, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_first_of_month() {
        let after = Utc.with_ymd_and_hms(2025, 2, 14, 12, 0, 0).unwrap();
        let next = CronSchedule::parse("0 6 1 * *").unwrap().next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        let schedule = CronSchedule::parse("0 9 1 * 1").unwrap();
        // Saturday 2025-02-01, after the tick: next is Monday the 3rd.
        let after = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(after),
            Some(Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap())
        );
        // Tuesday 2025-02-25: the 1st (a Saturday) comes before Monday the 3rd.
        let after = Utc.with_ymd_and_hms(2025, 2, 25, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(after),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSchedule::parse("bad").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("0 9 * * 1-9").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 9 5-2 * *").is_err());
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(schedule.next_after(Utc::now()), None);
    }
}
