//! Five-field cron expressions (`minute hour day-of-month month day-of-week`).
//!
//! Each field accepts `*`, single values, `a-b` ranges, comma lists and a
//! `/step` suffix on `*` or a range. Day-of-week uses 0-6 with Sunday as 0
//! (7 is accepted as Sunday too). When both day fields are restricted a day
//! matches if either of them does.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression must have 5 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field} field `{value}`")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

// A year of four-year cycles keeps Feb 29 schedules reachable.
const SEARCH_DAYS: i64 = 366 * 4 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(fields[0], MINUTE)?,
            hours: parse_field(fields[1], HOUR)?,
            days_of_month: parse_field(fields[2], DAY_OF_MONTH)?,
            months: parse_field(fields[3], MONTH)?,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`, evaluated in `after`'s
    /// timezone. Local times skipped by a DST jump never match.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let local = after.naive_local();
        let start_date = local.date();

        for offset in 0..SEARCH_DAYS {
            let date = start_date.checked_add_signed(Duration::days(offset))?;
            if !self.day_matches(date) {
                continue;
            }
            for hour in bits(self.hours) {
                for minute in bits(self.minutes) {
                    let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest()
                    else {
                        continue;
                    };
                    if candidate > *after {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

fn bits(mask: u64) -> impl Iterator<Item = u32> {
    (0..64u32).filter(move |i| mask & (1u64 << i) != 0)
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<u64, CronError> {
    let invalid = || CronError::InvalidField {
        field: spec.name,
        value: raw.to_string(),
    };

    let mut mask = 0u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (
                lo.parse().map_err(|_| invalid())?,
                hi.parse().map_err(|_| invalid())?,
            )
        } else {
            let value: u32 = range.parse().map_err(|_| invalid())?;
            // `5/15` means "from 5 to the end, every 15"
            if step > 1 {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        if lo < spec.min || hi > spec.max || lo > hi {
            return Err(invalid());
        }
        for value in (lo..=hi).step_by(step as usize) {
            mask |= 1 << value;
        }
    }

    if mask == 0 {
        return Err(invalid());
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            CronSchedule::parse("* * * *").unwrap_err(),
            CronError::FieldCount(4)
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
    }

    #[test]
    fn every_fifteen_minutes() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        let next = cron.next_after(&at("2025-03-10T10:07:30Z")).unwrap();
        assert_eq!(next, at("2025-03-10T10:15:00Z"));
        let next = cron.next_after(&next).unwrap();
        assert_eq!(next, at("2025-03-10T10:30:00Z"));
    }

    #[test]
    fn weekdays_at_nine() {
        let cron = CronSchedule::parse("0 9 * * 1-5").unwrap();
        // 2025-03-08 is a Saturday
        let next = cron.next_after(&at("2025-03-08T12:00:00Z")).unwrap();
        assert_eq!(next, at("2025-03-10T09:00:00Z"));
    }

    #[test]
    fn sunday_accepts_zero_and_seven() {
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let seven = CronSchedule::parse("0 0 * * 7").unwrap();
        assert_eq!(zero, seven);
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // 1st of the month or any Friday
        let cron = CronSchedule::parse("0 8 1 * 5").unwrap();
        // 2025-03-05 is a Wednesday; the next Friday is the 7th
        let next = cron.next_after(&at("2025-03-05T00:00:00Z")).unwrap();
        assert_eq!(next, at("2025-03-07T08:00:00Z"));
    }

    #[test]
    fn leap_day_is_found() {
        let cron = CronSchedule::parse("0 0 29 2 *").unwrap();
        let next = cron.next_after(&at("2025-01-01T00:00:00Z")).unwrap();
        assert_eq!(next, at("2028-02-29T00:00:00Z"));
    }

    #[test]
    fn evaluates_in_local_timezone() {
        let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
        let cron = CronSchedule::parse("30 9 * * *").unwrap();
        let after = at("2025-07-01T00:00:00Z").with_timezone(&tz);
        let next = cron.next_after(&after).unwrap();
        // EDT is UTC-4
        assert_eq!(next.with_timezone(&Utc), at("2025-07-01T13:30:00Z"));
    }
}
