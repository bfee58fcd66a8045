use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::cron::{CronError, CronSchedule};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("unknown timezone `{0}`")]
    Timezone(String),
    #[error("invalid time `{0}`, expected HH:MM")]
    Time(String),
    #[error("invalid start date `{0}`, expected YYYY-MM-DD")]
    StartDate(String),
    #[error("`every` must be a positive interval of at most ten years")]
    Interval,
    #[error("`weekday` must be between 0 (Sunday) and 6")]
    Weekday,
    #[error("`dayOfMonth` must be between 1 and 31")]
    DayOfMonth,
    #[error("cron frequency needs a `cron` expression")]
    MissingCron,
    #[error(transparent)]
    Cron(#[from] CronError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Minutes,
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
    Cron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub every: Option<i64>,
    #[serde(default)]
    pub cron: Option<String>,
    /// 0 = Sunday.
    #[serde(default)]
    pub weekday: Option<u32>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

// Daily/weekly/monthly searches walk at most this many local days.
const MAX_CALENDAR_SCAN_DAYS: i64 = 400;
// Upper bound for `every`, in minutes (ten years).
const MAX_INTERVAL_MINUTES: i64 = 10 * 366 * 24 * 60;

/// Schedule config checked once, with everything parsed.
struct ResolvedSchedule {
    frequency: Frequency,
    tz: Tz,
    time: NaiveTime,
    start: Option<DateTime<Utc>>,
    every: i64,
    weekday: Weekday,
    day_of_month: u32,
    cron: Option<CronSchedule>,
}

fn parse_timezone(tz: &str) -> Result<Tz, ScheduleError> {
    if tz.trim().is_empty() {
        return Ok(chrono_tz::UTC);
    }
    tz.trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleError::Timezone(tz.to_string()))
}

fn parse_time(raw: &str) -> Result<NaiveTime, ScheduleError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(NaiveTime::MIN);
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ScheduleError::Time(raw.to_string()))
}

fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    // Ambiguous local times resolve to the earliest instant; gaps are skipped.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn weekday_from_index(index: u32) -> Result<Weekday, ScheduleError> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        _ => Err(ScheduleError::Weekday),
    }
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

impl ScheduleConfig {
    fn resolve(&self) -> Result<ResolvedSchedule, ScheduleError> {
        let tz = parse_timezone(&self.timezone)?;
        let time = parse_time(&self.time)?;

        let start = match self.start_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| ScheduleError::StartDate(raw.to_string()))?;
                Some(
                    localize(tz, date.and_time(time))
                        .ok_or_else(|| ScheduleError::StartDate(raw.to_string()))?,
                )
            }
            _ => None,
        };

        let every = self.every.unwrap_or(1);
        let every_minutes = match self.frequency {
            Frequency::Hourly => every.checked_mul(60),
            _ => Some(every),
        };
        if every <= 0 || every_minutes.is_none_or(|m| m > MAX_INTERVAL_MINUTES) {
            return Err(ScheduleError::Interval);
        }

        let weekday = weekday_from_index(self.weekday.unwrap_or(1))?;
        let day_of_month = self.day_of_month.unwrap_or(1);
        if !(1..=31).contains(&day_of_month) {
            return Err(ScheduleError::DayOfMonth);
        }

        let cron = match self.frequency {
            Frequency::Cron => {
                let expr = self
                    .cron
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(ScheduleError::MissingCron)?;
                Some(CronSchedule::parse(expr)?)
            }
            _ => None,
        };

        Ok(ResolvedSchedule {
            frequency: self.frequency,
            tz,
            time,
            start,
            every,
            weekday,
            day_of_month,
            cron,
        })
    }

    /// Parses every field; used when a workflow is saved.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.resolve().map(|_| ())
    }
}

impl ResolvedSchedule {
    fn interval(&self) -> Option<Duration> {
        match self.frequency {
            Frequency::Minutes => Duration::try_minutes(self.every),
            Frequency::Hourly => Duration::try_hours(self.every),
            _ => None,
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        match self.frequency {
            Frequency::Weekly => date.weekday() == self.weekday,
            Frequency::Monthly => date.day() == self.day_of_month.min(last_day_of_month(date)),
            _ => true,
        }
    }

    /// First calendar slot at `time` on a matching local day, at or after `bound`.
    fn next_calendar_slot(&self, bound: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let first_day = bound.with_timezone(&self.tz).date_naive().pred_opt()?;
        (0..MAX_CALENDAR_SCAN_DAYS)
            .filter_map(|offset| first_day.checked_add_signed(Duration::days(offset)))
            .filter(|date| self.day_matches(*date))
            .filter_map(|date| localize(self.tz, date.and_time(self.time)))
            .find(|candidate| *candidate >= bound)
    }

    /// First `anchor + k * step` at or after `bound`.
    fn next_interval_slot(
        anchor: DateTime<Utc>,
        step: Duration,
        bound: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if anchor >= bound {
            return Some(anchor);
        }
        let step_ms = step.num_milliseconds().max(1);
        let behind_ms = (bound - anchor).num_milliseconds();
        let steps = (behind_ms + step_ms - 1) / step_ms;
        let mut candidate = anchor.checked_add_signed(Duration::milliseconds(steps * step_ms))?;
        if candidate < bound {
            candidate = candidate.checked_add_signed(step)?;
        }
        Some(candidate)
    }
}

/// Next UTC instant the schedule fires: strictly after `last_run`, never before
/// `now`. `None` means the schedule is exhausted (a `once` that already ran).
pub fn compute_next_run(
    config: &ScheduleConfig,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = config.resolve()?;

    let mut bound = match last_run {
        Some(last) => now.max(
            last.checked_add_signed(Duration::nanoseconds(1))
                .unwrap_or(last),
        ),
        None => now,
    };
    if let Some(start) = schedule.start {
        bound = bound.max(start);
    }

    let next = match schedule.frequency {
        Frequency::Once => {
            if last_run.is_some() {
                return Ok(None);
            }
            match schedule.start {
                Some(start) => Some(start.max(now)),
                None => schedule.next_calendar_slot(now),
            }
        }
        Frequency::Minutes | Frequency::Hourly => {
            let step = schedule.interval().ok_or(ScheduleError::Interval)?;
            let anchor = match (schedule.start, last_run) {
                (Some(start), _) => Some(start),
                (None, Some(last)) => last.checked_add_signed(step),
                (None, None) => now.checked_add_signed(step),
            }
            .ok_or(ScheduleError::Interval)?;
            ResolvedSchedule::next_interval_slot(anchor, step, bound)
        }
        Frequency::Daily | Frequency::Weekly | Frequency::Monthly => {
            schedule.next_calendar_slot(bound)
        }
        Frequency::Cron => {
            let cron = schedule.cron.as_ref().ok_or(ScheduleError::MissingCron)?;
            // `next_after` is strict, so step back to include `bound` itself.
            let from = (bound - Duration::nanoseconds(1)).with_timezone(&schedule.tz);
            cron.next_after(&from).map(|dt| dt.with_timezone(&Utc))
        }
    };

    Ok(next)
}

pub fn parse_schedule_config(value: &serde_json::Value) -> Result<ScheduleConfig, ScheduleError> {
    Ok(serde_json::from_value(value.clone())?)
}

pub fn offset_to_utc(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

pub fn utc_to_offset(dt: DateTime<Utc>) -> Option<OffsetDateTime> {
    let base = OffsetDateTime::from_unix_timestamp(dt.timestamp()).ok()?;
    base.replace_nanosecond(dt.timestamp_subsec_nanos()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn config(value: serde_json::Value) -> ScheduleConfig {
        parse_schedule_config(&value).unwrap()
    }

    #[test]
    fn daily_runs_later_today_or_tomorrow() {
        let cfg = config(json!({"frequency": "daily", "time": "09:30"}));
        let next = compute_next_run(&cfg, None, at("2025-03-10T08:00:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-10T09:30:00Z")));

        let next = compute_next_run(&cfg, None, at("2025-03-10T10:00:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-11T09:30:00Z")));
    }

    #[test]
    fn daily_never_repeats_last_run() {
        let cfg = config(json!({"frequency": "daily", "time": "09:30"}));
        let last = at("2025-03-10T09:30:00Z");
        let next = compute_next_run(&cfg, Some(last), last).unwrap();
        assert_eq!(next, Some(at("2025-03-11T09:30:00Z")));
    }

    #[test]
    fn daily_respects_timezone() {
        let cfg = config(json!({
            "frequency": "daily",
            "time": "09:00",
            "timezone": "Europe/Berlin"
        }));
        // CET is UTC+1 in March before the DST switch
        let next = compute_next_run(&cfg, None, at("2025-03-10T00:00:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-10T08:00:00Z")));
    }

    #[test]
    fn weekly_picks_configured_weekday() {
        // 2025-03-10 is a Monday; ask for Thursdays
        let cfg = config(json!({"frequency": "weekly", "time": "12:00", "weekday": 4}));
        let next = compute_next_run(&cfg, None, at("2025-03-10T13:00:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-13T12:00:00Z")));
    }

    #[test]
    fn monthly_clamps_to_short_months() {
        let cfg = config(json!({"frequency": "monthly", "time": "06:00", "dayOfMonth": 31}));
        let next = compute_next_run(&cfg, None, at("2025-02-01T00:00:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-02-28T06:00:00Z")));
    }

    #[test]
    fn minutes_interval_rolls_forward_past_missed_slots() {
        let cfg = config(json!({
            "frequency": "minutes",
            "every": 15,
            "startDate": "2025-03-10",
            "time": "08:00"
        }));
        let next = compute_next_run(&cfg, None, at("2025-03-10T08:20:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-10T08:30:00Z")));

        let last = at("2025-03-10T08:30:00Z");
        let next = compute_next_run(&cfg, Some(last), at("2025-03-10T09:01:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-10T09:15:00Z")));
    }

    #[test]
    fn hourly_without_start_date_counts_from_last_run() {
        let cfg = config(json!({"frequency": "hourly", "every": 2}));
        let last = at("2025-03-10T08:00:00Z");
        let next = compute_next_run(&cfg, Some(last), at("2025-03-10T08:05:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-10T10:00:00Z")));
    }

    #[test]
    fn once_fires_a_single_time() {
        let cfg = config(json!({
            "frequency": "once",
            "startDate": "2025-04-01",
            "time": "10:00"
        }));
        let now = at("2025-03-10T00:00:00Z");
        assert_eq!(
            compute_next_run(&cfg, None, now).unwrap(),
            Some(at("2025-04-01T10:00:00Z"))
        );
        assert_eq!(
            compute_next_run(&cfg, Some(at("2025-04-01T10:00:00Z")), now).unwrap(),
            None
        );
    }

    #[test]
    fn cron_frequency_uses_expression() {
        let cfg = config(json!({"frequency": "cron", "cron": "0 */6 * * *"}));
        let next = compute_next_run(&cfg, None, at("2025-03-10T07:00:00Z")).unwrap();
        assert_eq!(next, Some(at("2025-03-10T12:00:00Z")));

        let exact = at("2025-03-10T12:00:00Z");
        let next = compute_next_run(&cfg, None, exact).unwrap();
        assert_eq!(next, Some(exact));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            config(json!({"frequency": "cron"})).validate(),
            Err(ScheduleError::MissingCron)
        ));
        assert!(matches!(
            config(json!({"timezone": "Mars/Olympus"})).validate(),
            Err(ScheduleError::Timezone(_))
        ));
        assert!(matches!(
            config(json!({"time": "25:99"})).validate(),
            Err(ScheduleError::Time(_))
        ));
        assert!(matches!(
            config(json!({"frequency": "minutes", "every": 0})).validate(),
            Err(ScheduleError::Interval)
        ));
        assert!(parse_schedule_config(&json!({"frequency": "yearly"})).is_err());
    }

    #[test]
    fn oversized_intervals_are_errors_not_panics() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        for raw in [
            json!({"frequency": "minutes", "every": 10_000_000_000_000_i64}),
            json!({"frequency": "hourly", "every": i64::MAX}),
            json!({"frequency": "hourly", "every": 100_000}),
        ] {
            let cfg = config(raw);
            assert!(matches!(cfg.validate(), Err(ScheduleError::Interval)));
            assert!(matches!(
                compute_next_run(&cfg, None, now),
                Err(ScheduleError::Interval)
            ));
            assert!(matches!(
                compute_next_run(&cfg, Some(now), now),
                Err(ScheduleError::Interval)
            ));
        }

        // Ten years of hours is still accepted.
        let cfg = config(json!({"frequency": "hourly", "every": 87_600}));
        assert!(cfg.validate().is_ok());
        assert!(compute_next_run(&cfg, None, now).unwrap().is_some());
    }

    #[test]
    fn offset_and_chrono_conversions_agree() {
        let now = OffsetDateTime::now_utc();
        let chrono = offset_to_utc(now).unwrap();
        assert_eq!(utc_to_offset(chrono).unwrap(), now);
    }
}
