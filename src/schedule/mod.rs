use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub mod other;
pub mod periodic;
pub mod persistence;
pub mod registry;
pub mod scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    pub fn times(&self, interval: u32) -> Duration {
        let interval = i64::from(interval);
        match self {
            TimeUnit::Seconds => Duration::seconds(interval),
            TimeUnit::Minutes => Duration::minutes(interval),
            TimeUnit::Hours => Duration::hours(interval),
            TimeUnit::Days => Duration::days(interval),
            TimeUnit::Weeks => Duration::weeks(interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    ZeroInterval,
    /// The at time does not match the format the unit owns.
    InvalidAtTime { at: String, unit: TimeUnit },
    AtTimeNeedsUnit(TimeUnit),
    StartDayNeedsWeeks(TimeUnit),
    InvalidDuration(String),
    DurationExceedsPeriod { duration: Duration, period: Duration },
    Overlap { existing: String },
    OutOfBounds(String),
    UnknownJob(JobId),
}

/// Registry handle of a scheduled job. Holding one never keeps the job alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::ZeroInterval => write!(f, "Interval must be at least 1"),
            ScheduleError::InvalidAtTime { at, unit } => {
                let expected = match unit {
                    TimeUnit::Hours => "MM:SS or :MM",
                    TimeUnit::Minutes => ":SS",
                    _ => "HH:MM or HH:MM:SS",
                };
                write!(f, "Invalid at time '{}' for a job every few {}, expected {}", at, unit, expected)
            }
            ScheduleError::AtTimeNeedsUnit(unit) => write!(
                f,
                "An at time needs a daily, hourly or minutely job (or a start day), not {}",
                unit
            ),
            ScheduleError::StartDayNeedsWeeks(unit) => {
                write!(f, "A start day can only be used with weekly jobs, not {}", unit)
            }
            ScheduleError::InvalidDuration(duration) => {
                write!(f, "Invalid duration '{}', expected H:MM:SS", duration)
            }
            ScheduleError::DurationExceedsPeriod { duration, period } => write!(
                f,
                "Duration of {}s must be shorter than the job period of {}s",
                duration.num_seconds(),
                period.num_seconds()
            ),
            ScheduleError::Overlap { existing } => write!(f, "Overlaps with existing program {}", existing),
            ScheduleError::OutOfBounds(reason) => write!(f, "{}", reason),
            ScheduleError::UnknownJob(id) => write!(f, "No job with id {}", id),
        }
    }
}

/// A recurrence: every `interval` `unit`s, optionally at a UTC time of day
/// and optionally anchored to a weekday.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    interval: u32,
    unit: TimeUnit,
    at_time: Option<NaiveTime>,
    start_day: Option<Weekday>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    tags: BTreeSet<String>,
}

impl Job {
    pub fn every(interval: u32, unit: TimeUnit) -> Result<Self, ScheduleError> {
        if interval == 0 {
            return Err(ScheduleError::ZeroInterval);
        }
        Ok(Self {
            interval,
            unit,
            at_time: None,
            start_day: None,
            last_run: None,
            next_run: None,
            tags: BTreeSet::new(),
        })
    }

    /// Anchor a weekly job to a weekday.
    pub fn starting_on(mut self, day: Weekday) -> Result<Self, ScheduleError> {
        if self.unit != TimeUnit::Weeks {
            return Err(ScheduleError::StartDayNeedsWeeks(self.unit));
        }
        self.start_day = Some(day);
        Ok(self)
    }

    /// Parse an at time in the format the unit owns:
    /// `HH:MM[:SS]` for daily or weekday jobs, `MM:SS` / `:MM` for hourly, `:SS` for minutely.
    pub fn at(self, at: &str) -> Result<Self, ScheduleError> {
        let time = parse_at(self.unit, self.start_day.is_some(), at)?;
        Ok(self.with_at_time(time))
    }

    /// Set the at time directly, truncated to the fields the unit owns.
    pub fn with_at_time(mut self, at_time: NaiveTime) -> Self {
        self.set_at_time(at_time);
        self
    }

    pub fn set_at_time(&mut self, at_time: NaiveTime) {
        let anchored = self.start_day.is_some();
        let hour = if self.unit == TimeUnit::Days || anchored { at_time.hour() } else { 0 };
        let minute = if matches!(self.unit, TimeUnit::Days | TimeUnit::Hours) || anchored {
            at_time.minute()
        } else {
            0
        };
        self.at_time = NaiveTime::from_hms_opt(hour, minute, at_time.second());
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_owned());
        self
    }

    pub fn get_interval(&self) -> u32 {
        self.interval
    }

    pub fn get_unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn get_at_time(&self) -> Option<NaiveTime> {
        self.at_time
    }

    pub fn get_start_day(&self) -> Option<Weekday> {
        self.start_day
    }

    pub fn get_next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    pub fn get_tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn period(&self) -> Duration {
        self.unit.times(self.interval)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|next_run| now >= next_run)
    }

    /// Compute and store the next run.
    pub fn schedule_next(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let next_run = compute_next_run(self, now)?;
        self.next_run = Some(next_run);
        Ok(next_run)
    }

    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "every {} {}", self.interval, self.unit)?;
        if let Some(day) = self.start_day {
            write!(f, " on {}", day)?;
        }
        if let Some(at) = self.at_time {
            write!(f, " at {} UTC", at.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

/// When `job` runs next, given the current time. Pure: reads no clock other than `now`.
/// A job that never ran (`last_run` unset) still fires today / this hour / this minute
/// if its at time has not passed yet.
pub fn compute_next_run(job: &Job, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    if job.interval == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    let period = job.period();
    let mut next_run = now + period;

    if let Some(day) = job.start_day {
        if job.unit != TimeUnit::Weeks {
            return Err(ScheduleError::StartDayNeedsWeeks(job.unit));
        }
        let mut days_ahead = i64::from(day.num_days_from_monday())
            - i64::from(next_run.weekday().num_days_from_monday());
        if days_ahead <= 0 {
            days_ahead += 7;
        }
        next_run = next_run + Duration::days(days_ahead) - period;
    }

    if let Some(at) = job.at_time {
        let anchored = job.start_day.is_some();
        if !matches!(job.unit, TimeUnit::Days | TimeUnit::Hours | TimeUnit::Minutes) && !anchored {
            return Err(ScheduleError::AtTimeNeedsUnit(job.unit));
        }
        let hour = if job.unit == TimeUnit::Days || anchored { at.hour() } else { next_run.hour() };
        let minute = if matches!(job.unit, TimeUnit::Days | TimeUnit::Hours) || anchored {
            at.minute()
        } else {
            next_run.minute()
        };
        let replaced = NaiveTime::from_hms_opt(hour, minute, at.second())
            .ok_or_else(|| ScheduleError::InvalidAtTime { at: at.to_string(), unit: job.unit })?;
        next_run = Utc.from_utc_datetime(&next_run.date_naive().and_time(replaced));

        if job.last_run.is_none() {
            match job.unit {
                TimeUnit::Days if job.interval == 1 && at > now.time() => {
                    next_run -= Duration::days(1);
                }
                TimeUnit::Hours if (at.minute(), at.second()) > (now.minute(), now.second()) => {
                    next_run -= Duration::hours(1);
                }
                TimeUnit::Minutes if at.second() > now.second() => {
                    next_run -= Duration::minutes(1);
                }
                _ => {}
            }
        }

        if anchored && next_run - now >= Duration::days(7) {
            next_run -= period;
        }
    }

    Ok(next_run)
}

pub(crate) fn parse_at(unit: TimeUnit, anchored: bool, at: &str) -> Result<NaiveTime, ScheduleError> {
    let invalid = || ScheduleError::InvalidAtTime { at: at.to_owned(), unit };
    let parts: Vec<&str> = at.split(':').collect();

    let (hour, minute, second) = if unit == TimeUnit::Days || anchored {
        match parts.as_slice() {
            [h, m] => (field(h, 23), field(m, 59), Some(0)),
            [h, m, s] => (field(h, 23), field(m, 59), field(s, 59)),
            _ => return Err(invalid()),
        }
    } else {
        match (unit, parts.as_slice()) {
            (TimeUnit::Hours, ["", m]) => (Some(0), field(m, 59), Some(0)),
            (TimeUnit::Hours, [m, s]) => (Some(0), field(m, 59), field(s, 59)),
            (TimeUnit::Minutes, ["", s]) => (Some(0), Some(0), field(s, 59)),
            (TimeUnit::Hours | TimeUnit::Minutes, _) => return Err(invalid()),
            _ => return Err(ScheduleError::AtTimeNeedsUnit(unit)),
        }
    };

    match (hour, minute, second) {
        (Some(hour), Some(minute), Some(second)) => {
            NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

/// Exactly two digits, at most `max`.
pub(crate) fn field(s: &str, max: u32) -> Option<u32> {
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().filter(|value| *value <= max)
}

/// Format an at time the way [Job::at] parses it for the given unit.
pub fn format_at(unit: TimeUnit, anchored: bool, at: NaiveTime) -> String {
    if unit == TimeUnit::Days || anchored {
        at.format("%H:%M:%S").to_string()
    } else if unit == TimeUnit::Hours {
        at.format("%M:%S").to_string()
    } else {
        at.format(":%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::{time, utc};

    fn next(job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
        compute_next_run(job, now).expect("Should be able to schedule")
    }

    #[test_log::test]
    fn plain_interval() {
        let job = Job::every(10, TimeUnit::Minutes).unwrap();
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 0, 0)), utc(2024, 1, 15, 10, 10, 0));

        let job = Job::every(2, TimeUnit::Weeks).unwrap();
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 0, 0)), utc(2024, 1, 29, 10, 0, 0));
    }

    #[test_log::test]
    fn daily_first_schedule_fires_today_if_still_possible() {
        let job = Job::every(1, TimeUnit::Days).unwrap().at("06:30").unwrap();
        assert_eq!(next(&job, utc(2024, 1, 15, 5, 0, 0)), utc(2024, 1, 15, 6, 30, 0));
        assert_eq!(next(&job, utc(2024, 1, 15, 7, 0, 0)), utc(2024, 1, 16, 6, 30, 0));
    }

    #[test_log::test]
    fn daily_after_run_moves_a_whole_day() {
        let mut job = Job::every(1, TimeUnit::Days).unwrap().at("06:30:00").unwrap();
        let ran_at = utc(2024, 1, 15, 6, 30, 0);
        job.mark_run(ran_at);
        assert_eq!(next(&job, ran_at), utc(2024, 1, 16, 6, 30, 0));
        assert!(next(&job, ran_at) >= ran_at + job.period());
    }

    #[test_log::test]
    fn multi_day_does_not_roll_back() {
        let job = Job::every(2, TimeUnit::Days).unwrap().at("06:30:00").unwrap();
        assert_eq!(next(&job, utc(2024, 1, 15, 5, 0, 0)), utc(2024, 1, 17, 6, 30, 0));
    }

    #[test_log::test]
    fn hourly_at_minute() {
        let job = Job::every(1, TimeUnit::Hours).unwrap().at(":15").unwrap();
        assert_eq!(job.get_at_time(), Some(time(0, 15, 0)));
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 5, 0)), utc(2024, 1, 15, 10, 15, 0));
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 20, 0)), utc(2024, 1, 15, 11, 15, 0));

        let job = Job::every(1, TimeUnit::Hours).unwrap().at("15:30").unwrap();
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 15, 10)), utc(2024, 1, 15, 10, 15, 30));
    }

    #[test_log::test]
    fn minutely_at_second() {
        let job = Job::every(1, TimeUnit::Minutes).unwrap().at(":30").unwrap();
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 5, 10)), utc(2024, 1, 15, 10, 5, 30));
        assert_eq!(next(&job, utc(2024, 1, 15, 10, 5, 40)), utc(2024, 1, 15, 10, 6, 30));
    }

    #[test_log::test]
    fn weekly_anchor() {
        // 2024-01-17 is a Wednesday.
        let now = utc(2024, 1, 17, 10, 0, 0);
        let monday = Job::every(1, TimeUnit::Weeks).unwrap()
            .starting_on(Weekday::Mon).unwrap()
            .at("08:00").unwrap();
        assert_eq!(next(&monday, now), utc(2024, 1, 22, 8, 0, 0));

        let later_today = Job::every(1, TimeUnit::Weeks).unwrap()
            .starting_on(Weekday::Wed).unwrap()
            .at("12:00").unwrap();
        assert_eq!(next(&later_today, now), utc(2024, 1, 17, 12, 0, 0));

        let earlier_today = Job::every(1, TimeUnit::Weeks).unwrap()
            .starting_on(Weekday::Wed).unwrap()
            .at("09:00").unwrap();
        assert_eq!(next(&earlier_today, now), utc(2024, 1, 24, 9, 0, 0));
    }

    #[test_log::test]
    fn rejections() {
        let hourly = Job::every(1, TimeUnit::Hours).unwrap();
        assert!(matches!(hourly.at("06:30:00"), Err(ScheduleError::InvalidAtTime { .. })));

        let minutely = Job::every(1, TimeUnit::Minutes).unwrap();
        assert!(matches!(minutely.at("10:30"), Err(ScheduleError::InvalidAtTime { .. })));

        let daily = Job::every(1, TimeUnit::Days).unwrap();
        assert!(matches!(daily.clone().at("25:00"), Err(ScheduleError::InvalidAtTime { .. })));
        assert!(matches!(daily.at("6:30"), Err(ScheduleError::InvalidAtTime { .. })));

        let daily = Job::every(1, TimeUnit::Days).unwrap();
        assert_eq!(daily.starting_on(Weekday::Mon), Err(ScheduleError::StartDayNeedsWeeks(TimeUnit::Days)));

        let weekly = Job::every(1, TimeUnit::Weeks).unwrap();
        assert_eq!(weekly.at("08:00"), Err(ScheduleError::AtTimeNeedsUnit(TimeUnit::Weeks)));

        assert_eq!(Job::every(0, TimeUnit::Days), Err(ScheduleError::ZeroInterval));
    }

    #[test_log::test]
    fn sub_day_units_truncate_at_time() {
        let job = Job::every(1, TimeUnit::Hours).unwrap().with_at_time(time(6, 30, 15));
        assert_eq!(job.get_at_time(), Some(time(0, 30, 15)));
        assert_eq!(format_at(TimeUnit::Hours, false, time(0, 30, 15)), "30:15");

        let job = Job::every(1, TimeUnit::Minutes).unwrap().with_at_time(time(6, 30, 15));
        assert_eq!(job.get_at_time(), Some(time(0, 0, 15)));
        assert_eq!(format_at(TimeUnit::Minutes, false, time(0, 0, 15)), ":15");
    }
}
