use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::schedule::{field, parse_at, Job, ScheduleError, TimeUnit};
use crate::time_util::zone::local_to_utc_time;

pub const DEFAULT_HYSTERESIS: f64 = 0.5;
pub const HEATING_TAG: &str = "heating";

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A daily recurring, duration-bounded heating program.
///
/// The local wall-clock start is what the user asked for. The UTC at time inside
/// [Job] is derived from it for the local date being scheduled, see [Self::refresh_at_time].
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicHeatingJob {
    job: Job,
    at_local: NaiveTime,
    target_temperature: Option<f64>,
    hysteresis: f64,
    duration: Duration,
    created_by: String,
}

/// How a [PeriodicHeatingJob] is persisted. `at` is local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatingJobRecord {
    pub day_interval: u32,
    pub at: String,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl PeriodicHeatingJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        day_interval: u32,
        at_local: NaiveTime,
        duration: Duration,
        target_temperature: Option<f64>,
        hysteresis: f64,
        created_by: &str,
        tz: &Tz,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let at_local = at_local.with_nanosecond(0).unwrap_or(at_local);
        let job = Job::every(day_interval, TimeUnit::Days)?
            .tag(HEATING_TAG)
            .with_at_time(local_to_utc_time(at_local, now, tz));

        if duration <= Duration::zero() {
            return Err(ScheduleError::InvalidDuration(format_duration(duration)));
        }
        if duration >= job.period() {
            return Err(ScheduleError::DurationExceedsPeriod {
                duration,
                period: job.period(),
            });
        }

        Ok(Self {
            job,
            at_local,
            target_temperature,
            hysteresis,
            duration,
            created_by: created_by.to_owned(),
        })
    }

    pub fn from_record(record: &HeatingJobRecord, tz: &Tz, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let at_local = parse_at(TimeUnit::Days, false, &record.at)?;
        let duration = parse_duration(&record.duration)?;
        Self::new(
            record.day_interval,
            at_local,
            duration,
            record.temperature,
            record.hysteresis.unwrap_or(DEFAULT_HYSTERESIS),
            record.created_by.as_deref().unwrap_or_default(),
            tz,
            now,
        )
    }

    pub fn to_record(&self) -> HeatingJobRecord {
        HeatingJobRecord {
            day_interval: self.job.get_interval(),
            at: self.at_local.format("%H:%M:%S").to_string(),
            duration: format_duration(self.duration),
            temperature: self.target_temperature,
            hysteresis: Some(self.hysteresis),
            created_by: Some(self.created_by.clone()).filter(|created_by| !created_by.is_empty()),
        }
    }

    /// Re-derive the UTC at time for the local date of `now`, so the program keeps its
    /// local start time across daylight saving changes.
    pub fn refresh_at_time(&mut self, now: DateTime<Utc>, tz: &Tz) {
        self.job.set_at_time(local_to_utc_time(self.at_local, now, tz));
    }

    /// Whether the two programs' `[at, at + duration)` windows intersect on a common day.
    /// Windows running past midnight are checked against the neighbouring days as well.
    /// The day interval is not taken into account.
    pub fn overlaps(&self, other: &PeriodicHeatingJob) -> bool {
        let (start, end) = self.window_seconds();
        let (other_start, other_end) = other.window_seconds();
        [-SECONDS_PER_DAY, 0, SECONDS_PER_DAY].iter().any(|shift| {
            let other_start = other_start + shift;
            let other_end = other_end + shift;
            start < other_end && other_start < end
        })
    }

    fn window_seconds(&self) -> (i64, i64) {
        let start = i64::from(self.at_local.num_seconds_from_midnight());
        (start, start + self.duration.num_seconds())
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut Job {
        &mut self.job
    }

    pub fn get_at_local(&self) -> NaiveTime {
        self.at_local
    }

    pub fn get_target_temperature(&self) -> Option<f64> {
        self.target_temperature
    }

    pub fn get_hysteresis(&self) -> f64 {
        self.hysteresis
    }

    pub fn get_duration(&self) -> Duration {
        self.duration
    }

    pub fn get_created_by(&self) -> &str {
        &self.created_by
    }
}

impl Display for PeriodicHeatingJob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} for {}", self.at_local.format("%H:%M"), format_duration(self.duration))?;
        match self.job.get_interval() {
            1 => write!(f, " every day")?,
            days => write!(f, " every {} days", days)?,
        }
        if let Some(target) = self.target_temperature {
            write!(f, ", {:.1}°C ±{:.1}", target, self.hysteresis)?;
        }
        if !self.created_by.is_empty() {
            write!(f, " ({})", self.created_by)?;
        }
        Ok(())
    }
}

/// `H:MM:SS`, hours unbounded.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds();
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

pub fn parse_duration(duration: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidDuration(duration.to_owned());
    let parts: Vec<&str> = duration.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };
    if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i64 = hours.parse().map_err(|_| invalid())?;
    let minutes = field(minutes, 59).ok_or_else(invalid)?;
    let seconds = field(seconds, 59).ok_or_else(invalid)?;
    Ok(Duration::hours(hours) + Duration::minutes(i64::from(minutes)) + Duration::seconds(i64::from(seconds)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::compute_next_run;
    use crate::time_util::test_utils::{time, utc};
    use chrono_tz::Europe::London;

    fn program(at: NaiveTime, hours: i64) -> PeriodicHeatingJob {
        PeriodicHeatingJob::new(1, at, Duration::hours(hours), Some(21.0), 0.5, "test", &London, utc(2024, 1, 15, 12, 0, 0))
            .expect("Should be a valid program")
    }

    #[test_log::test]
    fn overlap() {
        let six_to_eight = program(time(6, 0, 0), 2);
        let seven_to_eight = program(time(7, 0, 0), 1);
        let eight_to_nine = program(time(8, 0, 0), 1);

        assert!(six_to_eight.overlaps(&seven_to_eight));
        assert!(seven_to_eight.overlaps(&six_to_eight));
        assert!(!six_to_eight.overlaps(&eight_to_nine));
        assert!(!eight_to_nine.overlaps(&six_to_eight));
    }

    #[test_log::test]
    fn overlap_past_midnight() {
        let late = program(time(23, 0, 0), 2);
        let early = program(time(0, 30, 0), 1);
        let morning = program(time(1, 0, 0), 1);
        assert!(late.overlaps(&early));
        assert!(early.overlaps(&late));
        assert!(!late.overlaps(&morning));
    }

    #[test_log::test]
    fn duration_must_fit_in_period() {
        let result = PeriodicHeatingJob::new(1, time(6, 0, 0), Duration::hours(24), None, 0.5, "", &London, utc(2024, 1, 15, 12, 0, 0));
        assert!(matches!(result, Err(ScheduleError::DurationExceedsPeriod { .. })));

        let result = PeriodicHeatingJob::new(2, time(6, 0, 0), Duration::hours(30), None, 0.5, "", &London, utc(2024, 1, 15, 12, 0, 0));
        assert!(result.is_ok(), "Two day programs can run longer than a day");
    }

    #[test_log::test]
    fn durations() {
        assert_eq!(parse_duration("2:00:00"), Ok(Duration::hours(2)));
        assert_eq!(parse_duration("0:45:30"), Ok(Duration::minutes(45) + Duration::seconds(30)));
        assert_eq!(parse_duration("12:00:00"), Ok(Duration::hours(12)));
        assert_eq!(format_duration(Duration::minutes(90)), "1:30:00");

        for malformed in ["", "2:00", "2:60:00", "x:00:00", "-1:00:00", "2:0:00", "2:00:00:00"] {
            assert!(parse_duration(malformed).is_err(), "'{}' should be rejected", malformed);
        }
    }

    #[test_log::test]
    fn record_round_trip() {
        let now = utc(2024, 7, 15, 4, 0, 0);
        let record = HeatingJobRecord {
            day_interval: 1,
            at: "06:30:00".to_owned(),
            duration: "2:00:00".to_owned(),
            temperature: Some(21.5),
            hysteresis: Some(0.5),
            created_by: Some("x".to_owned()),
        };
        let job = PeriodicHeatingJob::from_record(&record, &London, now).expect("Record should be valid");
        assert_eq!(job.to_record(), record);
        assert!(job.job().get_tags().contains(HEATING_TAG));

        let json = serde_json::to_string(&job.to_record()).unwrap();
        let reloaded: HeatingJobRecord = serde_json::from_str(&json).unwrap();
        let reloaded = PeriodicHeatingJob::from_record(&reloaded, &London, now).unwrap();

        assert_eq!(reloaded, job);
        assert_eq!(
            compute_next_run(reloaded.job(), now).unwrap(),
            compute_next_run(job.job(), now).unwrap()
        );
        // 06:30 BST
        assert_eq!(compute_next_run(job.job(), now).unwrap(), utc(2024, 7, 15, 5, 30, 0));
    }

    #[test_log::test]
    fn local_time_survives_daylight_saving() {
        let summer = utc(2024, 7, 15, 4, 0, 0);
        let winter = utc(2024, 11, 15, 4, 0, 0);

        let mut job = program(time(6, 30, 0), 2);
        job.refresh_at_time(summer, &London);
        assert_eq!(job.job().get_at_time(), Some(time(5, 30, 0)));

        // Saved in summer, reloaded in winter.
        let record = job.to_record();
        assert_eq!(record.at, "06:30:00");
        let mut reloaded = PeriodicHeatingJob::from_record(&record, &London, winter).unwrap();
        assert_eq!(reloaded.job().get_at_time(), Some(time(6, 30, 0)));

        reloaded.refresh_at_time(summer, &London);
        assert_eq!(reloaded.job().get_at_time(), Some(time(5, 30, 0)));
    }

    #[test_log::test]
    fn defaults_when_missing() {
        let json = r#"{"day_interval": 1, "at": "07:00:00", "duration": "1:00:00"}"#;
        let record: HeatingJobRecord = serde_json::from_str(json).unwrap();
        let job = PeriodicHeatingJob::from_record(&record, &London, utc(2024, 1, 15, 12, 0, 0)).unwrap();
        assert_eq!(job.get_hysteresis(), DEFAULT_HYSTERESIS);
        assert_eq!(job.get_target_temperature(), None);
        assert_eq!(job.get_created_by(), "");
    }
}
