use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::schedule::{format_at, parse_at, Job, ScheduleError, TimeUnit};
use crate::time_util::zone::local_to_utc_time;

/// Non-heating work the scheduler knows how to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum OtherTask {
    /// Broadcast a fixed message.
    Reminder { message: String },
    /// Broadcast what the heating is currently doing.
    StatusReport,
}

impl Display for OtherTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OtherTask::Reminder { message } => write!(f, "reminder '{}'", message),
            OtherTask::StatusReport => write!(f, "status report"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtherJob {
    job: Job,
    at_local: Option<NaiveTime>,
    task: OtherTask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherJobRecord {
    pub interval: u32,
    pub unit: TimeUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_day: Option<Weekday>,
    #[serde(flatten)]
    pub task: OtherTask,
}

impl OtherJob {
    pub fn new(
        interval: u32,
        unit: TimeUnit,
        at: Option<&str>,
        start_day: Option<Weekday>,
        task: OtherTask,
        tz: &Tz,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let mut job = Job::every(interval, unit)?;
        if let Some(day) = start_day {
            job = job.starting_on(day)?;
        }
        let at_local = match at {
            Some(at) => Some(parse_at(unit, start_day.is_some(), at)?),
            None => None,
        };
        let mut other = Self { job, at_local, task };
        other.refresh_at_time(now, tz);
        Ok(other)
    }

    pub fn from_record(record: &OtherJobRecord, tz: &Tz, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        Self::new(
            record.interval,
            record.unit,
            record.at.as_deref(),
            record.start_day,
            record.task.clone(),
            tz,
            now,
        )
    }

    pub fn to_record(&self) -> OtherJobRecord {
        let anchored = self.job.get_start_day().is_some();
        OtherJobRecord {
            interval: self.job.get_interval(),
            unit: self.job.get_unit(),
            at: self.at_local.map(|at| format_at(self.job.get_unit(), anchored, at)),
            start_day: self.job.get_start_day(),
            task: self.task.clone(),
        }
    }

    /// Daily and weekday jobs follow the local wall clock. Hourly jobs only
    /// pick up the part of the offset below an hour, as in +05:30.
    pub fn refresh_at_time(&mut self, now: DateTime<Utc>, tz: &Tz) {
        let Some(at_local) = self.at_local else {
            return;
        };
        let anchored = self.job.get_start_day().is_some();
        let at_time = match self.job.get_unit() {
            TimeUnit::Minutes if !anchored => at_local,
            TimeUnit::Hours if !anchored => {
                let at_utc = local_to_utc_time(at_local, now, tz);
                at_utc.with_hour(0).unwrap_or(at_utc)
            }
            _ => local_to_utc_time(at_local, now, tz),
        };
        self.job.set_at_time(at_time);
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut Job {
        &mut self.job
    }

    pub fn get_task(&self) -> &OtherTask {
        &self.task
    }
}

impl Display for OtherJob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} every {} {}", self.task, self.job.get_interval(), self.job.get_unit())?;
        if let Some(day) = self.job.get_start_day() {
            write!(f, " on {}", day)?;
        }
        if let Some(at) = self.at_local {
            let anchored = self.job.get_start_day().is_some();
            write!(f, " at {}", format_at(self.job.get_unit(), anchored, at))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::{time, utc};
    use crate::schedule::compute_next_run;
    use chrono_tz::Asia::Kolkata;
    use chrono_tz::Europe::London;

    #[test_log::test]
    fn records() {
        let json = r#"[
            {"interval": 1, "unit": "weeks", "start_day": "Sun", "at": "18:00", "task": "reminder", "message": "Bleed the radiators"},
            {"interval": 30, "unit": "minutes", "task": "status_report"},
            {"interval": 1, "unit": "hours", "at": ":15", "task": "status_report"}
        ]"#;
        let records: Vec<OtherJobRecord> = serde_json::from_str(json).expect("Should parse");
        let now = utc(2024, 7, 15, 12, 0, 0);

        let weekly = OtherJob::from_record(&records[0], &London, now).unwrap();
        assert_eq!(weekly.job().get_start_day(), Some(Weekday::Sun));
        // 18:00 BST
        assert_eq!(weekly.job().get_at_time(), Some(time(17, 0, 0)));
        assert_eq!(weekly.get_task(), &OtherTask::Reminder { message: "Bleed the radiators".to_owned() });
        assert_eq!(weekly.to_record().at.as_deref(), Some("18:00:00"));

        let half_hourly = OtherJob::from_record(&records[1], &London, now).unwrap();
        assert_eq!(half_hourly.to_record(), records[1]);

        let hourly = OtherJob::from_record(&records[2], &London, now).unwrap();
        assert_eq!(hourly.job().get_at_time(), Some(time(0, 15, 0)), "Whole hour offsets leave the minute alone");
        assert_eq!(hourly.to_record().at.as_deref(), Some("15:00"));
    }

    #[test_log::test]
    fn hourly_follows_half_hour_offset() {
        let record: OtherJobRecord =
            serde_json::from_str(r#"{"interval": 1, "unit": "hours", "at": ":15", "task": "status_report"}"#).unwrap();
        let now = utc(2024, 7, 15, 12, 0, 0);

        let hourly = OtherJob::from_record(&record, &Kolkata, now).unwrap();
        // :15 local is :45 UTC at +05:30
        assert_eq!(hourly.job().get_at_time(), Some(time(0, 45, 0)));
        assert_eq!(compute_next_run(hourly.job(), now), Ok(utc(2024, 7, 15, 12, 45, 0)));
        assert_eq!(hourly.to_record().at.as_deref(), Some("15:00"), "Saved as local time");
    }

    #[test_log::test]
    fn unknown_task_rejected() {
        let json = r#"{"interval": 1, "unit": "days", "task": "water_plants"}"#;
        assert!(serde_json::from_str::<OtherJobRecord>(json).is_err());

        let json = r#"{"interval": 1, "unit": "fortnights", "task": "status_report"}"#;
        assert!(serde_json::from_str::<OtherJobRecord>(json).is_err());
    }
}
