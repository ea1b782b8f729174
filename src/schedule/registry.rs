use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use log::{error, warn};

use crate::config::SanityConfig;
use crate::control::sanity;
use crate::schedule::other::OtherJob;
use crate::schedule::periodic::PeriodicHeatingJob;
use crate::schedule::persistence::ScheduleFile;
use crate::schedule::{compute_next_run, Job, JobId, ScheduleError};

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledTask {
    Heating(PeriodicHeatingJob),
    Other(OtherJob),
}

impl ScheduledTask {
    pub fn job(&self) -> &Job {
        match self {
            ScheduledTask::Heating(heating) => heating.job(),
            ScheduledTask::Other(other) => other.job(),
        }
    }

    fn job_mut(&mut self) -> &mut Job {
        match self {
            ScheduledTask::Heating(heating) => heating.job_mut(),
            ScheduledTask::Other(other) => other.job_mut(),
        }
    }

    fn refresh_at_time(&mut self, now: DateTime<Utc>, tz: &Tz) {
        match self {
            ScheduledTask::Heating(heating) => heating.refresh_at_time(now, tz),
            ScheduledTask::Other(other) => other.refresh_at_time(now, tz),
        }
    }

    /// The UTC at time depends on the local date it is for, so it is derived
    /// for the candidate run before the run is computed for real.
    fn schedule_next(&mut self, now: DateTime<Utc>, tz: &Tz) -> Result<DateTime<Utc>, ScheduleError> {
        self.refresh_at_time(now, tz);
        let candidate = compute_next_run(self.job(), now)?;
        self.refresh_at_time(candidate, tz);
        self.job_mut().schedule_next(now)
    }
}

impl Display for ScheduledTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduledTask::Heating(heating) => write!(f, "{}", heating),
            ScheduledTask::Other(other) => write!(f, "{}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredJob {
    id: JobId,
    task: ScheduledTask,
}

impl RegisteredJob {
    pub fn get_id(&self) -> JobId {
        self.id
    }

    pub fn get_task(&self) -> &ScheduledTask {
        &self.task
    }
}

impl Display for RegisteredJob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.task)?;
        if let Some(next_run) = self.task.job().get_next_run() {
            write!(f, ", next {}", next_run.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        Ok(())
    }
}

/// Every scheduled job, with the next run of each kept up to date.
#[derive(Debug)]
pub struct JobRegistry {
    tz: Tz,
    next_id: u64,
    jobs: Vec<RegisteredJob>,
}

impl JobRegistry {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            next_id: 1,
            jobs: Vec::new(),
        }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Rejects programs outside the sanity bounds or overlapping an existing program.
    pub fn add_heating(
        &mut self,
        job: PeriodicHeatingJob,
        bounds: &SanityConfig,
        now: DateTime<Utc>,
    ) -> Result<JobId, ScheduleError> {
        let duration = job
            .get_duration()
            .to_std()
            .map_err(|_| ScheduleError::InvalidDuration(job.get_duration().to_string()))?;
        sanity::check_bounds(bounds, job.get_target_temperature(), job.get_hysteresis(), Some(duration))
            .map_err(ScheduleError::OutOfBounds)?;

        if let Some((id, existing)) = self.heating_jobs().into_iter().find(|(_, existing)| existing.overlaps(&job)) {
            return Err(ScheduleError::Overlap {
                existing: format!("{} ({})", id, existing),
            });
        }
        self.add(ScheduledTask::Heating(job), now)
    }

    pub fn add_other(&mut self, job: OtherJob, now: DateTime<Utc>) -> Result<JobId, ScheduleError> {
        self.add(ScheduledTask::Other(job), now)
    }

    fn add(&mut self, mut task: ScheduledTask, now: DateTime<Utc>) -> Result<JobId, ScheduleError> {
        task.schedule_next(now, &self.tz)?;
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.push(RegisteredJob { id, task });
        Ok(id)
    }

    pub fn cancel(&mut self, id: JobId) -> Result<ScheduledTask, ScheduleError> {
        let index = self
            .jobs
            .iter()
            .position(|job| job.id == id)
            .ok_or(ScheduleError::UnknownJob(id))?;
        Ok(self.jobs.remove(index).task)
    }

    /// Sorted by local start time.
    pub fn heating_jobs(&self) -> Vec<(JobId, &PeriodicHeatingJob)> {
        self.jobs
            .iter()
            .filter_map(|job| match &job.task {
                ScheduledTask::Heating(heating) => Some((job.id, heating)),
                ScheduledTask::Other(_) => None,
            })
            .sorted_by_key(|(_, heating)| heating.get_at_local())
            .collect()
    }

    pub fn other_jobs(&self) -> Vec<(JobId, &OtherJob)> {
        self.jobs
            .iter()
            .filter_map(|job| match &job.task {
                ScheduledTask::Other(other) => Some((job.id, other)),
                ScheduledTask::Heating(_) => None,
            })
            .collect()
    }

    pub fn jobs(&self) -> &[RegisteredJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Marks every due job as run, schedules its next run and hands back what to run now.
    /// Jobs whose next run cannot be computed are dropped.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<(JobId, ScheduledTask)> {
        let tz = self.tz;
        let mut due = Vec::new();
        self.jobs.retain_mut(|registered| {
            if !registered.task.job().is_due(now) {
                return true;
            }
            due.push((registered.id, registered.task.clone()));
            registered.task.job_mut().mark_run(now);
            match registered.task.schedule_next(now, &tz) {
                Ok(_) => true,
                Err(e) => {
                    error!("Dropping {}, failed to schedule its next run: {}", registered, e);
                    false
                }
            }
        });
        due
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.jobs.iter().filter_map(|job| job.task.job().get_next_run()).min()
    }

    /// How long until the nearest run, capped at `max_idle`.
    pub fn idle_time(&self, now: DateTime<Utc>, max_idle: std::time::Duration) -> std::time::Duration {
        match self.next_run() {
            Some(next_run) => (next_run - now).to_std().unwrap_or_default().min(max_idle),
            None => max_idle,
        }
    }

    /// Add every entry of `file` that is valid now. Returns how many were added.
    pub fn restore(&mut self, file: &ScheduleFile, bounds: &SanityConfig, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for record in &file.heating_jobs {
            let result = PeriodicHeatingJob::from_record(record, &self.tz, now)
                .and_then(|job| self.add_heating(job, bounds, now));
            match result {
                Ok(_) => added += 1,
                Err(e) => warn!("Skipping heating job {:?}: {}", record, e),
            }
        }
        for record in &file.other_jobs {
            let result = OtherJob::from_record(record, &self.tz, now).and_then(|job| self.add_other(job, now));
            match result {
                Ok(_) => added += 1,
                Err(e) => warn!("Skipping other job {:?}: {}", record, e),
            }
        }
        added
    }

    pub fn to_file(&self) -> ScheduleFile {
        ScheduleFile {
            heating_jobs: self.heating_jobs().into_iter().map(|(_, job)| job.to_record()).collect(),
            other_jobs: self.other_jobs().into_iter().map(|(_, job)| job.to_record()).collect(),
        }
    }
}
