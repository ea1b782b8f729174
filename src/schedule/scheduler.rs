use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::control::engine::{HeatingEngine, HeatingRequest, RequestOutcome};
use crate::io::broadcast::{BroadcastLevel, Broadcaster};
use crate::schedule::other::{OtherJob, OtherJobRecord, OtherTask};
use crate::schedule::periodic::{HeatingJobRecord, PeriodicHeatingJob};
use crate::schedule::persistence::ScheduleFile;
use crate::schedule::registry::{JobRegistry, RegisteredJob, ScheduledTask};
use crate::schedule::{JobId, ScheduleError};
use crate::time_util::mytime::TimeProvider;

struct SchedulerShared {
    engine: Arc<HeatingEngine>,
    broadcaster: Arc<dyn Broadcaster>,
    time_provider: Arc<dyn TimeProvider>,
    config: SchedulerConfig,
    registry: Mutex<JobRegistry>,
    wake: Notify,
    terminate: AtomicBool,
}

/// Runs due jobs in the background: heating programs go to the engine,
/// everything else is handled here.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<HeatingEngine>,
        broadcaster: Arc<dyn Broadcaster>,
        time_provider: Arc<dyn TimeProvider>,
        tz: Tz,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                engine,
                broadcaster,
                time_provider,
                config,
                registry: Mutex::new(JobRegistry::new(tz)),
                wake: Notify::new(),
                terminate: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the scheduler loop. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            warn!("Scheduler already running");
            return;
        }
        *worker = Some(tokio::spawn(run_scheduler(self.shared.clone())));
    }

    pub async fn stop(&self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut handle) = handle else {
            return;
        };
        let join_timeout = self.shared.config.get_join_timeout();
        match tokio::time::timeout(join_timeout, &mut handle).await {
            Ok(Ok(())) => info!("Scheduler stopped"),
            Ok(Err(e)) => error!("Scheduler loop failed: {}", e),
            Err(_) => {
                warn!("Scheduler did not stop within {:?}, abandoning it", join_timeout);
                handle.abort();
            }
        }
    }

    pub fn schedule_heating_job(&self, record: &HeatingJobRecord) -> Result<JobId, ScheduleError> {
        let now = self.shared.time_provider.get_utc_time();
        let id = {
            let mut registry = self.shared.registry();
            let job = PeriodicHeatingJob::from_record(record, &registry.tz(), now)?;
            registry.add_heating(job, self.shared.engine.sanity(), now)?
        };
        info!("Scheduled heating program {}", id);
        self.shared.wake.notify_one();
        Ok(id)
    }

    pub fn schedule_other_job(&self, record: &OtherJobRecord) -> Result<JobId, ScheduleError> {
        let now = self.shared.time_provider.get_utc_time();
        let id = {
            let mut registry = self.shared.registry();
            let job = OtherJob::from_record(record, &registry.tz(), now)?;
            registry.add_other(job, now)?
        };
        info!("Scheduled {} {}", record.task, id);
        self.shared.wake.notify_one();
        Ok(id)
    }

    pub fn cancel_job(&self, id: JobId) -> Result<(), ScheduleError> {
        let task = self.shared.registry().cancel(id)?;
        info!("Cancelled {} {}", id, task);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<RegisteredJob> {
        self.shared.registry().jobs().to_vec()
    }

    /// One line per job, heating programs first in start time order.
    pub fn describe(&self) -> String {
        let registry = self.shared.registry();
        let heating = registry.heating_jobs().into_iter().map(|(id, job)| format!("{} {}", id, job));
        let others = registry.other_jobs().into_iter().map(|(id, job)| format!("{} {}", id, job));
        heating.chain(others).collect::<Vec<_>>().join("\n")
    }

    /// Run whatever is due at `now`.
    pub fn run_pending(&self, now: DateTime<Utc>) {
        self.shared.run_pending(now);
    }

    /// Add what can be added from the saved schedule. Returns how many jobs were added.
    pub fn load(&self, path: &Path) -> Result<usize, String> {
        let file = ScheduleFile::load(path)?;
        let now = self.shared.time_provider.get_utc_time();
        let added = self.shared.registry().restore(&file, self.shared.engine.sanity(), now);
        info!("Loaded {} jobs from {:?}", added, path);
        self.shared.wake.notify_one();
        Ok(added)
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let file = self.shared.registry().to_file();
        file.save(path)?;
        info!("Saved {} heating and {} other jobs to {:?}", file.heating_jobs.len(), file.other_jobs.len(), path);
        Ok(())
    }
}

impl SchedulerShared {
    fn registry(&self) -> MutexGuard<'_, JobRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_pending(&self, now: DateTime<Utc>) {
        let due = self.registry().take_due(now);
        for (id, task) in due {
            debug!("Running {} {}", id, task);
            match task {
                ScheduledTask::Heating(job) => self.start_program(id, &job),
                ScheduledTask::Other(job) => self.run_task(id, job.get_task()),
            }
        }
    }

    fn start_program(&self, id: JobId, job: &PeriodicHeatingJob) {
        let Ok(duration) = job.get_duration().to_std() else {
            error!("Program {} has a negative duration", id);
            return;
        };
        let requested_by = match job.get_created_by() {
            "" => format!("program {}", id),
            created_by => created_by.to_owned(),
        };
        let request = HeatingRequest::scheduled(&requested_by, id, duration)
            .with_target(job.get_target_temperature(), job.get_hysteresis());
        match self.engine.start_heating(request) {
            Ok(RequestOutcome::Started) => info!("Started program {} ({})", id, job),
            Ok(RequestOutcome::Skipped(reason)) => info!("Program {} skipped: {}", id, reason),
            Err(rejected) => self.broadcaster.broadcast(
                BroadcastLevel::Warning,
                &format!("Program {} ({}) did not start: {}", id, job, rejected),
            ),
        }
    }

    fn run_task(&self, id: JobId, task: &OtherTask) {
        match task {
            OtherTask::Reminder { message } => self.broadcaster.broadcast(BroadcastLevel::Info, message),
            OtherTask::StatusReport => {
                let status = self.engine.status();
                debug!("Status report {}", id);
                self.broadcaster.broadcast(BroadcastLevel::Info, &status.to_string());
            }
        }
    }
}

async fn run_scheduler(shared: Arc<SchedulerShared>) {
    info!("Scheduler started");
    while !shared.terminate.load(Ordering::SeqCst) {
        let now = shared.time_provider.get_utc_time();
        shared.run_pending(now);

        let idle = shared.registry().idle_time(now, shared.config.get_max_idle());
        if shared.terminate.load(Ordering::SeqCst) {
            break;
        }
        // Woken early by new jobs, cancellations and stop.
        let _ = tokio::time::timeout(idle, shared.wake.notified()).await;
    }
    debug!("Scheduler loop exited");
}
