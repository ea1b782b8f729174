use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{HeatingConfig, SanityConfig};
use crate::control::hysteresis::HysteresisController;
use crate::control::trend::{TrendMonitor, TrendVerdict};
use crate::control::{sanity, ErrorCounter, HeatingState};
use crate::io::broadcast::{BroadcastLevel, Broadcaster};
use crate::io::controls::HeatingActuator;
use crate::io::temperatures::ReferenceTemperature;
use crate::schedule::periodic::{format_duration, DEFAULT_HYSTERESIS};
use crate::schedule::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RequestKind {
    Manual,
    Scheduled,
}

/// What someone (or some program) wants the heating to do.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatingRequest {
    kind: RequestKind,
    requested_by: String,
    /// None means always on.
    target: Option<f64>,
    hysteresis: f64,
    duration: Option<Duration>,
    /// Stop once the target is reached instead of holding it.
    reach_once: bool,
    job: Option<JobId>,
}

impl HeatingRequest {
    pub fn manual(requested_by: &str) -> Self {
        Self {
            kind: RequestKind::Manual,
            requested_by: requested_by.to_owned(),
            target: None,
            hysteresis: DEFAULT_HYSTERESIS,
            duration: None,
            reach_once: false,
            job: None,
        }
    }

    pub fn scheduled(requested_by: &str, job: JobId, duration: Duration) -> Self {
        Self {
            kind: RequestKind::Scheduled,
            duration: Some(duration),
            job: Some(job),
            ..Self::manual(requested_by)
        }
    }

    pub fn with_target(mut self, target: Option<f64>, hysteresis: f64) -> Self {
        self.target = target;
        self.hysteresis = hysteresis;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn reach_once(mut self) -> Self {
        self.reach_once = true;
        self
    }

    pub fn get_kind(&self) -> RequestKind {
        self.kind
    }

    pub fn get_requested_by(&self) -> &str {
        &self.requested_by
    }

    pub fn get_target(&self) -> Option<f64> {
        self.target
    }

    pub fn get_hysteresis(&self) -> f64 {
        self.hysteresis
    }

    pub fn get_duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_reach_once(&self) -> bool {
        self.reach_once
    }

    pub fn get_job(&self) -> Option<JobId> {
        self.job
    }
}

impl Display for HeatingRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} heating", self.kind)?;
        if let Some(job) = self.job {
            write!(f, " {}", job)?;
        }
        if !self.requested_by.is_empty() {
            write!(f, " by {}", self.requested_by)?;
        }
        match self.target {
            Some(target) if self.reach_once => write!(f, " until {:.1}°C", target)?,
            Some(target) => write!(f, " to {:.1}°C ±{:.1}", target, self.hysteresis)?,
            None => write!(f, ", always on")?,
        }
        if let Some(duration) = self.duration.and_then(|d| chrono::Duration::from_std(d).ok()) {
            write!(f, " for {}", format_duration(duration))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Started,
    /// Accepted but not acted on, with the reason.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestRejected {
    OutOfBounds(String),
    Paused,
    ShuttingDown,
}

impl Display for RequestRejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestRejected::OutOfBounds(reason) => write!(f, "{}", reason),
            RequestRejected::Paused => write!(f, "Programs are paused"),
            RequestRejected::ShuttingDown => write!(f, "Heating is shutting down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub is_heating: bool,
    pub is_paused: bool,
    pub active: Option<HeatingRequest>,
    pub latest_requested_by: Option<String>,
}

impl Display for EngineStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.active, self.is_heating) {
            (Some(active), true) => write!(f, "Heating: {}", active)?,
            (Some(active), false) => write!(f, "Starting {}", active)?,
            (None, _) => write!(f, "Heating is idle")?,
        }
        if self.is_paused {
            write!(f, ", programs paused")?;
        }
        if let Some(by) = &self.latest_requested_by {
            write!(f, " (last request by {})", by)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EngineState {
    is_heating: bool,
    is_paused: bool,
    active: Option<HeatingRequest>,
    latest_requested_by: Option<String>,
    start_requested: bool,
    stop_requested: bool,
    terminate: bool,
}

impl EngineState {
    fn request_stop(&mut self, requested_by: &str) {
        self.active = None;
        self.latest_requested_by = Some(requested_by.to_owned());
        self.start_requested = false;
        self.stop_requested = true;
    }
}

enum Interrupt {
    Replace(HeatingRequest),
    Stop,
    Terminate,
}

struct EngineShared {
    state: Mutex<EngineState>,
    wake: Notify,
    config: HeatingConfig,
    actuator: Box<dyn HeatingActuator>,
    temperature: ReferenceTemperature,
    broadcaster: Arc<dyn Broadcaster>,
}

impl EngineShared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_interrupt(&self) -> bool {
        let state = self.lock();
        state.terminate || state.start_requested || state.stop_requested
    }

    fn take_interrupt(&self) -> Option<Interrupt> {
        let mut state = self.lock();
        if state.terminate {
            return Some(Interrupt::Terminate);
        }
        if state.start_requested {
            state.start_requested = false;
            return Some(match &state.active {
                Some(request) => Interrupt::Replace(request.clone()),
                None => Interrupt::Stop,
            });
        }
        if state.stop_requested {
            state.stop_requested = false;
            return Some(Interrupt::Stop);
        }
        None
    }

    /// Bounded by the join timeout, a stuck actuator is logged and left behind.
    async fn turn_off(&self, reason: &str) {
        let join_timeout = self.config.get_join_timeout();
        match tokio::time::timeout(join_timeout, self.actuator.turn_off()).await {
            Ok(Ok(message)) => info!("Heating off ({}): {}", reason, message),
            Ok(Err(e)) => {
                error!("Failed to turn heating off ({}): {}", reason, e);
                self.broadcaster
                    .broadcast(BroadcastLevel::Error, &format!("Failed to turn heating off: {}", e));
            }
            Err(_) => warn!("Turning heating off ({}) did not finish within {:?}", reason, join_timeout),
        }
    }
}

/// Consecutive error tracking that outlives a single episode.
struct Monitors {
    trend: TrendMonitor,
    sensor_errors: ErrorCounter,
    command_errors: ErrorCounter,
    mismatches: ErrorCounter,
}

impl Monitors {
    fn new(config: &HeatingConfig) -> Self {
        let threshold = config.get_error_threshold();
        Self {
            trend: TrendMonitor::new(config.get_trend().clone()),
            sensor_errors: ErrorCounter::new(threshold),
            command_errors: ErrorCounter::new(threshold),
            mismatches: ErrorCounter::new(threshold),
        }
    }
}

/// Owns the heater: arbitrates heating requests and runs the control loop that acts on them.
pub struct HeatingEngine {
    shared: Arc<EngineShared>,
    control_loop: Mutex<Option<JoinHandle<()>>>,
}

impl HeatingEngine {
    pub fn new(
        config: HeatingConfig,
        actuator: impl HeatingActuator + 'static,
        temperature: ReferenceTemperature,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                state: Mutex::new(EngineState::default()),
                wake: Notify::new(),
                config,
                actuator: Box::new(actuator),
                temperature,
                broadcaster,
            }),
            control_loop: Mutex::new(None),
        }
    }

    /// Spawn the control loop. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut control_loop = self.control_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if control_loop.is_some() {
            warn!("Control loop already running");
            return;
        }
        *control_loop = Some(tokio::spawn(run_control_loop(self.shared.clone())));
    }

    pub fn sanity(&self) -> &SanityConfig {
        self.shared.config.get_sanity()
    }

    pub fn start_heating(&self, request: HeatingRequest) -> Result<RequestOutcome, RequestRejected> {
        sanity::check_request(self.sanity(), &request).map_err(RequestRejected::OutOfBounds)?;

        let mut state = self.shared.lock();
        if state.terminate {
            return Err(RequestRejected::ShuttingDown);
        }
        if state.is_paused {
            match request.get_kind() {
                RequestKind::Scheduled => {
                    info!("Rejected {}: programs are paused", request);
                    return Err(RequestRejected::Paused);
                }
                RequestKind::Manual => {
                    info!("Unpaused by manual request from {}", request.get_requested_by());
                    state.is_paused = false;
                }
            }
        }
        if request.get_kind() == RequestKind::Scheduled {
            if let Some(active) = &state.active {
                let reason = format!("{} is already active", active);
                info!("Skipping {}: {}", request, reason);
                return Ok(RequestOutcome::Skipped(reason));
            }
        }

        info!("Starting {}", request);
        state.latest_requested_by = Some(request.get_requested_by().to_owned());
        state.active = Some(request);
        state.start_requested = true;
        state.stop_requested = false;
        drop(state);
        self.shared.wake.notify_one();
        Ok(RequestOutcome::Started)
    }

    /// Returns whether anything was active.
    pub fn stop_heating(&self, requested_by: &str) -> bool {
        let mut state = self.shared.lock();
        let was_active = state.active.is_some() || state.is_heating;
        info!("Heating stopped by {}", requested_by);
        state.request_stop(requested_by);
        drop(state);
        self.shared.wake.notify_one();
        was_active
    }

    /// Returns whether programs are now paused.
    pub fn toggle_pause(&self, requested_by: &str) -> bool {
        let mut state = self.shared.lock();
        state.is_paused = !state.is_paused;
        let paused = state.is_paused;
        info!("Programs {} by {}", if paused { "paused" } else { "resumed" }, requested_by);
        if paused {
            state.request_stop(requested_by);
        } else {
            state.latest_requested_by = Some(requested_by.to_owned());
        }
        drop(state);
        if paused {
            self.shared.wake.notify_one();
        }
        paused
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.shared.lock();
        EngineStatus {
            is_heating: state.is_heating,
            is_paused: state.is_paused,
            active: state.active.clone(),
            latest_requested_by: state.latest_requested_by.clone(),
        }
    }

    /// Stop the control loop and make sure the heating is left off.
    pub async fn shutdown(&self) {
        self.shared.lock().terminate = true;
        self.shared.wake.notify_one();

        let handle = self.control_loop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut handle) = handle {
            let join_timeout = self.shared.config.get_join_timeout();
            match tokio::time::timeout(join_timeout, &mut handle).await {
                Ok(Ok(())) => {
                    info!("Control loop finished");
                    return;
                }
                Ok(Err(e)) => error!("Control loop failed: {}", e),
                Err(_) => {
                    warn!("Control loop did not finish within {:?}, abandoning it", join_timeout);
                    handle.abort();
                }
            }
        }
        self.shared.lock().is_heating = false;
        self.shared.turn_off("shutdown").await;
    }
}

async fn run_control_loop(shared: Arc<EngineShared>) {
    let mut monitors = Monitors::new(&shared.config);
    let mut pending = None;
    loop {
        let interrupt = match pending.take().or_else(|| shared.take_interrupt()) {
            Some(interrupt) => interrupt,
            None => {
                shared.wake.notified().await;
                continue;
            }
        };
        match interrupt {
            Interrupt::Terminate => break,
            Interrupt::Stop => {
                shared.lock().is_heating = false;
                monitors.trend.reset();
                shared.turn_off("stop requested").await;
            }
            Interrupt::Replace(request) => {
                pending = run_episode(&shared, request, &mut monitors).await;
            }
        }
    }
    shared.lock().is_heating = false;
    shared.turn_off("shutting down").await;
    debug!("Control loop exited");
}

/// Drive the heating for one request until it finishes or is interrupted.
/// Interrupts are handed back rather than acted on, so that a replacing request
/// carries on without the heater being switched off in between.
async fn run_episode(shared: &EngineShared, request: HeatingRequest, monitors: &mut Monitors) -> Option<Interrupt> {
    let started = Instant::now();
    let end_time = request.get_duration().map(|duration| started + duration);
    let mut controller = request
        .get_target()
        .map(|target| HysteresisController::with_target(target, request.get_hysteresis()));

    shared.lock().is_heating = true;
    debug!("Episode started: {}", request);

    loop {
        if let Some(interrupt) = shared.take_interrupt() {
            return Some(interrupt);
        }
        let now = Instant::now();

        let temperature = match shared.temperature.query_temperature_for_heating().await {
            Ok(temperature) => {
                monitors.sensor_errors.record_success();
                Some(f64::from(temperature))
            }
            Err(e) => {
                warn!("Failed to get reference temperature: {}", e);
                if monitors.sensor_errors.record_failure() {
                    shared.broadcaster.broadcast(
                        BroadcastLevel::Error,
                        &format!(
                            "Failed to read the temperature {} times in a row: {}",
                            monitors.sensor_errors.get_threshold(),
                            e
                        ),
                    );
                }
                None
            }
        };

        let decision = match controller.as_mut() {
            None => Ok(HeatingState::ON),
            Some(controller) => match temperature {
                Some(temperature) => controller.update(temperature),
                // Sensor dropout: hold the last decision.
                None => Ok(controller.last_decision().unwrap_or(HeatingState::OFF)),
            },
        };
        let (mut should_heat, mut finished) = match decision {
            Ok(decision) => (decision, false),
            Err(failure) => {
                error!("{}", failure);
                shared
                    .broadcaster
                    .broadcast(BroadcastLevel::Error, &format!("Heating stopped: {}", failure.get_description()));
                (HeatingState::OFF, true)
            }
        };

        // Only a decision made from a reading counts, a held OFF during dropout does not.
        if request.is_reach_once() && temperature.is_some() && should_heat.is_off() {
            info!("Target reached for {}", request);
            finished = true;
        }
        if end_time.is_some_and(|end_time| now >= end_time) {
            info!("Duration elapsed for {}", request);
            should_heat = HeatingState::OFF;
            finished = true;
        }

        match shared.actuator.set_heating(should_heat).await {
            Ok(message) => {
                debug!("Heating {}: {}", should_heat, message);
                monitors.command_errors.record_success();
            }
            Err(e) => {
                error!("Failed to turn heating {}: {}", should_heat, e);
                if monitors.command_errors.record_failure() {
                    shared
                        .broadcaster
                        .broadcast(BroadcastLevel::Error, &format!("Failed to turn heating {}: {}", should_heat, e));
                }
            }
        }

        let observed = shared.actuator.query_heating_state().await;
        if observed.heating_state() == Some(should_heat) {
            monitors.mismatches.record_success();
        } else {
            warn!("Commanded heating {} but relays report {}", should_heat, observed);
            if monitors.mismatches.record_failure() {
                shared.broadcaster.broadcast(
                    BroadcastLevel::Error,
                    &format!(
                        "Heating should be {} but the relays report {} ({} times in a row)",
                        should_heat,
                        observed,
                        monitors.mismatches.get_threshold()
                    ),
                );
            }
        }

        if should_heat.is_on() {
            if let Some(temperature) = temperature {
                match monitors.trend.record(now, temperature) {
                    Some(TrendVerdict::NotWarming(trend)) => shared.broadcaster.broadcast(
                        BroadcastLevel::Error,
                        &format!("Heating is on but the room is not warming: {}", trend),
                    ),
                    Some(TrendVerdict::Warming(trend)) => {
                        shared.broadcaster.broadcast(BroadcastLevel::Info, &format!("Temperature trend: {}", trend))
                    }
                    None => {}
                }
            }
        } else {
            monitors.trend.reset();
        }

        if finished {
            monitors.trend.reset();
            let mut state = shared.lock();
            if !state.start_requested {
                state.active = None;
                state.is_heating = false;
            }
            return None;
        }

        let mut next_poll = now + shared.config.get_poll_interval();
        if let Some(end_time) = end_time {
            next_poll = next_poll.min(end_time);
        }
        while !shared.has_interrupt() && Instant::now() < next_poll {
            // A stale permit only costs another pass around the predicate.
            let _ = tokio::time::timeout_at(next_poll, shared.wake.notified()).await;
        }
    }
}
