use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;
use serde_with::serde_as;
use serde_with::{DisplayFromStr, DurationSeconds};

use crate::io::temperatures::Sensor;

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_timezone")]
    timezone: Tz,
    #[serde(default = "default_schedule_file")]
    schedule_file: PathBuf,
    #[serde(default)]
    heating: HeatingConfig,
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    simulation: SimulationConfig,
}

fn default_timezone() -> Tz {
    chrono_tz::Europe::London
}

fn default_schedule_file() -> PathBuf {
    PathBuf::from("heating_schedule.json")
}

impl Config {
    pub fn get_timezone(&self) -> &Tz {
        &self.timezone
    }

    pub fn get_schedule_file(&self) -> &PathBuf {
        &self.schedule_file
    }

    pub fn get_heating(&self) -> &HeatingConfig {
        &self.heating
    }

    pub fn get_scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    pub fn get_simulation(&self) -> &SimulationConfig {
        &self.simulation
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HeatingConfig {
    /// Longest the control loop sleeps between polls of the temperature and relays.
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "poll_interval_secs")]
    poll_interval: Duration,
    /// How many consecutive failures (or relay state mismatches) before an error is broadcast.
    error_threshold: u32,
    /// How long shutdown waits for the control loop before giving up on it.
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "join_timeout_secs")]
    join_timeout: Duration,
    /// Sensors to drive the heating from, most preferred first.
    sensor_preference: Vec<Sensor>,
    #[serde(default)]
    trend: TrendConfig,
    #[serde(default)]
    sanity: SanityConfig,
}

impl Default for HeatingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            error_threshold: 3,
            join_timeout: Duration::from_secs(5),
            sensor_preference: vec![Sensor::LivingRoom, Sensor::Bedroom, Sensor::Kitchen],
            trend: TrendConfig::default(),
            sanity: SanityConfig::default(),
        }
    }
}

impl HeatingConfig {
    pub fn get_poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn get_error_threshold(&self) -> u32 {
        self.error_threshold.max(1)
    }

    pub fn get_join_timeout(&self) -> Duration {
        self.join_timeout
    }

    pub fn get_sensor_preference(&self) -> &[Sensor] {
        &self.sensor_preference
    }

    pub fn get_trend(&self) -> &TrendConfig {
        &self.trend
    }

    pub fn get_sanity(&self) -> &SanityConfig {
        &self.sanity
    }

    #[cfg(test)]
    pub fn for_test(poll_interval: Duration, error_threshold: u32, trend: TrendConfig) -> Self {
        Self {
            poll_interval,
            error_threshold,
            trend,
            ..Default::default()
        }
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrendConfig {
    /// Continuous heating needed before the temperature trend is judged.
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "min_window_secs")]
    pub min_window: Duration,
    /// Below this (°C per hour) while heating, the heater is reported as not warming.
    pub min_slope_per_hour: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_window: Duration::from_secs(30 * 60),
            min_slope_per_hour: 0.2,
        }
    }
}

/// Bounds every heating request and program must respect.
#[serde_as]
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SanityConfig {
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_hysteresis: f64,
    pub max_hysteresis: f64,
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "min_duration_secs")]
    pub min_duration: Duration,
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "max_duration_secs")]
    pub max_duration: Duration,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            min_temperature: 5.0,
            max_temperature: 30.0,
            min_hysteresis: 0.1,
            max_hysteresis: 5.0,
            min_duration: Duration::from_secs(15 * 60),
            max_duration: Duration::from_secs(12 * 60 * 60),
        }
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest the scheduler sleeps without re-checking its jobs.
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "max_idle_secs")]
    max_idle: Duration,
    /// How long stopping waits for the scheduler loop before giving up on it.
    #[serde_as(as = "DurationSeconds")]
    #[serde(rename = "join_timeout_secs")]
    join_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(5 * 60),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn new(max_idle: Duration) -> Self {
        Self {
            max_idle,
            ..Default::default()
        }
    }

    pub fn get_max_idle(&self) -> Duration {
        self.max_idle
    }

    pub fn get_join_timeout(&self) -> Duration {
        self.join_timeout
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SimulationConfig {
    pub sensor: Sensor,
    pub initial_temperature: f64,
    pub outside_temperature: f64,
    /// Temperature gain per hour with the heater on, ignoring losses.
    pub heating_per_hour: f64,
    /// Fraction of the inside/outside difference lost per hour.
    pub loss_per_hour: f64,
    /// How much faster than real time the room evolves.
    pub time_scale: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sensor: Sensor::LivingRoom,
            initial_temperature: 16.0,
            outside_temperature: 8.0,
            heating_per_hour: 3.0,
            loss_per_hour: 0.1,
            time_scale: 1.0,
        }
    }
}
