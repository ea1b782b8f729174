use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use crate::config::SimulationConfig;
use crate::io::controls::{ActuatorError, DeviceState, HeatingActuator, RelayStates};
use crate::io::temperatures::{Sensor, TemperatureManager};

/// A single room with one heater, for running without hardware.
/// Clones share the same room.
#[derive(Clone)]
pub struct SimulatedRoom {
    state: Arc<Mutex<RoomState>>,
    config: SimulationConfig,
}

struct RoomState {
    temperature: f64,
    heater_on: bool,
    last_update: Instant,
}

impl SimulatedRoom {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RoomState {
                temperature: config.initial_temperature,
                heater_on: false,
                last_update: Instant::now(),
            })),
            config: config.clone(),
        }
    }

    /// Newton's law of cooling towards the outside, plus a constant gain while heating.
    fn advance(&self, state: &mut RoomState) {
        let now = Instant::now();
        let hours = now.duration_since(state.last_update).as_secs_f64() * self.config.time_scale / 3600.0;
        let gain = if state.heater_on { self.config.heating_per_hour } else { 0.0 };
        let loss = self.config.loss_per_hour * (state.temperature - self.config.outside_temperature);
        state.temperature += (gain - loss) * hours;
        state.last_update = now;
    }

    fn set_heater(&self, on: bool) -> Result<String, ActuatorError> {
        let mut state = self.state.lock().map_err(|_| ActuatorError::new("Simulated room poisoned"))?;
        self.advance(&mut state);
        state.heater_on = on;
        debug!("Simulated heater {} at {:.2}", if on { "on" } else { "off" }, state.temperature);
        Ok(format!("Simulated heater {}", if on { "on" } else { "off" }))
    }

    pub fn temperature(&self) -> Option<f64> {
        let mut state = self.state.lock().ok()?;
        self.advance(&mut state);
        Some(state.temperature)
    }
}

#[async_trait]
impl HeatingActuator for SimulatedRoom {
    async fn turn_on(&self) -> Result<String, ActuatorError> {
        self.set_heater(true)
    }

    async fn turn_off(&self) -> Result<String, ActuatorError> {
        self.set_heater(false)
    }

    async fn query_heating_state(&self) -> RelayStates {
        let heater_on = self.state.lock().ok().map(|state| state.heater_on);
        RelayStates::new(vec![DeviceState::new("simulated_heater", heater_on)])
    }
}

#[async_trait]
impl TemperatureManager for SimulatedRoom {
    async fn retrieve_temperatures(&self) -> Result<HashMap<Sensor, f32>, String> {
        let temperature = self.temperature().ok_or_else(|| "Simulated room poisoned".to_owned())?;
        let mut temps = HashMap::new();
        temps.insert(self.config.sensor.clone(), temperature as f32);
        temps.insert(Sensor::Outside, self.config.outside_temperature as f32);
        Ok(temps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn warms_while_heating_and_cools_after() {
        let room = SimulatedRoom::new(&SimulationConfig::default());
        let start = room.temperature().unwrap();

        room.turn_on().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        let heated = room.temperature().unwrap();
        assert!(heated > start, "Should warm up: {} -> {}", start, heated);
        assert_eq!(room.query_heating_state().await.heating_state(), Some(crate::control::HeatingState::ON));

        room.turn_off().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(room.temperature().unwrap() < heated, "Should cool down");
    }
}
